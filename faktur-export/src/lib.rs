//! Export service: renders approved invoice batches into accounting-format
//! artifacts.
//!
//! Every target renders from the same 19-column KPiR entry projection; the
//! per-format writers only differ in layout, separators and encoding.

pub mod dialects;
pub mod entry;
pub mod epp;
pub mod render;
pub mod xlsx;
pub mod xml_formats;

use chrono::{NaiveDate, Utc};
use faktur_core::error::{FakturError, Result};
use faktur_core::types::Invoice;

pub use entry::{EntryMeta, KPIR_COLUMNS, KpirEntry, expense_column};

/// Supported export targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    KpirCsv,
    KpirXlsx,
    WfirmaWydatki,
    OptimaXml,
    SubiektEpp,
    Symfonia,
    Enova,
    Infakt,
    Ifirma,
    Fakturownia,
    JpkPkpir,
}

impl ExportFormat {
    /// Parse a format id as accepted by `export_approved`.
    pub fn parse(id: &str) -> Result<Self> {
        match id {
            "kpir_csv" => Ok(Self::KpirCsv),
            "kpir_xlsx" => Ok(Self::KpirXlsx),
            "wfirma_wydatki" => Ok(Self::WfirmaWydatki),
            "optima_xml" => Ok(Self::OptimaXml),
            "subiekt_epp" => Ok(Self::SubiektEpp),
            "symfonia" => Ok(Self::Symfonia),
            "enova" => Ok(Self::Enova),
            "infakt" => Ok(Self::Infakt),
            "ifirma" => Ok(Self::Ifirma),
            "fakturownia" => Ok(Self::Fakturownia),
            "jpk_pkpir" => Ok(Self::JpkPkpir),
            other => Err(FakturError::validation(format!(
                "unknown export format: {}",
                other
            ))),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::KpirCsv => "kpir_csv",
            Self::KpirXlsx => "kpir_xlsx",
            Self::WfirmaWydatki => "wfirma_wydatki",
            Self::OptimaXml => "optima_xml",
            Self::SubiektEpp => "subiekt_epp",
            Self::Symfonia => "symfonia",
            Self::Enova => "enova",
            Self::Infakt => "infakt",
            Self::Ifirma => "ifirma",
            Self::Fakturownia => "fakturownia",
            Self::JpkPkpir => "jpk_pkpir",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::KpirCsv
            | Self::WfirmaWydatki
            | Self::Symfonia
            | Self::Infakt
            | Self::Ifirma
            | Self::Fakturownia => "csv",
            Self::KpirXlsx => "xlsx",
            Self::OptimaXml | Self::Enova | Self::JpkPkpir => "xml",
            Self::SubiektEpp => "epp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::KpirCsv
            | Self::WfirmaWydatki
            | Self::Infakt
            | Self::Ifirma
            | Self::Fakturownia => "text/csv; charset=utf-8",
            Self::Symfonia => "text/csv; charset=windows-1250",
            Self::KpirXlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            Self::OptimaXml | Self::Enova | Self::JpkPkpir => "application/xml",
            Self::SubiektEpp => "text/plain; charset=windows-1250",
        }
    }
}

/// Render options.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Date used in the output filename; defaults to today.
    pub date: Option<NaiveDate>,
}

/// One rendered artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub content: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

/// Stateless renderer over approved invoices.
#[derive(Debug, Default)]
pub struct ExportService;

impl ExportService {
    pub fn new() -> Self {
        Self
    }

    /// Project invoices through the KPiR entry builder and render them with
    /// the requested writer.
    pub fn render(
        &self,
        format: ExportFormat,
        invoices: &[Invoice],
        options: &ExportOptions,
    ) -> Result<ExportFile> {
        let entries: Vec<KpirEntry> = invoices
            .iter()
            .enumerate()
            .map(|(index, invoice)| KpirEntry::from_invoice(index + 1, invoice))
            .collect();

        let content = match format {
            ExportFormat::KpirCsv => dialects::kpir_csv(&entries)?,
            ExportFormat::KpirXlsx => xlsx::kpir_xlsx(&entries)?,
            ExportFormat::WfirmaWydatki => dialects::wfirma_wydatki(&entries)?,
            ExportFormat::OptimaXml => xml_formats::optima_xml(&entries),
            ExportFormat::SubiektEpp => epp::subiekt_epp(&entries)?,
            ExportFormat::Symfonia => dialects::symfonia(&entries)?,
            ExportFormat::Enova => xml_formats::enova_xml(&entries),
            ExportFormat::Infakt => dialects::simple_expense_csv(&entries, b',')?,
            ExportFormat::Ifirma => dialects::simple_expense_csv(&entries, b';')?,
            ExportFormat::Fakturownia => dialects::simple_expense_csv(&entries, b',')?,
            ExportFormat::JpkPkpir => xml_formats::jpk_pkpir(&entries),
        };

        let date = options
            .date
            .unwrap_or_else(|| Utc::now().date_naive())
            .format("%Y-%m-%d");
        Ok(ExportFile {
            content,
            filename: format!("{}_{}.{}", format.id(), date, format.extension()),
            mime_type: format.mime_type().to_string(),
        })
    }
}
