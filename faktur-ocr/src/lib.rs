//! OCR/parse pipeline for ingested invoice documents.
//!
//! Dispatch order: structured XML first (KSeF invoices and anything
//! detectably XML), then a metadata-only record for empty documents, then
//! the configured OCR provider with regex field extraction over its output.

pub mod external;
pub mod normalize;
pub mod tesseract;
pub mod text;
pub mod xml;

use chrono::Utc;
use faktur_core::config::{OcrConfig, OcrProvider};
use faktur_core::error::Result;
use faktur_core::types::{Invoice, InvoiceSource, OcrData, ParsedInvoice};

pub use external::ExternalOcr;
pub use tesseract::TesseractOcr;

/// Note attached to records that carried no document bytes.
pub const NO_CONTENT_NOTE: &str = "No file content - metadata only";

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutcome {
    pub parsed: ParsedInvoice,
    pub ocr_data: OcrData,
}

/// The OCR/parse pipeline.
pub struct OcrPipeline {
    config: OcrConfig,
    tesseract: TesseractOcr,
    external: ExternalOcr,
}

impl OcrPipeline {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            tesseract: TesseractOcr::new(config.clone()),
            external: ExternalOcr::new(config.clone()),
            config,
        }
    }

    /// Replace the tesseract driver (tests).
    pub fn with_tesseract(mut self, tesseract: TesseractOcr) -> Self {
        self.tesseract = tesseract;
        self
    }

    /// Process one invoice record. Driver-level errors propagate to the
    /// caller; the invoice itself is not mutated here.
    pub async fn process(&self, invoice: &Invoice) -> Result<OcrOutcome> {
        let bytes = invoice
            .original_file
            .as_deref()
            .map(normalize::normalize_bytes)
            .unwrap_or_default();

        // rule 1 comes first: a KSeF record always goes through the XML
        // extractor, even when it carries no bytes
        if self.is_xml(invoice, &bytes) {
            let xml_text = String::from_utf8_lossy(&bytes);
            return Ok(OcrOutcome {
                parsed: xml::extract(&xml_text),
                ocr_data: OcrData {
                    provider: "xml".to_string(),
                    raw_text: None,
                    processed_at: Utc::now(),
                },
            });
        }

        if bytes.is_empty() {
            return Ok(OcrOutcome {
                parsed: ParsedInvoice {
                    confidence: 0,
                    note: Some(NO_CONTENT_NOTE.to_string()),
                    ..Default::default()
                },
                ocr_data: OcrData {
                    provider: "none".to_string(),
                    raw_text: None,
                    processed_at: Utc::now(),
                },
            });
        }

        let (provider, raw_text) = match self.config.provider {
            OcrProvider::Tesseract => (
                "tesseract",
                self.tesseract
                    .recognize(&bytes, invoice.file_type.as_deref())
                    .await?,
            ),
            OcrProvider::GoogleVision | OcrProvider::AzureOcr | OcrProvider::ExternalApi => (
                "external-api",
                self.external
                    .recognize(
                        &bytes,
                        invoice.file_type.as_deref(),
                        invoice.file_name.as_deref(),
                    )
                    .await?,
            ),
        };

        Ok(OcrOutcome {
            parsed: text::extract(&raw_text),
            ocr_data: OcrData {
                provider: provider.to_string(),
                raw_text: Some(raw_text),
                processed_at: Utc::now(),
            },
        })
    }

    /// Dispatch rule 1: KSeF source, XML MIME type, `.xml` file name, or
    /// content that starts like an XML document.
    fn is_xml(&self, invoice: &Invoice, bytes: &[u8]) -> bool {
        if invoice.source == InvoiceSource::Ksef {
            return true;
        }
        if invoice
            .file_type
            .as_deref()
            .is_some_and(|t| t.contains("xml"))
        {
            return true;
        }
        if invoice
            .file_name
            .as_deref()
            .is_some_and(|n| n.to_lowercase().ends_with(".xml"))
        {
            return true;
        }
        xml::looks_like_xml(bytes)
    }
}
