//! Workflow orchestrator: drives the per-invoice state machine and exposes
//! the high-level operations.

use crate::inbox::Inbox;
use faktur_core::config::OcrConfig;
use faktur_core::error::{FakturError, Result};
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::id::InvoiceId;
use faktur_core::types::{Invoice, InvoicePatch, InvoiceStatus, ParsedInvoice};
use faktur_describe::AutoDescribe;
use faktur_export::{ExportFile, ExportFormat, ExportOptions, ExportService};
use faktur_ingest::{EmailWatcher, KsefIngester, StorageSync};
use faktur_ocr::OcrPipeline;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Workflow {
    inbox: Arc<Inbox>,
    ocr: tokio::sync::RwLock<OcrPipeline>,
    describe: Arc<AutoDescribe>,
    export: ExportService,
    bus: EventBus,
    storage_sync: Option<Arc<StorageSync>>,
    email_watcher: Option<Arc<EmailWatcher>>,
    ksef: Option<Arc<KsefIngester>>,
}

impl Workflow {
    pub fn new(
        inbox: Arc<Inbox>,
        ocr: OcrPipeline,
        describe: Arc<AutoDescribe>,
        bus: EventBus,
    ) -> Self {
        Self {
            inbox,
            ocr: tokio::sync::RwLock::new(ocr),
            describe,
            export: ExportService::new(),
            bus,
            storage_sync: None,
            email_watcher: None,
            ksef: None,
        }
    }

    /// Attach the pollers this workflow reconfigures at runtime.
    pub fn with_pollers(
        mut self,
        storage_sync: Arc<StorageSync>,
        email_watcher: Arc<EmailWatcher>,
        ksef: Option<Arc<KsefIngester>>,
    ) -> Self {
        self.storage_sync = Some(storage_sync);
        self.email_watcher = Some(email_watcher);
        self.ksef = ksef;
        self
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    pub fn describe(&self) -> &Arc<AutoDescribe> {
        &self.describe
    }

    /// Drive one invoice `pending -> ocr -> described`. An OCR failure
    /// leaves the record in `ocr` so the caller may retry.
    pub async fn process_invoice(&self, id: InvoiceId) -> Result<Invoice> {
        let invoice = self
            .inbox
            .get_invoice(id)
            .await?
            .ok_or_else(|| FakturError::not_found("invoice", id.to_string()))?;

        match invoice.status {
            InvoiceStatus::Pending => {
                self.inbox.set_status(id, InvoiceStatus::Ocr).await?;
            }
            // a previous OCR attempt failed; retry in place
            InvoiceStatus::Ocr => {}
            other => {
                return Err(FakturError::validation(format!(
                    "cannot process invoice in status {}",
                    other
                )));
            }
        }

        let invoice = self
            .inbox
            .get_invoice(id)
            .await?
            .ok_or_else(|| FakturError::not_found("invoice", id.to_string()))?;

        let outcome = {
            let ocr = self.ocr.read().await;
            match ocr.process(&invoice).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.bus.publish(InboxEvent::OcrError {
                        invoice_id: id,
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        };
        self.bus.publish(InboxEvent::OcrProcessed {
            invoice_id: id,
            parsed: outcome.parsed.clone(),
        });

        let mut patch = merge_parsed(&outcome.parsed);
        patch.ocr_data = Some(Some(outcome.ocr_data));
        patch.parsed_data = Some(Some(outcome.parsed));
        let updated = self.inbox.update_invoice(id, patch).await?;

        let suggestion = self.describe.suggest(&updated).await;
        debug!(
            "suggestion for {}: {:?} at {}",
            id, suggestion.category, suggestion.confidence
        );
        self.bus.publish(InboxEvent::DescribeSuggested {
            invoice_id: id,
            suggestion: suggestion.clone(),
        });
        self.inbox
            .update_invoice(
                id,
                InvoicePatch {
                    suggestion: Some(Some(suggestion)),
                    ..Default::default()
                },
            )
            .await?;

        self.inbox.set_status(id, InvoiceStatus::Described).await
    }

    /// Merge overrides, transition to `approved` and record contractor
    /// history. Overrides are only written when the transition is valid.
    pub async fn approve_invoice(&self, id: InvoiceId, overrides: InvoicePatch) -> Result<Invoice> {
        let approved = self
            .inbox
            .update_and_set_status(id, overrides, InvoiceStatus::Approved)
            .await?;
        self.describe.save_to_history(&approved);
        info!("invoice {} approved", id);
        Ok(approved)
    }

    /// Transition to the terminal `rejected` state, keeping the reason.
    pub async fn reject_invoice(&self, id: InvoiceId, reason: Option<String>) -> Result<Invoice> {
        self.inbox
            .update_and_set_status(
                id,
                InvoicePatch {
                    rejection_reason: Some(reason),
                    ..Default::default()
                },
                InvoiceStatus::Rejected,
            )
            .await
    }

    /// External booking confirmation.
    pub async fn mark_booked(&self, id: InvoiceId) -> Result<Invoice> {
        self.inbox.set_status(id, InvoiceStatus::Booked).await
    }

    /// Render the current approved set in the requested format.
    pub async fn export_approved(
        &self,
        format_id: &str,
        options: &ExportOptions,
    ) -> Result<ExportFile> {
        let format = ExportFormat::parse(format_id)?;
        let approved = self
            .inbox
            .list_invoices(&faktur_core::types::InvoiceFilter {
                status: Some(InvoiceStatus::Approved),
                ..Default::default()
            })
            .await?;
        info!("exporting {} approved invoice(s) as {}", approved.len(), format_id);
        self.export.render(format, &approved, options)
    }

    pub async fn assign_invoice_to_project(
        &self,
        id: InvoiceId,
        project_id: Option<String>,
    ) -> Result<Invoice> {
        self.inbox
            .update_invoice(
                id,
                InvoicePatch {
                    project_id: Some(project_id),
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn assign_invoice_to_expense_type(
        &self,
        id: InvoiceId,
        expense_type_id: Option<String>,
    ) -> Result<Invoice> {
        self.inbox
            .update_invoice(
                id,
                InvoicePatch {
                    expense_type_id: Some(expense_type_id),
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn assign_invoice_labels(
        &self,
        id: InvoiceId,
        label_ids: Vec<String>,
    ) -> Result<Invoice> {
        self.inbox
            .update_invoice(
                id,
                InvoicePatch {
                    label_ids: Some(label_ids),
                    ..Default::default()
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Runtime reconfiguration of the pollers
    // ------------------------------------------------------------------

    pub fn set_ksef_access_token(&self, token: Option<String>) {
        if let Some(ksef) = &self.ksef {
            ksef.set_access_token(token);
        }
    }

    /// Replace mailbox accounts (OAuth fields merge inside the watcher).
    pub fn configure_email(&self, accounts: Vec<faktur_core::types::EmailAccount>) {
        if let Some(watcher) = &self.email_watcher {
            watcher.set_accounts(accounts);
        }
    }

    /// Replace watched folders and connections.
    pub fn configure_storage(
        &self,
        local_folders: Vec<std::path::PathBuf>,
        connections: Vec<faktur_core::types::StorageConnection>,
    ) {
        if let Some(sync) = &self.storage_sync {
            sync.set_local_folders(local_folders);
            sync.set_connections(connections);
        }
    }

    /// Swap the OCR pipeline configuration.
    pub async fn configure_ocr(&self, config: OcrConfig) {
        *self.ocr.write().await = OcrPipeline::new(config);
    }
}

/// Patch invoice meta fields from a parsed record. Parsed values win;
/// absent parsed fields leave the invoice untouched.
fn merge_parsed(parsed: &ParsedInvoice) -> InvoicePatch {
    let mut patch = InvoicePatch::default();
    if parsed.seller_nip.is_some() {
        patch.contractor_nip = Some(parsed.seller_nip.clone());
    }
    if parsed.seller_name.is_some() {
        patch.contractor_name = Some(parsed.seller_name.clone());
    }
    if parsed.invoice_number.is_some() {
        patch.invoice_number = Some(parsed.invoice_number.clone());
    }
    if parsed.issue_date.is_some() {
        patch.issue_date = Some(parsed.issue_date.clone());
    }
    if parsed.due_date.is_some() {
        patch.due_date = Some(parsed.due_date.clone());
    }
    if parsed.net_amount.is_some() {
        patch.net_amount = Some(parsed.net_amount);
    }
    if parsed.vat_amount.is_some() {
        patch.vat_amount = Some(parsed.vat_amount);
    }
    if parsed.gross_amount.is_some() {
        patch.gross_amount = Some(parsed.gross_amount);
    }
    if let Some(currency) = &parsed.currency {
        patch.currency = Some(currency.clone());
    }
    patch
}
