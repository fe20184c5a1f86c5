//! Unified inbox: the in-process registry for invoices.
//!
//! Owns status transitions and source-key dedup, and emits lifecycle events
//! after the store write commits. Mutations for a single invoice are
//! serialized by a per-id lock.

use async_trait::async_trait;
use chrono::Utc;
use faktur_core::error::{FakturError, Result};
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::id::InvoiceId;
use faktur_core::traits::{IntakeSink, InvoiceFile, InvoiceStore};
use faktur_core::types::{
    InboxStats, IntakeMetadata, Invoice, InvoiceFilter, InvoicePatch, InvoiceSource, InvoiceStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct Inbox {
    store: Arc<dyn InvoiceStore>,
    bus: EventBus,
    locks: parking_lot::Mutex<HashMap<InvoiceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Inbox {
    pub fn new(store: Arc<dyn InvoiceStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Per-invoice mutation lock; transitions for one id are totally
    /// ordered.
    async fn lock_for(&self, id: InvoiceId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(id).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))))
        };
        lock.lock_owned().await
    }

    async fn require(&self, id: InvoiceId) -> Result<Invoice> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| FakturError::not_found("invoice", id.to_string()))
    }

    pub async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        self.store.get(id).await
    }

    pub async fn get_by_source_key(&self, key: &str) -> Result<Option<Invoice>> {
        self.store.get_by_source_key(key).await
    }

    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        self.store.list(filter).await
    }

    pub async fn get_file(&self, id: InvoiceId) -> Result<InvoiceFile> {
        self.store
            .get_file(id)
            .await?
            .ok_or_else(|| FakturError::not_found("invoice file", id.to_string()))
    }

    /// Add a new invoice. Insertion with an already-known source key is a
    /// no-op returning the existing record.
    pub async fn add(
        &self,
        source: InvoiceSource,
        bytes: Option<Vec<u8>>,
        metadata: IntakeMetadata,
    ) -> Result<Invoice> {
        if let Some(key) = &metadata.source_key {
            if key.trim().is_empty() {
                return Err(FakturError::validation("sourceKey must not be empty"));
            }
            if let Some(existing) = self.store.get_by_source_key(key).await? {
                debug!("intake dedup hit for {}", key);
                return Ok(existing);
            }
        }

        let mut invoice = Invoice::new(source);
        invoice.file_size = metadata.file_size.or(bytes.as_ref().map(|b| b.len() as u64));
        invoice.original_file = bytes;
        invoice.file_name = metadata.file_name;
        invoice.file_type = metadata.file_type;
        invoice.source_key = metadata.source_key;
        invoice.source_path = metadata.source_path;
        invoice.email_subject = metadata.email_subject;
        invoice.email_from = metadata.email_from;
        invoice.email_date = metadata.email_date;

        self.store.save(&invoice).await?;

        self.bus.publish(InboxEvent::InvoiceAdded(invoice.clone()));
        match source {
            InvoiceSource::Email => self.bus.publish(InboxEvent::EmailInvoice(invoice.clone())),
            InvoiceSource::Storage => {
                self.bus.publish(InboxEvent::StorageInvoice(invoice.clone()))
            }
            _ => {}
        }
        Ok(invoice)
    }

    /// Apply a patch; rewrites `updated_at` and emits `invoice:updated`.
    pub async fn update_invoice(&self, id: InvoiceId, patch: InvoicePatch) -> Result<Invoice> {
        let _guard = self.lock_for(id).await;
        let mut invoice = self.require(id).await?;
        patch.apply(&mut invoice);
        invoice.touch();
        self.store.save(&invoice).await?;
        self.bus.publish(InboxEvent::InvoiceUpdated(invoice.clone()));
        Ok(invoice)
    }

    /// Transition an invoice's status. Validates the transition, stamps the
    /// status-specific timestamp and re-emits `invoice:<status>`.
    pub async fn set_status(&self, id: InvoiceId, status: InvoiceStatus) -> Result<Invoice> {
        let _guard = self.lock_for(id).await;
        self.transition_locked(id, None, status).await
    }

    /// Apply a patch and a status transition as one locked step. An invalid
    /// transition leaves the record completely untouched, so a failed
    /// approval of a terminal invoice has zero effect.
    pub async fn update_and_set_status(
        &self,
        id: InvoiceId,
        patch: InvoicePatch,
        status: InvoiceStatus,
    ) -> Result<Invoice> {
        let _guard = self.lock_for(id).await;
        self.transition_locked(id, Some(patch), status).await
    }

    async fn transition_locked(
        &self,
        id: InvoiceId,
        patch: Option<InvoicePatch>,
        status: InvoiceStatus,
    ) -> Result<Invoice> {
        let mut invoice = self.require(id).await?;
        if !invoice.status.can_transition_to(status) {
            return Err(FakturError::validation(format!(
                "invalid status transition {} -> {}",
                invoice.status, status
            )));
        }

        let patched = patch.is_some();
        if let Some(patch) = patch {
            patch.apply(&mut invoice);
        }
        invoice.status = status;
        let now = Utc::now();
        match status {
            InvoiceStatus::Described => invoice.processed_at = Some(now),
            InvoiceStatus::Approved => invoice.approved_at = Some(now),
            InvoiceStatus::Booked => invoice.booked_at = Some(now),
            _ => {}
        }
        invoice.touch();
        self.store.save(&invoice).await?;
        if patched {
            self.bus.publish(InboxEvent::InvoiceUpdated(invoice.clone()));
        }
        self.bus.publish(InboxEvent::StatusChanged {
            invoice: invoice.clone(),
            status,
        });
        Ok(invoice)
    }

    pub async fn delete_invoice(&self, id: InvoiceId) -> Result<()> {
        let _guard = self.lock_for(id).await;
        self.store.delete(id).await?;
        self.locks.lock().remove(&id);
        Ok(())
    }

    /// Remove records that carry no file bytes and never advanced past
    /// `pending`.
    pub async fn purge_empty(&self) -> Result<usize> {
        let pending = self
            .store
            .list(&InvoiceFilter {
                status: Some(InvoiceStatus::Pending),
                ..Default::default()
            })
            .await?;
        let mut purged = 0;
        for invoice in pending {
            let empty = invoice
                .original_file
                .as_ref()
                .is_none_or(|file| file.is_empty());
            if empty && invoice.processed_at.is_none() {
                self.delete_invoice(invoice.id).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub async fn get_stats(&self) -> Result<InboxStats> {
        let invoices = self.store.list(&InvoiceFilter::default()).await?;
        let mut stats = InboxStats {
            total: invoices.len(),
            ..Default::default()
        };
        for invoice in &invoices {
            *stats
                .by_status
                .entry(invoice.status.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_source
                .entry(invoice.source.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl IntakeSink for Inbox {
    async fn add_invoice(
        &self,
        source: InvoiceSource,
        bytes: Option<Vec<u8>>,
        metadata: IntakeMetadata,
    ) -> Result<Invoice> {
        self.add(source, bytes, metadata).await
    }

    async fn get_invoice_by_source_key(&self, key: &str) -> Result<Option<Invoice>> {
        self.get_by_source_key(key).await
    }
}
