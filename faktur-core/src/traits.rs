//! Core traits defining the seams between faktur components.

use crate::error::Result;
use crate::id::InvoiceId;
use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Entities subject to bulk replace / bundle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Invoices,
    Settings,
}

/// File blob split out of an invoice record.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceFile {
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file: Vec<u8>,
}

/// Full data bundle for migration between store backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBundle {
    #[serde(default)]
    pub invoices: Vec<Invoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

/// Trait for invoice store backends.
///
/// Three interchangeable implementations exist: pure in-memory, a JSON-array
/// file, and SQLite. `save` is an upsert and must preserve byte identity of
/// `original_file`.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Upsert an invoice
    async fn save(&self, invoice: &Invoice) -> Result<()>;

    /// Get an invoice by ID
    async fn get(&self, id: InvoiceId) -> Result<Option<Invoice>>;

    /// Get an invoice by its dedup source key
    async fn get_by_source_key(&self, key: &str) -> Result<Option<Invoice>>;

    /// List invoices matching a filter, in insertion order
    async fn list(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>>;

    /// Delete an invoice
    async fn delete(&self, id: InvoiceId) -> Result<()>;

    /// Get the stored file blob for an invoice
    async fn get_file(&self, id: InvoiceId) -> Result<Option<InvoiceFile>>;

    /// Replace the whole content of one entity (data migration)
    async fn replace_all(&self, entity: Entity, items: Vec<serde_json::Value>) -> Result<()>;

    /// Export every entity plus settings
    async fn export_bundle(&self) -> Result<DataBundle>;

    /// Import a bundle, replacing current content
    async fn import_bundle(&self, bundle: &DataBundle) -> Result<()>;

    /// Read the canonical settings document (sync state, tokens)
    async fn get_settings(&self) -> Result<Option<serde_json::Value>>;

    /// Write the canonical settings document
    async fn set_settings(&self, settings: &serde_json::Value) -> Result<()>;
}

/// Capability handed to pollers: intake and dedup lookup, nothing else.
///
/// Pollers never hold the inbox; the workflow owns it and provides this
/// sink, keeping event flow unidirectional.
#[async_trait]
pub trait IntakeSink: Send + Sync {
    /// Add an invoice; dedup by `metadata.source_key`. Returns the stored
    /// record, pre-existing or new.
    async fn add_invoice(
        &self,
        source: InvoiceSource,
        bytes: Option<Vec<u8>>,
        metadata: IntakeMetadata,
    ) -> Result<Invoice>;

    /// Dedup lookup without side effects.
    async fn get_invoice_by_source_key(&self, key: &str) -> Result<Option<Invoice>>;
}
