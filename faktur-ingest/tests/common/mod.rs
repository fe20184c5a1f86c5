//! Shared test doubles for the ingestion tests.

use async_trait::async_trait;
use faktur_core::error::Result;
use faktur_core::traits::IntakeSink;
use faktur_core::types::{IntakeMetadata, Invoice, InvoiceSource};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory intake sink with the same source-key dedup semantics as the
/// real inbox.
#[derive(Default)]
pub struct TestSink {
    invoices: Mutex<Vec<Invoice>>,
    by_source_key: Mutex<HashMap<String, usize>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.invoices.lock().len()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.invoices.lock().clone()
    }
}

#[async_trait]
impl IntakeSink for TestSink {
    async fn add_invoice(
        &self,
        source: InvoiceSource,
        bytes: Option<Vec<u8>>,
        metadata: IntakeMetadata,
    ) -> Result<Invoice> {
        if let Some(key) = &metadata.source_key {
            if let Some(index) = self.by_source_key.lock().get(key) {
                return Ok(self.invoices.lock()[*index].clone());
            }
        }

        let mut invoice = Invoice::new(source);
        invoice.original_file = bytes;
        invoice.file_name = metadata.file_name;
        invoice.file_type = metadata.file_type;
        invoice.file_size = metadata.file_size;
        invoice.source_key = metadata.source_key.clone();
        invoice.source_path = metadata.source_path;
        invoice.email_subject = metadata.email_subject;
        invoice.email_from = metadata.email_from;
        invoice.email_date = metadata.email_date;

        let mut invoices = self.invoices.lock();
        if let Some(key) = metadata.source_key {
            self.by_source_key.lock().insert(key, invoices.len());
        }
        invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice_by_source_key(&self, key: &str) -> Result<Option<Invoice>> {
        let index = self.by_source_key.lock().get(key).copied();
        Ok(index.map(|i| self.invoices.lock()[i].clone()))
    }
}
