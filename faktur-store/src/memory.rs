//! In-memory invoice store.

use async_trait::async_trait;
use faktur_core::error::{FakturError, Result};
use faktur_core::id::InvoiceId;
use faktur_core::traits::{DataBundle, Entity, InvoiceFile, InvoiceStore};
use faktur_core::types::{Invoice, InvoiceFilter};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Insertion-ordered invoice map plus a source-key index.
#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub invoices: HashMap<InvoiceId, Invoice>,
    pub order: Vec<InvoiceId>,
    pub by_source_key: HashMap<String, InvoiceId>,
    pub settings: Option<serde_json::Value>,
}

impl Inner {
    pub fn upsert(&mut self, invoice: Invoice) {
        if let Some(old) = self.invoices.get(&invoice.id) {
            // source_key never changes after intake, but drop a stale index
            // entry if a caller replaced a record wholesale
            if old.source_key != invoice.source_key {
                if let Some(key) = &old.source_key {
                    self.by_source_key.remove(key);
                }
            }
        } else {
            self.order.push(invoice.id);
        }
        if let Some(key) = &invoice.source_key {
            self.by_source_key.insert(key.clone(), invoice.id);
        }
        self.invoices.insert(invoice.id, invoice);
    }

    pub fn remove(&mut self, id: InvoiceId) {
        if let Some(invoice) = self.invoices.remove(&id) {
            if let Some(key) = &invoice.source_key {
                self.by_source_key.remove(key);
            }
            self.order.retain(|other| *other != id);
        }
    }

    pub fn list(&self, filter: &InvoiceFilter) -> Vec<Invoice> {
        self.order
            .iter()
            .filter_map(|id| self.invoices.get(id))
            .filter(|invoice| filter.matches(invoice))
            .cloned()
            .collect()
    }

    pub fn replace_invoices(&mut self, invoices: Vec<Invoice>) {
        self.invoices.clear();
        self.order.clear();
        self.by_source_key.clear();
        for invoice in invoices {
            self.upsert(invoice);
        }
    }
}

/// Pure in-memory backend. State is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn save(&self, invoice: &Invoice) -> Result<()> {
        self.inner.write().upsert(invoice.clone());
        Ok(())
    }

    async fn get(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        Ok(self.inner.read().invoices.get(&id).cloned())
    }

    async fn get_by_source_key(&self, key: &str) -> Result<Option<Invoice>> {
        let inner = self.inner.read();
        Ok(inner
            .by_source_key
            .get(key)
            .and_then(|id| inner.invoices.get(id))
            .cloned())
    }

    async fn list(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        Ok(self.inner.read().list(filter))
    }

    async fn delete(&self, id: InvoiceId) -> Result<()> {
        self.inner.write().remove(id);
        Ok(())
    }

    async fn get_file(&self, id: InvoiceId) -> Result<Option<InvoiceFile>> {
        let inner = self.inner.read();
        Ok(inner.invoices.get(&id).and_then(|invoice| {
            invoice.original_file.as_ref().map(|file| InvoiceFile {
                file_name: invoice.file_name.clone(),
                file_type: invoice.file_type.clone(),
                file: file.clone(),
            })
        }))
    }

    async fn replace_all(&self, entity: Entity, items: Vec<serde_json::Value>) -> Result<()> {
        match entity {
            Entity::Invoices => {
                let invoices = items
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<std::result::Result<Vec<Invoice>, _>>()
                    .map_err(FakturError::Serialization)?;
                self.inner.write().replace_invoices(invoices);
            }
            Entity::Settings => {
                self.inner.write().settings = items.into_iter().next();
            }
        }
        Ok(())
    }

    async fn export_bundle(&self) -> Result<DataBundle> {
        let inner = self.inner.read();
        Ok(DataBundle {
            invoices: inner.list(&InvoiceFilter::default()),
            settings: inner.settings.clone(),
        })
    }

    async fn import_bundle(&self, bundle: &DataBundle) -> Result<()> {
        let mut inner = self.inner.write();
        inner.replace_invoices(bundle.invoices.clone());
        inner.settings = bundle.settings.clone();
        Ok(())
    }

    async fn get_settings(&self) -> Result<Option<serde_json::Value>> {
        Ok(self.inner.read().settings.clone())
    }

    async fn set_settings(&self, settings: &serde_json::Value) -> Result<()> {
        self.inner.write().settings = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktur_core::types::{InvoiceSource, InvoiceStatus};

    fn sample(key: &str) -> Invoice {
        let mut invoice = Invoice::new(InvoiceSource::Storage);
        invoice.source_key = Some(key.to_string());
        invoice
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let store = MemoryStore::new();
        let invoice = sample("local:/a.pdf:1");
        store.save(&invoice).await.unwrap();

        assert_eq!(store.get(invoice.id).await.unwrap().unwrap().id, invoice.id);
        assert_eq!(
            store
                .get_by_source_key("local:/a.pdf:1")
                .await
                .unwrap()
                .unwrap()
                .id,
            invoice.id
        );
        assert!(store.get_by_source_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_insertion_order() {
        let store = MemoryStore::new();
        let a = sample("a");
        let b = sample("b");
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let listed = store.list(&InvoiceFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }

    #[tokio::test]
    async fn test_delete_clears_index() {
        let store = MemoryStore::new();
        let invoice = sample("k");
        store.save(&invoice).await.unwrap();
        store.delete(invoice.id).await.unwrap();

        assert!(store.get(invoice.id).await.unwrap().is_none());
        assert!(store.get_by_source_key("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filter_by_status() {
        let store = MemoryStore::new();
        let mut a = sample("a");
        a.status = InvoiceStatus::Approved;
        let b = sample("b");
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let filter = InvoiceFilter {
            status: Some(InvoiceStatus::Approved),
            ..Default::default()
        };
        let listed = store.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
    }

    #[tokio::test]
    async fn test_get_file() {
        let store = MemoryStore::new();
        let mut invoice = sample("f");
        invoice.original_file = Some(vec![1, 2, 3]);
        invoice.file_name = Some("a.pdf".to_string());
        store.save(&invoice).await.unwrap();

        let file = store.get_file(invoice.id).await.unwrap().unwrap();
        assert_eq!(file.file, vec![1, 2, 3]);
        assert_eq!(file.file_name.as_deref(), Some("a.pdf"));

        let empty = sample("g");
        store.save(&empty).await.unwrap();
        assert!(store.get_file(empty.id).await.unwrap().is_none());
    }
}
