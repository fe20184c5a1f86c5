//! JSON-file invoice store.
//!
//! On-disk format is a top-level JSON array of invoice objects in insertion
//! order, plus a sibling `<name>.settings.json` for the canonical settings
//! document. The file is read once at construction and rewritten on every
//! mutation with an atomic replace (temp file + rename) so a crash mid-write
//! never corrupts the store.

use crate::memory::Inner;
use async_trait::async_trait;
use faktur_core::error::{FakturError, Result};
use faktur_core::id::InvoiceId;
use faktur_core::traits::{DataBundle, Entity, InvoiceFile, InvoiceStore};
use faktur_core::types::{Invoice, InvoiceFilter};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File-backed store with an in-memory working copy.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    settings_path: PathBuf,
    inner: RwLock<Inner>,
}

impl JsonFileStore {
    /// Open (or create) a store at `path`. A corrupt or missing file yields
    /// an empty store; the error is logged, not returned.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings_path = path.with_extension("settings.json");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut inner = Inner::default();
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<Invoice>>(&bytes) {
                Ok(invoices) => inner.replace_invoices(invoices),
                Err(e) => warn!("corrupt invoice file {}: {}", path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot read invoice file {}: {}", path.display(), e),
        }
        match std::fs::read(&settings_path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(settings) => inner.settings = Some(settings),
                Err(e) => warn!("corrupt settings file {}: {}", settings_path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot read settings file {}: {}", settings_path.display(), e),
        }

        Ok(Self {
            path,
            settings_path,
            inner: RwLock::new(inner),
        })
    }

    /// Serialize the invoice array and atomically replace the file.
    fn persist_invoices(&self, inner: &Inner) -> Result<()> {
        let invoices = inner.list(&InvoiceFilter::default());
        let bytes = serde_json::to_vec_pretty(&invoices)?;
        atomic_write(&self.path, &bytes)
    }

    fn persist_settings(&self, inner: &Inner) -> Result<()> {
        match &inner.settings {
            Some(settings) => {
                let bytes = serde_json::to_vec_pretty(settings)?;
                atomic_write(&self.settings_path, &bytes)
            }
            None => Ok(()),
        }
    }
}

/// Write to `<path>.tmp` then rename over the target.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| FakturError::storage(format!("write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| FakturError::storage(format!("rename {}: {}", path.display(), e)))?;
    Ok(())
}

#[async_trait]
impl InvoiceStore for JsonFileStore {
    async fn save(&self, invoice: &Invoice) -> Result<()> {
        let mut inner = self.inner.write();
        inner.upsert(invoice.clone());
        self.persist_invoices(&inner)
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
        let mut inner = self.inner.write();
        inner.remove(id);
        self.persist_invoices(&inner)
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
        let mut inner = self.inner.write();
        match entity {
            Entity::Invoices => {
                let invoices = items
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<std::result::Result<Vec<Invoice>, _>>()
                    .map_err(FakturError::Serialization)?;
                inner.replace_invoices(invoices);
                self.persist_invoices(&inner)
            }
            Entity::Settings => {
                inner.settings = items.into_iter().next();
                self.persist_settings(&inner)
            }
        }
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
        self.persist_invoices(&inner)?;
        self.persist_settings(&inner)
    }

    async fn get_settings(&self) -> Result<Option<serde_json::Value>> {
        Ok(self.inner.read().settings.clone())
    }

    async fn set_settings(&self, settings: &serde_json::Value) -> Result<()> {
        let mut inner = self.inner.write();
        inner.settings = Some(settings.clone());
        self.persist_settings(&inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faktur_core::types::InvoiceSource;

    fn sample(key: &str) -> Invoice {
        let mut invoice = Invoice::new(InvoiceSource::Storage);
        invoice.source_key = Some(key.to_string());
        invoice.original_file = Some(vec![0xde, 0xad, 0xbe, 0xef]);
        invoice
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoices.json");

        let a = sample("a");
        let b = sample("b");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.save(&a).await.unwrap();
            store.save(&b).await.unwrap();
        }

        // fresh instance reads the same set, insertion order preserved
        let store = JsonFileStore::open(&path).unwrap();
        let listed = store.list(&InvoiceFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
        // byte identity of the original file survives the roundtrip
        assert_eq!(listed[0].original_file, Some(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[tokio::test]
    async fn test_corrupt_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoices.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.list(&InvoiceFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoices.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.save(&sample("a")).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoices.json");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store
                .set_settings(&serde_json::json!({"syncState": {"entries": {}}}))
                .await
                .unwrap();
        }
        let store = JsonFileStore::open(&path).unwrap();
        let settings = store.get_settings().await.unwrap().unwrap();
        assert!(settings.get("syncState").is_some());
    }
}
