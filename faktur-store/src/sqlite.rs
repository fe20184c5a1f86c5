//! SQLite invoice store.
//!
//! One row per invoice with the file blob in its own column; the settings
//! document lives in a `(key, value)` table under a single well-known key.

use async_trait::async_trait;
use faktur_core::error::{FakturError, Result};
use faktur_core::id::InvoiceId;
use faktur_core::traits::{DataBundle, Entity, InvoiceFile, InvoiceStore};
use faktur_core::types::{Invoice, InvoiceFilter};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

const SETTINGS_KEY: &str = "settings";

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and run the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| FakturError::storage(format!("connect {}: {}", path.display(), e)))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| FakturError::storage(format!("connect :memory:: {}", e)))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY NOT NULL,
                source_key TEXT UNIQUE,
                status TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL,
                original_file BLOB
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FakturError::storage(format!("create invoices table: {}", e)))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FakturError::storage(format!("create settings table: {}", e)))?;

        Ok(())
    }

    fn encode(invoice: &Invoice) -> Result<(String, Option<Vec<u8>>)> {
        // the blob travels in its own column; everything else as JSON
        let mut record = invoice.clone();
        let file = record.original_file.take();
        let data = serde_json::to_string(&record)?;
        Ok((data, file))
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Invoice> {
        let data: String = row.get("data");
        let file: Option<Vec<u8>> = row.get("original_file");
        let mut invoice: Invoice = serde_json::from_str(&data)?;
        invoice.original_file = file;
        Ok(invoice)
    }

    async fn insert_row(&self, invoice: &Invoice) -> Result<()> {
        let (data, file) = Self::encode(invoice)?;
        sqlx::query(
            r"
            INSERT INTO invoices (id, source_key, status, source, created_at, data, original_file)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                source_key = excluded.source_key,
                status = excluded.status,
                source = excluded.source,
                created_at = excluded.created_at,
                data = excluded.data,
                original_file = excluded.original_file
            ",
        )
        .bind(invoice.id.to_string())
        .bind(&invoice.source_key)
        .bind(invoice.status.as_str())
        .bind(invoice.source.as_str())
        .bind(invoice.created_at.to_rfc3339())
        .bind(data)
        .bind(file)
        .execute(&self.pool)
        .await
        .map_err(|e| FakturError::storage(format!("save invoice: {}", e)))?;
        Ok(())
    }

    async fn all_invoices(&self) -> Result<Vec<Invoice>> {
        let rows = sqlx::query("SELECT data, original_file FROM invoices ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FakturError::storage(format!("list invoices: {}", e)))?;
        rows.iter().map(Self::decode).collect()
    }
}

#[async_trait]
impl InvoiceStore for SqliteStore {
    async fn save(&self, invoice: &Invoice) -> Result<()> {
        self.insert_row(invoice).await
    }

    async fn get(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        let row = sqlx::query("SELECT data, original_file FROM invoices WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FakturError::storage(format!("get invoice: {}", e)))?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn get_by_source_key(&self, key: &str) -> Result<Option<Invoice>> {
        let row = sqlx::query("SELECT data, original_file FROM invoices WHERE source_key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FakturError::storage(format!("get by source key: {}", e)))?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn list(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        // small single-tenant data set; filter the decoded rows
        Ok(self
            .all_invoices()
            .await?
            .into_iter()
            .filter(|invoice| filter.matches(invoice))
            .collect())
    }

    async fn delete(&self, id: InvoiceId) -> Result<()> {
        sqlx::query("DELETE FROM invoices WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| FakturError::storage(format!("delete invoice: {}", e)))?;
        Ok(())
    }

    async fn get_file(&self, id: InvoiceId) -> Result<Option<InvoiceFile>> {
        let row =
            sqlx::query("SELECT data, original_file FROM invoices WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| FakturError::storage(format!("get file: {}", e)))?;
        let Some(row) = row else { return Ok(None) };
        let invoice = Self::decode(&row)?;
        Ok(invoice.original_file.map(|file| InvoiceFile {
            file_name: invoice.file_name,
            file_type: invoice.file_type,
            file,
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
                sqlx::query("DELETE FROM invoices")
                    .execute(&self.pool)
                    .await
                    .map_err(|e| FakturError::storage(format!("clear invoices: {}", e)))?;
                for invoice in &invoices {
                    self.insert_row(invoice).await?;
                }
            }
            Entity::Settings => {
                if let Some(settings) = items.into_iter().next() {
                    self.set_settings(&settings).await?;
                }
            }
        }
        Ok(())
    }

    async fn export_bundle(&self) -> Result<DataBundle> {
        Ok(DataBundle {
            invoices: self.all_invoices().await?,
            settings: self.get_settings().await?,
        })
    }

    async fn import_bundle(&self, bundle: &DataBundle) -> Result<()> {
        sqlx::query("DELETE FROM invoices")
            .execute(&self.pool)
            .await
            .map_err(|e| FakturError::storage(format!("clear invoices: {}", e)))?;
        for invoice in &bundle.invoices {
            self.insert_row(invoice).await?;
        }
        if let Some(settings) = &bundle.settings {
            self.set_settings(settings).await?;
        }
        Ok(())
    }

    async fn get_settings(&self) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?1")
            .bind(SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FakturError::storage(format!("get settings: {}", e)))?;
        match row {
            Some(row) => {
                let value: String = row.get("value");
                Ok(Some(serde_json::from_str(&value)?))
            }
            None => Ok(None),
        }
    }

    async fn set_settings(&self, settings: &serde_json::Value) -> Result<()> {
        let value = serde_json::to_string(settings)?;
        sqlx::query(
            r"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(SETTINGS_KEY)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| FakturError::storage(format!("set settings: {}", e)))?;
        Ok(())
    }
}
