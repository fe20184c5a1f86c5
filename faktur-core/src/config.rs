//! Configuration for the faktur daemon.
//!
//! Configuration is loaded from a TOML file and can be overridden with
//! `FAKTUR_`-prefixed environment variables. Every default mirrors the
//! documented behavior of the pipeline (poll intervals, subprocess
//! timeouts, PDF rasterization limits).

use crate::error::{FakturError, Result};
use crate::types::{EmailAccount, StorageConnection, SuggestionRule};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "FAKTUR_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "FAKTUR_LOG_LEVEL";
pub const ENV_STORE_BACKEND: &str = "FAKTUR_STORE_BACKEND";
pub const ENV_STORE_PATH: &str = "FAKTUR_STORE_PATH";
pub const ENV_OCR_PROVIDER: &str = "FAKTUR_OCR_PROVIDER";
pub const ENV_KSEF_TOKEN: &str = "FAKTUR_KSEF_TOKEN";

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Json,
    Sqlite,
}

/// OCR provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OcrProvider {
    #[default]
    Tesseract,
    GoogleVision,
    AzureOcr,
    ExternalApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            path: PathBuf::from("faktur-data/invoices.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between storage sync runs
    pub poll_interval_secs: u64,
    /// Watched local folders, read non-recursively each tick
    pub local_folders: Vec<PathBuf>,
    pub connections: Vec<StorageConnection>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            local_folders: Vec::new(),
            connections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub poll_interval_secs: u64,
    pub accounts: Vec<EmailAccount>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KsefConfig {
    pub enabled: bool,
    pub base_url: String,
    pub access_token: Option<String>,
    pub poll_interval_secs: u64,
}

impl Default for KsefConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://ksef.mf.gov.pl/api".to_string(),
            access_token: None,
            poll_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub provider: OcrProvider,
    pub lang: String,
    pub psm: u8,
    pub oem: u8,
    /// Wall-clock kill timeout for one tesseract invocation
    pub timeout_secs: u64,
    pub pdf_dpi: u32,
    pub pdf_timeout_secs: u64,
    pub pdf_max_pages: usize,
    /// External OCR endpoint; `mock://` short-circuits to `mock_text`
    pub external_url: Option<String>,
    pub external_timeout_secs: u64,
    pub api_key: Option<String>,
    pub mock_text: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: OcrProvider::Tesseract,
            lang: "pol".to_string(),
            psm: 3,
            oem: 1,
            timeout_secs: 60,
            pdf_dpi: 200,
            pdf_timeout_secs: 120,
            pdf_max_pages: 30,
            external_url: None,
            external_timeout_secs: 60,
            api_key: None,
            mock_text: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DescribeConfig {
    pub rules: Vec<SuggestionRule>,
    pub ai_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Default timeout for outbound provider calls
    pub timeout_secs: u64,
    /// Short timeout for status probes
    pub probe_timeout_millis: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            probe_timeout_millis: 1200,
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub email: EmailConfig,
    pub ksef: KsefConfig,
    pub ocr: OcrConfig,
    pub describe: DescribeConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FakturError::config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: AppConfig = toml::from_str(&text)
            .map_err(|e| FakturError::config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no config file exists.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(backend) = std::env::var(ENV_STORE_BACKEND) {
            match backend.as_str() {
                "memory" => self.store.backend = StoreBackend::Memory,
                "json" => self.store.backend = StoreBackend::Json,
                "sqlite" => self.store.backend = StoreBackend::Sqlite,
                other => tracing::warn!("ignoring unknown {}={}", ENV_STORE_BACKEND, other),
            }
        }
        if let Ok(path) = std::env::var(ENV_STORE_PATH) {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(provider) = std::env::var(ENV_OCR_PROVIDER) {
            match provider.as_str() {
                "tesseract" => self.ocr.provider = OcrProvider::Tesseract,
                "google-vision" => self.ocr.provider = OcrProvider::GoogleVision,
                "azure-ocr" => self.ocr.provider = OcrProvider::AzureOcr,
                "external-api" => self.ocr.provider = OcrProvider::ExternalApi,
                other => tracing::warn!("ignoring unknown {}={}", ENV_OCR_PROVIDER, other),
            }
        }
        if let Ok(token) = std::env::var(ENV_KSEF_TOKEN) {
            self.ksef.access_token = Some(token);
            self.ksef.enabled = true;
        }
    }
}
