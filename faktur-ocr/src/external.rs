//! External HTTP OCR driver.
//!
//! Posts `{base64, fileType, fileName}` as JSON to a configured endpoint and
//! reads `text` (fallback `rawText`) from the JSON response. The `mock://`
//! scheme short-circuits to the configured mock text for testing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use faktur_core::config::OcrConfig;
use faktur_core::error::{FakturError, Result};
use serde::Serialize;
use std::time::Duration;

/// Curated endpoints for well-known OCR APIs, selectable by preset name.
pub const PRESETS: &[(&str, &str)] = &[
    ("google-vision", "https://vision.googleapis.com/v1/images:annotate"),
    (
        "azure-read",
        "https://westeurope.api.cognitive.microsoft.com/vision/v3.2/read/analyze",
    ),
    ("ocr-space", "https://api.ocr.space/parse/image"),
    (
        "mindee",
        "https://api.mindee.net/v1/products/mindee/invoices/v4/predict",
    ),
    ("nanonets", "https://app.nanonets.com/api/v2/OCR/FullText"),
    ("abbyy", "https://cloud-eu.ocrsdk.com/v2/processImage"),
];

/// Resolve a preset name to its endpoint URL.
pub fn preset_url(name: &str) -> Option<&'static str> {
    PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, url)| *url)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OcrRequest<'a> {
    base64: String,
    file_type: Option<&'a str>,
    file_name: Option<&'a str>,
}

/// HTTP OCR client.
pub struct ExternalOcr {
    client: reqwest::Client,
    config: OcrConfig,
}

impl ExternalOcr {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Send the document to the configured endpoint and return the
    /// recognized text.
    pub async fn recognize(
        &self,
        bytes: &[u8],
        file_type: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<String> {
        let url = self
            .config
            .external_url
            .as_deref()
            .map(|u| preset_url(u).unwrap_or(u))
            .ok_or_else(|| FakturError::config("external OCR URL not configured"))?;

        if url.starts_with("mock://") {
            return Ok(self.config.mock_text.clone().unwrap_or_default());
        }

        let body = OcrRequest {
            base64: BASE64.encode(bytes),
            file_type,
            file_name,
        };

        let mut request = self
            .client
            .post(url)
            .timeout(Duration::from_secs(self.config.external_timeout_secs))
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FakturError::transport(format!("OCR API: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FakturError::transport(format!(
                "OCR API returned {}",
                status
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FakturError::parse(format!("OCR API response: {}", e)))?;
        json.get("text")
            .or_else(|| json.get("rawText"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| FakturError::parse("OCR API response has no text field".to_string()))
    }
}
