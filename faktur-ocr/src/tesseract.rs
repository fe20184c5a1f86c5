//! Tesseract subprocess driver with the pdftoppm fallback chain for PDFs.
//!
//! Invocations are argument vectors only. Every run gets its own uniquely
//! named temporary directory which is removed when the run finishes,
//! successful or not. Timeouts are wall-clock kills; partial stdout from a
//! timed-out process is discarded.

use faktur_core::config::OcrConfig;
use faktur_core::error::{FakturError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Internal failure classification: a spawn failure must not trigger the
/// PDF fallback, a run failure must.
enum RunError {
    Spawn(String),
    Failed(String),
    Timeout(String),
}

impl From<RunError> for FakturError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Spawn(msg) | RunError::Failed(msg) | RunError::Timeout(msg) => {
                FakturError::subprocess(msg)
            }
        }
    }
}

/// OCR driver shelling out to the `tesseract` binary.
pub struct TesseractOcr {
    config: OcrConfig,
    tesseract_bin: String,
    pdftoppm_bin: String,
}

impl TesseractOcr {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            config,
            tesseract_bin: "tesseract".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
        }
    }

    /// Override binary names (tests).
    pub fn with_binaries(
        mut self,
        tesseract: impl Into<String>,
        pdftoppm: impl Into<String>,
    ) -> Self {
        self.tesseract_bin = tesseract.into();
        self.pdftoppm_bin = pdftoppm.into();
        self
    }

    /// Run OCR over a document, falling back to per-page rasterization for
    /// PDFs that tesseract cannot consume directly.
    pub async fn recognize(&self, bytes: &[u8], file_type: Option<&str>) -> Result<String> {
        let dir = tempfile::Builder::new()
            .prefix("faktur-ocr-")
            .tempdir()
            .map_err(|e| FakturError::subprocess(format!("cannot create temp dir: {}", e)))?;

        let ext = extension_for(file_type);
        let input = dir.path().join(format!("input{}", ext));
        tokio::fs::write(&input, bytes).await?;

        match self.run_tesseract(&input).await {
            Ok(text) => Ok(text),
            Err(RunError::Failed(msg)) if ext == ".pdf" => {
                debug!("tesseract failed on pdf ({}), trying pdftoppm fallback", msg);
                self.pdf_fallback(dir.path(), &input).await
            }
            Err(err) => Err(err.into()),
        }
        // temp dir removed on drop
    }

    async fn run_tesseract(&self, input: &Path) -> std::result::Result<String, RunError> {
        let psm = self.config.psm.to_string();
        let oem = self.config.oem.to_string();

        let mut cmd = Command::new(&self.tesseract_bin);
        cmd.arg(input)
            .arg("stdout")
            .args(["-l", &self.config.lang, "--psm", &psm, "--oem", &oem])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| spawn_error(&self.tesseract_bin, &e))?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(RunError::Failed(format!("tesseract: {}", e))),
            // dropping the future kills the child; partial stdout discarded
            Err(_) => {
                return Err(RunError::Timeout(format!(
                    "tesseract (timeout) after {}s",
                    self.config.timeout_secs
                )));
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RunError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }

    /// Rasterize the PDF with pdftoppm and OCR each page image.
    async fn pdf_fallback(&self, dir: &Path, input: &Path) -> Result<String> {
        let prefix = dir.join("page");

        let mut cmd = Command::new(&self.pdftoppm_bin);
        cmd.args(["-png", "-r", &self.config.pdf_dpi.to_string()])
            .arg(input)
            .arg(&prefix)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| FakturError::from(spawn_error(&self.pdftoppm_bin, &e)))?;

        let timeout = Duration::from_secs(self.config.pdf_timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(FakturError::subprocess(format!("pdftoppm: {}", e))),
            Err(_) => {
                return Err(FakturError::subprocess(format!(
                    "pdftoppm (timeout) after {}s",
                    self.config.pdf_timeout_secs
                )));
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FakturError::subprocess(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let mut pages = list_page_images(dir).await?;
        pages.truncate(self.config.pdf_max_pages);
        if pages.is_empty() {
            return Err(FakturError::subprocess(
                "pdftoppm produced no page images".to_string(),
            ));
        }
        debug!("pdftoppm produced {} page image(s)", pages.len());

        let mut texts = Vec::with_capacity(pages.len());
        for page in &pages {
            let text = self.run_tesseract(page).await.map_err(FakturError::from)?;
            texts.push(text);
        }
        Ok(texts.join("\n"))
    }
}

fn spawn_error(binary: &str, err: &std::io::Error) -> RunError {
    if err.kind() == std::io::ErrorKind::NotFound {
        RunError::Spawn(format!(
            "{} binary not found - install it and make sure it is on PATH",
            binary
        ))
    } else {
        RunError::Spawn(format!("cannot spawn {}: {}", binary, err))
    }
}

/// `page-NNN.png` images in numeric order.
async fn list_page_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(number) = page_number(&name) {
            pages.push((number, entry.path()));
        }
    }
    pages.sort_by_key(|(number, _)| *number);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

/// Numeric suffix of a `page-NNN.png` file name.
fn page_number(name: &str) -> Option<u32> {
    name.strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

/// Temp-file extension inferred from the MIME type.
fn extension_for(file_type: Option<&str>) -> &'static str {
    match file_type {
        Some(t) if t.contains("pdf") => ".pdf",
        Some(t) if t.contains("png") => ".png",
        Some(t) if t.contains("jpg") || t.contains("jpeg") => ".jpg",
        Some(t) if t.contains("tif") => ".tif",
        _ => ".bin",
    }
}
