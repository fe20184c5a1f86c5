//! Watched local folder driver.
//!
//! Folders are read non-recursively each tick. The source key binds the
//! absolute path to the modification time in milliseconds, so a file saved
//! again with new content is picked up as a new invoice.

use super::StorageSync;
use crate::candidates::{guess_mime, is_invoice_candidate};
use faktur_core::error::Result;
use faktur_core::types::IntakeMetadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

pub(crate) async fn sync_folder(sync: &StorageSync, folder: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(folder).await?;
    let mut added = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_invoice_candidate(&name) {
            continue;
        }

        let path = entry.path();
        let mtime_millis = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let source_key = format!("local:{}:{}", path.display(), mtime_millis);
        if sync.should_skip(&source_key).await {
            continue;
        }

        let bytes = tokio::fs::read(&path).await?;
        sync.ingest(
            bytes,
            IntakeMetadata {
                file_name: Some(name.clone()),
                file_type: Some(guess_mime(&name)),
                file_size: Some(metadata.len()),
                source_key: Some(source_key),
                source_path: Some(path.display().to_string()),
                ..Default::default()
            },
        )
        .await?;
        added += 1;
    }

    Ok(added)
}
