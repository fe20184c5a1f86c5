//! Dropbox driver: paged `list_folder` / `list_folder/continue` with a
//! persisted continuation cursor.

use super::StorageSync;
use crate::candidates::{guess_mime, is_invoice_candidate};
use faktur_core::error::{FakturError, Result};
use faktur_core::types::{IntakeMetadata, StorageConnection, SyncCursor};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct ListFolderPage {
    entries: Vec<Entry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(rename = ".tag")]
    tag: String,
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    path_display: Option<String>,
    #[serde(default)]
    server_modified: Option<String>,
}

pub(crate) async fn sync(sync: &StorageSync, conn: &mut StorageConnection) -> Result<usize> {
    let token = conn
        .oauth
        .as_ref()
        .map(|o| o.access_token.clone())
        .ok_or_else(|| FakturError::validation(format!("dropbox {} has no access token", conn.id)))?;
    let folder = conn.folder_key().to_string();

    let mut cursor = match sync.state.get(&conn.id, &folder) {
        Some(SyncCursor::Dropbox { cursor }) => Some(cursor),
        _ => None,
    };

    let mut added = 0;
    loop {
        let (url, body) = match &cursor {
            Some(c) => (
                format!("{}/2/files/list_folder/continue", sync.endpoints.dropbox_api),
                serde_json::json!({ "cursor": c }),
            ),
            None => (
                format!("{}/2/files/list_folder", sync.endpoints.dropbox_api),
                serde_json::json!({ "path": folder, "recursive": true }),
            ),
        };

        let response = sync
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| FakturError::transport(format!("dropbox list: {}", e)))?;

        let status = response.status();
        if status == StatusCode::CONFLICT && cursor.is_some() {
            // invalid/expired cursor: recover with a fresh full listing
            warn!("dropbox cursor rejected for {}, re-syncing from scratch", conn.id);
            cursor = None;
            sync.state.clear(&conn.id, &folder);
            continue;
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FakturError::auth(status.as_u16(), "dropbox list_folder"));
        }
        if !status.is_success() {
            return Err(FakturError::transport(format!(
                "dropbox list_folder returned {}",
                status
            )));
        }

        let page: ListFolderPage = response
            .json()
            .await
            .map_err(|e| FakturError::parse(format!("dropbox list response: {}", e)))?;

        for entry in &page.entries {
            if entry.tag != "file" || !is_invoice_candidate(&entry.name) {
                continue;
            }
            let provider_id = entry
                .id
                .as_deref()
                .or(entry.path_display.as_deref())
                .unwrap_or(&entry.name);
            let version = entry.server_modified.as_deref().unwrap_or_default();
            let source_key = format!("dropbox:{}:{}:{}", conn.id, provider_id, version);
            if sync.should_skip(&source_key).await {
                continue;
            }

            let bytes = download(sync, &token, provider_id).await?;
            sync.ingest(
                bytes,
                IntakeMetadata {
                    file_name: Some(entry.name.clone()),
                    file_type: Some(guess_mime(&entry.name)),
                    file_size: None,
                    source_key: Some(source_key),
                    source_path: entry.path_display.clone(),
                    ..Default::default()
                },
            )
            .await?;
            added += 1;
        }

        // persist the cursor after every page
        cursor = Some(page.cursor.clone());
        sync.state
            .set(&conn.id, &folder, SyncCursor::Dropbox { cursor: page.cursor });
        if !page.has_more {
            break;
        }
    }

    Ok(added)
}

async fn download(sync: &StorageSync, token: &str, path: &str) -> Result<Vec<u8>> {
    let arg = serde_json::json!({ "path": path }).to_string();
    let response = sync
        .client
        .post(format!("{}/2/files/download", sync.endpoints.dropbox_content))
        .bearer_auth(token)
        .header("Dropbox-API-Arg", arg)
        .send()
        .await
        .map_err(|e| FakturError::transport(format!("dropbox download: {}", e)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FakturError::transport(format!(
            "dropbox download returned {}",
            status
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| FakturError::transport(format!("dropbox download body: {}", e)))?;
    Ok(bytes.to_vec())
}
