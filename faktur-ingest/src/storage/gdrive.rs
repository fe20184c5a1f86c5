//! Google Drive driver: `modifiedTime` high-water-mark incremental listing.

use super::StorageSync;
use crate::candidates::{guess_mime, is_invoice_candidate};
use crate::oauth;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use faktur_core::error::{FakturError, Result};
use faktur_core::types::{IntakeMetadata, StorageConnection, SyncCursor};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    modified_time: Option<String>,
    #[serde(default)]
    size: Option<String>,
}

pub(crate) async fn sync(sync: &StorageSync, conn: &mut StorageConnection) -> Result<usize> {
    let connection_id = conn.id.clone();
    let folder = conn.folder_key().to_string();
    let tokens = conn
        .oauth
        .as_mut()
        .ok_or_else(|| FakturError::validation(format!("gdrive {} has no credentials", connection_id)))?;

    let since = match sync.state.get(&connection_id, &folder) {
        Some(SyncCursor::Gdrive { since }) => Some(since),
        _ => None,
    };

    let mut query = format!("'{}' in parents and trashed=false", folder);
    if let Some(since) = &since {
        query.push_str(&format!(" and modifiedTime > '{}'", since));
    }

    let mut page_token: Option<String> = None;
    let mut max_modified: Option<DateTime<Utc>> = None;
    let mut added = 0;

    loop {
        let mut params = vec![
            ("q".to_string(), query.clone()),
            (
                "fields".to_string(),
                "nextPageToken,files(id,name,modifiedTime,size)".to_string(),
            ),
            ("pageSize".to_string(), "100".to_string()),
        ];
        if let Some(token) = &page_token {
            params.push(("pageToken".to_string(), token.clone()));
        }
        let url = reqwest::Url::parse_with_params(
            &format!("{}/drive/v3/files", sync.endpoints.gdrive),
            &params,
        )
        .map_err(|e| FakturError::validation(format!("gdrive url: {}", e)))?;

        let response =
            oauth::get_with_refresh(&sync.client, url.as_str(), tokens, &connection_id, &sync.bus)
                .await?;
        let page: FileList = response
            .json()
            .await
            .map_err(|e| FakturError::parse(format!("gdrive file list: {}", e)))?;

        for file in &page.files {
            if let Some(modified) = file
                .modified_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            {
                let modified = modified.with_timezone(&Utc);
                if max_modified.is_none_or(|current| modified > current) {
                    max_modified = Some(modified);
                }
            }
            if !is_invoice_candidate(&file.name) {
                continue;
            }

            let version = file.modified_time.as_deref().unwrap_or_default();
            let source_key = format!("gdrive:{}:{}:{}", connection_id, file.id, version);
            if sync.should_skip(&source_key).await {
                continue;
            }

            let download_url =
                format!("{}/drive/v3/files/{}?alt=media", sync.endpoints.gdrive, file.id);
            let response = oauth::get_with_refresh(
                &sync.client,
                &download_url,
                tokens,
                &connection_id,
                &sync.bus,
            )
            .await?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| FakturError::transport(format!("gdrive download: {}", e)))?;

            sync.ingest(
                bytes.to_vec(),
                IntakeMetadata {
                    file_name: Some(file.name.clone()),
                    file_type: Some(guess_mime(&file.name)),
                    file_size: file.size.as_deref().and_then(|s| s.parse().ok()),
                    source_key: Some(source_key),
                    ..Default::default()
                },
            )
            .await?;
            added += 1;
        }

        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    // one second of slack tolerates provider clock skew
    if let Some(max) = max_modified {
        let since = (max - ChronoDuration::seconds(1)).to_rfc3339_opts(SecondsFormat::Millis, true);
        sync.state
            .set(&connection_id, &folder, SyncCursor::Gdrive { since });
    }

    Ok(added)
}
