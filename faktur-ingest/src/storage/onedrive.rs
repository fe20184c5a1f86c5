//! OneDrive driver: Graph API delta-link incremental listing.

use super::StorageSync;
use crate::candidates::{guess_mime, is_invoice_candidate};
use crate::oauth;
use faktur_core::error::{FakturError, Result};
use faktur_core::types::{IntakeMetadata, StorageConnection, SyncCursor};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct DeltaPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink", default)]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    e_tag: Option<String>,
    #[serde(default)]
    last_modified_date_time: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    folder: Option<serde_json::Value>,
    #[serde(default)]
    deleted: Option<serde_json::Value>,
}

pub(crate) async fn sync(sync: &StorageSync, conn: &mut StorageConnection) -> Result<usize> {
    let connection_id = conn.id.clone();
    let folder = conn.folder_key().to_string();
    let tokens = conn.oauth.as_mut().ok_or_else(|| {
        FakturError::validation(format!("onedrive {} has no credentials", connection_id))
    })?;

    let mut url = match sync.state.get(&connection_id, &folder) {
        Some(SyncCursor::Onedrive { delta_link }) => delta_link,
        _ => format!(
            "{}/v1.0/me/drive/items/{}/delta",
            sync.endpoints.onedrive, folder
        ),
    };

    let mut added = 0;
    loop {
        let response =
            oauth::get_with_refresh(&sync.client, &url, tokens, &connection_id, &sync.bus).await?;
        let page: DeltaPage = response
            .json()
            .await
            .map_err(|e| FakturError::parse(format!("onedrive delta: {}", e)))?;

        for item in &page.value {
            if item.folder.is_some() || item.deleted.is_some() {
                continue;
            }
            let Some(name) = item.name.as_deref() else {
                continue;
            };
            if !is_invoice_candidate(name) {
                continue;
            }

            let version = item
                .e_tag
                .as_deref()
                .or(item.last_modified_date_time.as_deref())
                .unwrap_or_default();
            let source_key = format!("onedrive:{}:{}:{}", connection_id, item.id, version);
            if sync.should_skip(&source_key).await {
                continue;
            }

            let download_url = format!(
                "{}/v1.0/me/drive/items/{}/content",
                sync.endpoints.onedrive, item.id
            );
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
                .map_err(|e| FakturError::transport(format!("onedrive download: {}", e)))?;

            sync.ingest(
                bytes.to_vec(),
                IntakeMetadata {
                    file_name: Some(name.to_string()),
                    file_type: Some(guess_mime(name)),
                    file_size: item.size,
                    source_key: Some(source_key),
                    ..Default::default()
                },
            )
            .await?;
            added += 1;
        }

        if let Some(next) = page.next_link {
            url = next;
            continue;
        }
        if let Some(delta) = page.delta_link {
            sync.state
                .set(&connection_id, &folder, SyncCursor::Onedrive { delta_link: delta });
        }
        break;
    }

    Ok(added)
}
