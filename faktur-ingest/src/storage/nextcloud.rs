//! Nextcloud (WebDAV) driver: stateless `PROPFIND Depth:1` listing with
//! `(href, etag|lastModified)` dedup.

use super::StorageSync;
use crate::candidates::{guess_mime, is_invoice_candidate};
use faktur_core::error::{FakturError, Result};
use faktur_core::types::{IntakeMetadata, StorageConnection};
use once_cell::sync::Lazy;
use regex::Regex;

static RESPONSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z0-9_-]+:)?response(?:\s[^>]*)?>(.*?)</(?:[A-Za-z0-9_-]+:)?response\s*>")
        .unwrap()
});

const PROPFIND_BODY: &str = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:getetag/>
    <d:getlastmodified/>
    <d:getcontentlength/>
    <d:getcontenttype/>
  </d:prop>
</d:propfind>"#;

pub(crate) async fn sync(sync: &StorageSync, conn: &mut StorageConnection) -> Result<usize> {
    let username = conn
        .username
        .clone()
        .ok_or_else(|| FakturError::validation(format!("nextcloud {} has no username", conn.id)))?;
    let password = conn
        .password
        .clone()
        .ok_or_else(|| FakturError::validation(format!("nextcloud {} has no password", conn.id)))?;

    let webdav_url = match &conn.webdav_url {
        Some(url) => url.clone(),
        None => {
            let base = conn.base_url.as_deref().ok_or_else(|| {
                FakturError::validation(format!("nextcloud {} has no base url", conn.id))
            })?;
            format!(
                "{}/remote.php/dav/files/{}/{}",
                base.trim_end_matches('/'),
                username,
                conn.folder_key().trim_matches('/'),
            )
        }
    };

    let method = reqwest::Method::from_bytes(b"PROPFIND")
        .map_err(|e| FakturError::validation(format!("PROPFIND method: {}", e)))?;
    let response = sync
        .client
        .request(method, &webdav_url)
        .basic_auth(&username, Some(&password))
        .header("Depth", "1")
        .header("Content-Type", "application/xml")
        .body(PROPFIND_BODY)
        .send()
        .await
        .map_err(|e| FakturError::transport(format!("nextcloud PROPFIND: {}", e)))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(FakturError::auth(status.as_u16(), "nextcloud PROPFIND"));
    }
    if !status.is_success() {
        return Err(FakturError::transport(format!(
            "nextcloud PROPFIND returned {}",
            status
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|e| FakturError::transport(format!("nextcloud PROPFIND body: {}", e)))?;

    // origin of the WebDAV URL; hrefs in the multistatus are server-absolute
    let origin = {
        let url = reqwest::Url::parse(&webdav_url)
            .map_err(|e| FakturError::validation(format!("nextcloud url: {}", e)))?;
        format!(
            "{}://{}",
            url.scheme(),
            url.host_str().map(|h| match url.port() {
                Some(port) => format!("{}:{}", h, port),
                None => h.to_string(),
            })
            .unwrap_or_default()
        )
    };

    let mut added = 0;
    for caps in RESPONSE_RE.captures_iter(&body) {
        let block = &caps[1];
        let Some(href) = find_tag(block, "href") else {
            continue;
        };
        // collections end with a slash
        if href.ends_with('/') {
            continue;
        }
        let name = href.rsplit('/').next().unwrap_or(&href).to_string();
        if !is_invoice_candidate(&name) {
            continue;
        }

        let etag = find_tag(block, "getetag")
            .map(|e| e.trim_matches('"').to_string())
            .unwrap_or_default();
        let last_modified = find_tag(block, "getlastmodified").unwrap_or_default();
        let version = if etag.is_empty() { &last_modified } else { &etag };
        let source_key = format!("nextcloud:{}:{}:{}", conn.id, href, version);
        if sync.should_skip(&source_key).await {
            continue;
        }

        let file_size = find_tag(block, "getcontentlength").and_then(|v| v.parse().ok());
        let file_type = find_tag(block, "getcontenttype").unwrap_or_else(|| guess_mime(&name));

        let download_url = format!("{}{}", origin, href);
        let response = sync
            .client
            .get(&download_url)
            .basic_auth(&username, Some(&password))
            .send()
            .await
            .map_err(|e| FakturError::transport(format!("nextcloud download: {}", e)))?;
        if !response.status().is_success() {
            return Err(FakturError::transport(format!(
                "nextcloud download returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FakturError::transport(format!("nextcloud download body: {}", e)))?;

        sync.ingest(
            bytes.to_vec(),
            IntakeMetadata {
                file_name: Some(name),
                file_type: Some(file_type),
                file_size,
                source_key: Some(source_key),
                source_path: Some(href),
                ..Default::default()
            },
        )
        .await?;
        added += 1;
    }

    Ok(added)
}

/// Inner text of the first DAV property tag, tolerating namespace prefixes.
fn find_tag(xml: &str, tag: &str) -> Option<String> {
    let escaped = regex::escape(tag);
    let re = Regex::new(&format!(
        r"(?s)<(?:[A-Za-z0-9_-]+:)?{escaped}(?:\s[^>]*)?>(.*?)</(?:[A-Za-z0-9_-]+:)?{escaped}\s*>"
    ))
    .ok()?;
    re.captures(xml).map(|caps| caps[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_tag_with_prefix() {
        let xml = "<d:href>/remote.php/dav/files/jan/faktura.pdf</d:href>";
        assert_eq!(
            find_tag(xml, "href").as_deref(),
            Some("/remote.php/dav/files/jan/faktura.pdf")
        );
    }

    #[test]
    fn test_response_block_split() {
        let body = r#"<d:multistatus xmlns:d="DAV:">
            <d:response><d:href>/a/</d:href></d:response>
            <d:response><d:href>/a/f.pdf</d:href><d:getetag>"abc"</d:getetag></d:response>
        </d:multistatus>"#;
        let blocks: Vec<_> = RESPONSE_RE.captures_iter(body).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(find_tag(&blocks[1][1], "getetag").as_deref(), Some("\"abc\""));
    }
}
