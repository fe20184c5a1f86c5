//! Input normalization for the OCR pipeline.
//!
//! Documents arrive as raw bytes, JSON buffer literals from migrated data,
//! data URLs, or bare base64. Everything is normalized to a byte buffer
//! before dispatch.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;

static BASE64_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]+=*$").unwrap());

/// Normalize a JSON value (migrated store data) to a byte buffer.
pub fn normalize_value(value: &serde_json::Value) -> Vec<u8> {
    match value {
        // {"type": "Buffer", "data": [..]} literal
        serde_json::Value::Object(map)
            if map.get("type").and_then(|t| t.as_str()) == Some("Buffer") =>
        {
            map.get("data")
                .and_then(|d| d.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|n| n.as_u64())
                        .map(|n| n as u8)
                        .collect()
                })
                .unwrap_or_default()
        }
        serde_json::Value::Array(arr) => arr
            .iter()
            .filter_map(|n| n.as_u64())
            .map(|n| n as u8)
            .collect(),
        serde_json::Value::String(s) => normalize_text(s),
        _ => Vec::new(),
    }
}

/// Normalize a textual value: data URL, bare base64, or plain UTF-8.
pub fn normalize_text(s: &str) -> Vec<u8> {
    if let Some(rest) = s.strip_prefix("data:") {
        if let Some((_mime, b64)) = rest.split_once(";base64,") {
            if let Ok(bytes) = BASE64.decode(b64.trim()) {
                return bytes;
            }
        }
    }
    let trimmed = s.trim();
    if trimmed.len() >= 64 && trimmed.len() % 4 == 0 && BASE64_RE.is_match(trimmed) {
        if let Ok(bytes) = BASE64.decode(trimmed) {
            return bytes;
        }
    }
    s.as_bytes().to_vec()
}

/// Normalize stored bytes. Bytes that themselves hold a textual data URL or
/// bare base64 (legacy imports) are decoded; everything else passes through.
pub fn normalize_bytes(bytes: &[u8]) -> Vec<u8> {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.starts_with("data:") => normalize_text(s),
        Ok(s) => {
            let trimmed = s.trim();
            if trimmed.len() >= 64 && trimmed.len() % 4 == 0 && BASE64_RE.is_match(trimmed) {
                normalize_text(s)
            } else {
                bytes.to_vec()
            }
        }
        Err(_) => bytes.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_literal() {
        let value = serde_json::json!({"type": "Buffer", "data": [72, 105]});
        assert_eq!(normalize_value(&value), b"Hi");
    }

    #[test]
    fn test_byte_array() {
        let value = serde_json::json!([1, 2, 3]);
        assert_eq!(normalize_value(&value), vec![1, 2, 3]);
    }

    #[test]
    fn test_data_url() {
        // "hello" base64-encoded
        let bytes = normalize_text("data:text/plain;base64,aGVsbG8=");
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_bare_base64() {
        let payload = vec![0u8; 48];
        let encoded = BASE64.encode(&payload);
        assert!(encoded.len() >= 64);
        assert_eq!(normalize_text(&encoded), payload);
    }

    #[test]
    fn test_short_base64_stays_utf8() {
        // too short for the bare-base64 heuristic
        assert_eq!(normalize_text("aGVsbG8="), b"aGVsbG8=");
    }

    #[test]
    fn test_xml_text_passthrough() {
        let xml = "<?xml version=\"1.0\"?><Faktura></Faktura>";
        assert_eq!(normalize_bytes(xml.as_bytes()), xml.as_bytes());
    }

    #[test]
    fn test_binary_passthrough() {
        let bytes = vec![0xff, 0xd8, 0xff, 0xe0];
        assert_eq!(normalize_bytes(&bytes), bytes);
    }
}
