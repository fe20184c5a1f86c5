//! Integration tests for the mailbox watcher.

mod common;

use async_trait::async_trait;
use common::TestSink;
use faktur_core::config::{EmailConfig, HttpConfig};
use faktur_core::error::Result;
use faktur_core::events::EventBus;
use faktur_core::types::{EmailAccount, EmailProvider, OAuthTokens};
use faktur_ingest::email::{EmailEndpoints, EmailWatcher, MailAttachment, MailTransport};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn oauth(token: &str) -> OAuthTokens {
    OAuthTokens {
        access_token: token.to_string(),
        refresh_token: Some("r1".to_string()),
        expires_at: None,
        client_id: "cid".to_string(),
        client_secret: None,
        token_url: "unused".to_string(),
    }
}

fn watcher_for(
    accounts: Vec<EmailAccount>,
    endpoints: EmailEndpoints,
) -> (Arc<EmailWatcher>, Arc<TestSink>) {
    let sink = Arc::new(TestSink::new());
    let config = EmailConfig {
        poll_interval_secs: 300,
        accounts,
    };
    let watcher = Arc::new(
        EmailWatcher::new(config, HttpConfig::default(), sink.clone(), EventBus::new())
            .with_endpoints(endpoints),
    );
    (watcher, sink)
}

// ============================================================================
// IMAP (external transport contract)
// ============================================================================

struct FixedTransport {
    attachments: Vec<MailAttachment>,
}

#[async_trait]
impl MailTransport for FixedTransport {
    async fn list_attachments(&self) -> Result<Vec<MailAttachment>> {
        Ok(self.attachments.clone())
    }

    async fn download_attachment(&self, _message_id: &str, _attachment_id: &str) -> Result<Vec<u8>> {
        Ok(b"%PDF-1.7".to_vec())
    }
}

#[tokio::test]
async fn test_imap_transport_contract() {
    let account = EmailAccount {
        id: "imap1".to_string(),
        provider: EmailProvider::Imap,
        enabled: true,
        imap: None,
        oauth: None,
    };
    let (watcher, sink) = watcher_for(vec![account], EmailEndpoints::default());
    watcher.register_transport(
        "imap1",
        Arc::new(FixedTransport {
            attachments: vec![
                MailAttachment {
                    message_id: "m1".to_string(),
                    attachment_id: "a1".to_string(),
                    file_name: "faktura.pdf".to_string(),
                    file_type: Some("application/pdf".to_string()),
                    file_size: Some(8),
                    subject: Some("Faktura za styczeń".to_string()),
                    from: Some("biuro@example.pl".to_string()),
                    date: Some("2026-01-15".to_string()),
                },
                MailAttachment {
                    message_id: "m1".to_string(),
                    attachment_id: "a2".to_string(),
                    file_name: "logo.gif".to_string(),
                    file_type: None,
                    file_size: None,
                    subject: None,
                    from: None,
                    date: None,
                },
            ],
        }),
    );

    assert_eq!(watcher.run_once().await, 1);
    // second pass re-lists the same messages; nothing new
    assert_eq!(watcher.run_once().await, 0);
    assert_eq!(sink.count(), 1);

    let invoice = &sink.invoices()[0];
    assert_eq!(invoice.source_key.as_deref(), Some("email:m1:faktura.pdf"));
    assert_eq!(invoice.email_subject.as_deref(), Some("Faktura za styczeń"));
    assert_eq!(invoice.email_from.as_deref(), Some("biuro@example.pl"));
}

#[tokio::test]
async fn test_imap_without_transport_is_skipped() {
    let account = EmailAccount {
        id: "imap-unbound".to_string(),
        provider: EmailProvider::Imap,
        enabled: true,
        imap: None,
        oauth: None,
    };
    let (watcher, sink) = watcher_for(vec![account], EmailEndpoints::default());
    // swallowed per-account error, no panic
    assert_eq!(watcher.run_once().await, 0);
    assert_eq!(sink.count(), 0);
}

// ============================================================================
// Gmail
// ============================================================================

#[tokio::test]
async fn test_gmail_attachment_flow() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(header("authorization", "Bearer g-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [{"id": "m1"}],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "payload": {
                "headers": [
                    {"name": "Subject", "value": "FV 2026/01"},
                    {"name": "From", "value": "ksiegowa@example.pl"},
                    {"name": "Date", "value": "Thu, 15 Jan 2026 10:00:00 +0100"},
                ],
                "parts": [
                    {"filename": "", "mimeType": "text/plain", "body": {"size": 10}},
                    {
                        "filename": "skan.jpg",
                        "mimeType": "image/jpeg",
                        "body": {"attachmentId": "a9", "size": 4},
                    },
                ],
            },
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m1/attachments/a9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            // URL-safe base64 of "jpeg"
            "data": "anBlZw==",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let account = EmailAccount {
        id: "gmail1".to_string(),
        provider: EmailProvider::Gmail,
        enabled: true,
        imap: None,
        oauth: Some(oauth("g-token")),
    };
    let endpoints = EmailEndpoints {
        gmail: server.uri(),
        outlook: server.uri(),
    };
    let (watcher, sink) = watcher_for(vec![account], endpoints);

    assert_eq!(watcher.run_once().await, 1);
    assert_eq!(watcher.run_once().await, 0);

    let invoice = &sink.invoices()[0];
    assert_eq!(invoice.source_key.as_deref(), Some("email:m1:skan.jpg"));
    assert_eq!(invoice.original_file.as_deref(), Some(b"jpeg".as_ref()));
    assert_eq!(invoice.email_subject.as_deref(), Some("FV 2026/01"));
}

// ============================================================================
// Outlook
// ============================================================================

#[tokio::test]
async fn test_outlook_attachment_flow() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/me/messages"))
        .and(header("authorization", "Bearer o-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{
                "id": "msg7",
                "subject": "Rachunek",
                "from": {"emailAddress": {"address": "firma@example.com"}},
                "receivedDateTime": "2026-01-20T08:30:00Z",
            }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me/messages/msg7/attachments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{
                "id": "att1",
                "name": "rachunek.png",
                "contentType": "image/png",
                "size": 3,
            }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me/messages/msg7/attachments/att1/$value"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let account = EmailAccount {
        id: "outlook1".to_string(),
        provider: EmailProvider::Outlook,
        enabled: true,
        imap: None,
        oauth: Some(oauth("o-token")),
    };
    let endpoints = EmailEndpoints {
        gmail: server.uri(),
        outlook: server.uri(),
    };
    let (watcher, sink) = watcher_for(vec![account], endpoints);

    assert_eq!(watcher.run_once().await, 1);
    assert_eq!(watcher.run_once().await, 0);

    let invoice = &sink.invoices()[0];
    assert_eq!(invoice.source_key.as_deref(), Some("email:msg7:rachunek.png"));
    assert_eq!(invoice.email_from.as_deref(), Some("firma@example.com"));
    assert_eq!(invoice.email_date.as_deref(), Some("2026-01-20T08:30:00Z"));
}
