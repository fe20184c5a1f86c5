//! Gmail REST transport.

use super::{MailAttachment, MailTransport};
use crate::oauth;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use faktur_core::error::{FakturError, Result};
use faktur_core::events::EventBus;
use faktur_core::types::OAuthTokens;
use serde::Deserialize;
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

/// Gmail transport over the REST API with bearer auth and one-shot token
/// refresh on 401.
pub struct GmailTransport {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    tokens: Mutex<OAuthTokens>,
    bus: EventBus,
    initial_access_token: String,
}

impl GmailTransport {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        account_id: String,
        tokens: OAuthTokens,
        bus: EventBus,
    ) -> Self {
        Self {
            client,
            base_url,
            account_id,
            initial_access_token: tokens.access_token.clone(),
            tokens: Mutex::new(tokens),
            bus,
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let mut tokens = self.tokens.lock().await;
        let response =
            oauth::get_with_refresh(&self.client, url, &mut tokens, &self.account_id, &self.bus)
                .await?;
        response
            .json()
            .await
            .map_err(|e| FakturError::parse(format!("gmail response: {}", e)))
    }

    fn collect_parts(
        message_id: &str,
        parts: &[Part],
        subject: &Option<String>,
        from: &Option<String>,
        date: &Option<String>,
        out: &mut Vec<MailAttachment>,
    ) {
        for part in parts {
            if let (Some(filename), Some(body)) = (&part.filename, &part.body) {
                if !filename.is_empty() {
                    if let Some(attachment_id) = &body.attachment_id {
                        out.push(MailAttachment {
                            message_id: message_id.to_string(),
                            attachment_id: attachment_id.clone(),
                            file_name: filename.clone(),
                            file_type: part.mime_type.clone(),
                            file_size: body.size,
                            subject: subject.clone(),
                            from: from.clone(),
                            date: date.clone(),
                        });
                    }
                }
            }
            Self::collect_parts(message_id, &part.parts, subject, from, date, out);
        }
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn list_attachments(&self) -> Result<Vec<MailAttachment>> {
        let list: MessageList = serde_json::from_value(
            self.get_json(&format!(
                "{}/gmail/v1/users/me/messages?q=has%3Aattachment&maxResults=25",
                self.base_url
            ))
            .await?,
        )?;

        let mut attachments = Vec::new();
        for message_ref in &list.messages {
            let message: Message = serde_json::from_value(
                self.get_json(&format!(
                    "{}/gmail/v1/users/me/messages/{}?format=full",
                    self.base_url, message_ref.id
                ))
                .await?,
            )?;
            let Some(payload) = message.payload else {
                continue;
            };

            let header = |name: &str| {
                payload
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case(name))
                    .map(|h| h.value.clone())
            };
            let subject = header("Subject");
            let from = header("From");
            let date = header("Date");

            Self::collect_parts(
                &message_ref.id,
                &payload.parts,
                &subject,
                &from,
                &date,
                &mut attachments,
            );
        }
        Ok(attachments)
    }

    async fn download_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let body: AttachmentBody = serde_json::from_value(
            self.get_json(&format!(
                "{}/gmail/v1/users/me/messages/{}/attachments/{}",
                self.base_url, message_id, attachment_id
            ))
            .await?,
        )?;
        // Gmail emits URL-safe base64, padded or not
        URL_SAFE
            .decode(&body.data)
            .or_else(|_| URL_SAFE_NO_PAD.decode(&body.data))
            .map_err(|e| FakturError::parse(format!("gmail attachment data: {}", e)))
    }

    fn updated_tokens(&self) -> Option<OAuthTokens> {
        let tokens = self.tokens.try_lock().ok()?;
        if tokens.access_token != self.initial_access_token {
            Some(tokens.clone())
        } else {
            None
        }
    }
}
