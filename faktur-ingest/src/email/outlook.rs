//! Outlook (Microsoft Graph) transport.

use super::{MailAttachment, MailTransport};
use crate::oauth;
use async_trait::async_trait;
use faktur_core::error::{FakturError, Result};
use faktur_core::events::EventBus;
use faktur_core::types::OAuthTokens;
use serde::Deserialize;
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    value: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<From>,
    #[serde(default)]
    received_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct From {
    email_address: Option<EmailAddress>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentList {
    #[serde(default)]
    value: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attachment {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

/// Outlook transport over Graph with bearer auth and one-shot token refresh
/// on 401.
pub struct OutlookTransport {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    tokens: Mutex<OAuthTokens>,
    bus: EventBus,
    initial_access_token: String,
}

impl OutlookTransport {
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

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut tokens = self.tokens.lock().await;
        oauth::get_with_refresh(&self.client, url, &mut tokens, &self.account_id, &self.bus).await
    }
}

#[async_trait]
impl MailTransport for OutlookTransport {
    async fn list_attachments(&self) -> Result<Vec<MailAttachment>> {
        let url = format!(
            "{}/v1.0/me/messages?$filter=hasAttachments%20eq%20true&$top=25&$select=id,subject,from,receivedDateTime",
            self.base_url
        );
        let messages: MessageList = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| FakturError::parse(format!("outlook messages: {}", e)))?;

        let mut attachments = Vec::new();
        for message in &messages.value {
            let url = format!(
                "{}/v1.0/me/messages/{}/attachments?$select=id,name,contentType,size",
                self.base_url, message.id
            );
            let list: AttachmentList = self
                .get(&url)
                .await?
                .json()
                .await
                .map_err(|e| FakturError::parse(format!("outlook attachments: {}", e)))?;

            let from = message
                .from
                .as_ref()
                .and_then(|f| f.email_address.as_ref())
                .and_then(|a| a.address.clone());
            for attachment in list.value {
                let Some(name) = attachment.name else {
                    continue;
                };
                attachments.push(MailAttachment {
                    message_id: message.id.clone(),
                    attachment_id: attachment.id,
                    file_name: name,
                    file_type: attachment.content_type,
                    file_size: attachment.size,
                    subject: message.subject.clone(),
                    from: from.clone(),
                    date: message.received_date_time.clone(),
                });
            }
        }
        Ok(attachments)
    }

    async fn download_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/v1.0/me/messages/{}/attachments/{}/$value",
            self.base_url, message_id, attachment_id
        );
        let bytes = self
            .get(&url)
            .await?
            .bytes()
            .await
            .map_err(|e| FakturError::transport(format!("outlook attachment body: {}", e)))?;
        Ok(bytes.to_vec())
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
