//! Mailbox watcher.
//!
//! IMAP transport is an external collaborator consumed through the
//! `MailTransport` contract; Gmail and Outlook transports are built in over
//! their REST APIs. Each attachment of interest yields one intake with
//! `email:<messageId>:<fileName>` as the dedup key.

pub mod gmail;
pub mod outlook;

use crate::candidates::is_invoice_candidate;
use crate::poller::spawn_poller;
use async_trait::async_trait;
use faktur_core::config::{EmailConfig, HttpConfig};
use faktur_core::error::{FakturError, Result};
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::traits::IntakeSink;
use faktur_core::types::{EmailAccount, EmailProvider, IntakeMetadata, InvoiceSource, OAuthTokens};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One attachment of interest listed from a mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct MailAttachment {
    pub message_id: String,
    pub attachment_id: String,
    pub file_name: String,
    pub file_type: Option<String>,
    pub file_size: Option<u64>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<String>,
}

/// Contract a mailbox transport must provide.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Recent messages' attachments worth looking at.
    async fn list_attachments(&self) -> Result<Vec<MailAttachment>>;

    /// Raw bytes of one attachment.
    async fn download_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;

    /// Tokens refreshed during this transport's lifetime, if any.
    fn updated_tokens(&self) -> Option<OAuthTokens> {
        None
    }
}

/// REST endpoints, overridable for tests.
#[derive(Debug, Clone)]
pub struct EmailEndpoints {
    pub gmail: String,
    pub outlook: String,
}

impl Default for EmailEndpoints {
    fn default() -> Self {
        Self {
            gmail: "https://gmail.googleapis.com".to_string(),
            outlook: "https://graph.microsoft.com".to_string(),
        }
    }
}

/// The mailbox poller.
pub struct EmailWatcher {
    client: reqwest::Client,
    sink: Arc<dyn IntakeSink>,
    bus: EventBus,
    endpoints: EmailEndpoints,
    accounts: RwLock<Vec<EmailAccount>>,
    /// Externally registered transports (IMAP), keyed by account id
    transports: RwLock<HashMap<String, Arc<dyn MailTransport>>>,
    poll_interval: Duration,
    processed: Mutex<HashSet<String>>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EmailWatcher {
    pub fn new(
        config: EmailConfig,
        http: HttpConfig,
        sink: Arc<dyn IntakeSink>,
        bus: EventBus,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .connect_timeout(Duration::from_millis(http.probe_timeout_millis))
            .build()
            .unwrap_or_default();
        Self {
            client,
            sink,
            bus,
            endpoints: EmailEndpoints::default(),
            accounts: RwLock::new(config.accounts),
            transports: RwLock::new(HashMap::new()),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            processed: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Override REST endpoints (tests).
    pub fn with_endpoints(mut self, endpoints: EmailEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Register an external transport for an IMAP account.
    pub fn register_transport(&self, account_id: impl Into<String>, transport: Arc<dyn MailTransport>) {
        self.transports.write().insert(account_id.into(), transport);
    }

    /// Replace accounts; OAuth fields merge so reconfiguration does not
    /// drop live tokens.
    pub fn set_accounts(&self, accounts: Vec<EmailAccount>) {
        let mut current = self.accounts.write();
        let old = std::mem::take(&mut *current);
        *current = accounts
            .into_iter()
            .map(|mut account| {
                if account.oauth.is_none() {
                    if let Some(previous) = old.iter().find(|a| a.id == account.id) {
                        account.oauth = previous.oauth.clone();
                    }
                }
                account
            })
            .collect();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let this = Arc::clone(self);
        let task = spawn_poller("email-watcher", this.poll_interval, cancel, move || {
            let this = Arc::clone(&this);
            async move {
                let added = this.run_once().await;
                if added > 0 {
                    info!("email watcher ingested {} new attachment(s)", added);
                }
            }
        });
        *self.task.lock() = Some(task);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        // cooperative: the task notices the cancellation after any in-flight
        // tick finishes; dropping the handle just detaches it
        drop(self.task.lock().take());
    }

    /// One pass over all enabled accounts.
    pub async fn run_once(&self) -> usize {
        let accounts: Vec<EmailAccount> = self
            .accounts
            .read()
            .iter()
            .filter(|a| a.enabled)
            .cloned()
            .collect();

        let mut added = 0;
        for mut account in accounts {
            match self.sync_account(&mut account).await {
                Ok(count) => {
                    debug!("email account {}: {} new", account.id, count);
                    added += count;
                }
                Err(e) => {
                    warn!("email account {} failed: {}", account.id, e);
                    self.bus.publish(InboxEvent::ProviderError {
                        provider: "email".to_string(),
                        message: e.to_string(),
                    });
                }
            }
            self.write_back_tokens(&account);
        }
        added
    }

    async fn sync_account(&self, account: &mut EmailAccount) -> Result<usize> {
        let transport: Arc<dyn MailTransport> = match account.provider {
            EmailProvider::Imap => self
                .transports
                .read()
                .get(&account.id)
                .cloned()
                .ok_or_else(|| {
                    FakturError::validation(format!(
                        "no IMAP transport registered for account {}",
                        account.id
                    ))
                })?,
            EmailProvider::Gmail => {
                let tokens = account.oauth.clone().ok_or_else(|| {
                    FakturError::validation(format!("gmail {} has no credentials", account.id))
                })?;
                Arc::new(gmail::GmailTransport::new(
                    self.client.clone(),
                    self.endpoints.gmail.clone(),
                    account.id.clone(),
                    tokens,
                    self.bus.clone(),
                ))
            }
            EmailProvider::Outlook => {
                let tokens = account.oauth.clone().ok_or_else(|| {
                    FakturError::validation(format!("outlook {} has no credentials", account.id))
                })?;
                Arc::new(outlook::OutlookTransport::new(
                    self.client.clone(),
                    self.endpoints.outlook.clone(),
                    account.id.clone(),
                    tokens,
                    self.bus.clone(),
                ))
            }
        };

        let mut added = 0;
        for attachment in transport.list_attachments().await? {
            if !is_invoice_candidate(&attachment.file_name) {
                continue;
            }
            let source_key = format!("email:{}:{}", attachment.message_id, attachment.file_name);
            if self.should_skip(&source_key).await {
                continue;
            }

            let bytes = transport
                .download_attachment(&attachment.message_id, &attachment.attachment_id)
                .await?;
            self.sink
                .add_invoice(
                    InvoiceSource::Email,
                    Some(bytes),
                    IntakeMetadata {
                        file_name: Some(attachment.file_name.clone()),
                        file_type: attachment.file_type.clone(),
                        file_size: attachment.file_size,
                        source_key: Some(source_key.clone()),
                        email_subject: attachment.subject.clone(),
                        email_from: attachment.from.clone(),
                        email_date: attachment.date.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            self.processed.lock().insert(source_key);
            added += 1;
        }

        if let Some(tokens) = transport.updated_tokens() {
            account.oauth = Some(tokens);
        }
        Ok(added)
    }

    async fn should_skip(&self, source_key: &str) -> bool {
        if self.processed.lock().contains(source_key) {
            return true;
        }
        match self.sink.get_invoice_by_source_key(source_key).await {
            Ok(Some(_)) => {
                self.processed.lock().insert(source_key.to_string());
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("source key lookup failed for {}: {}", source_key, e);
                false
            }
        }
    }

    fn write_back_tokens(&self, account: &EmailAccount) {
        let mut accounts = self.accounts.write();
        if let Some(stored) = accounts.iter_mut().find(|a| a.id == account.id) {
            stored.oauth = account.oauth.clone();
        }
    }
}
