//! KSeF ingester: periodic metadata query plus download of referenced
//! structured invoices.
//!
//! The KSeF protocol client itself is an external collaborator; this module
//! only consumes its contract.

use crate::poller::spawn_poller;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use faktur_core::config::KsefConfig;
use faktur_core::error::Result;
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::traits::IntakeSink;
use faktur_core::types::{IntakeMetadata, InvoiceSource};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One invoice metadata record returned by the KSeF query endpoint.
#[derive(Debug, Clone, Default)]
pub struct KsefInvoiceMeta {
    pub ksef_reference_number: Option<String>,
    pub ksef_id: Option<String>,
    pub seller_nip: Option<String>,
    pub issue_date: Option<String>,
}

impl KsefInvoiceMeta {
    /// The reference used for download and the source key.
    pub fn reference(&self) -> Option<&str> {
        self.ksef_reference_number
            .as_deref()
            .or(self.ksef_id.as_deref())
    }
}

/// Contract of the external KSeF protocol client.
#[async_trait]
pub trait KsefClient: Send + Sync {
    /// Query invoice metadata newer than `since`.
    async fn poll_new_invoices(
        &self,
        access_token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<KsefInvoiceMeta>>;

    /// Download the canonical invoice XML for a reference number.
    async fn download_invoice(&self, access_token: &str, reference: &str) -> Result<String>;
}

/// The KSeF poller.
pub struct KsefIngester {
    client: Arc<dyn KsefClient>,
    sink: Arc<dyn IntakeSink>,
    bus: EventBus,
    access_token: RwLock<Option<String>>,
    since: RwLock<Option<DateTime<Utc>>>,
    poll_interval: Duration,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl KsefIngester {
    pub fn new(
        config: &KsefConfig,
        client: Arc<dyn KsefClient>,
        sink: Arc<dyn IntakeSink>,
        bus: EventBus,
    ) -> Self {
        Self {
            client,
            sink,
            bus,
            access_token: RwLock::new(config.access_token.clone()),
            since: RwLock::new(None),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Replace the access token at runtime; `None` pauses polling.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
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
        let task = spawn_poller("ksef", this.poll_interval, cancel, move || {
            let this = Arc::clone(&this);
            async move {
                this.run_once().await;
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

    /// One poll: metadata query, per-reference download, intake. `since`
    /// advances to now only when the whole poll succeeded.
    pub async fn run_once(&self) -> usize {
        let Some(token) = self.access_token.read().clone() else {
            debug!("ksef poll skipped: no access token");
            return 0;
        };
        let since = *self.since.read();

        let metas = match self.client.poll_new_invoices(&token, since).await {
            Ok(metas) => metas,
            Err(e) => {
                warn!("ksef poll failed: {}", e);
                self.bus.publish(InboxEvent::KsefError {
                    message: e.to_string(),
                });
                return 0;
            }
        };

        let mut added = 0;
        for meta in &metas {
            let Some(reference) = meta.reference() else {
                continue;
            };
            let source_key = format!("ksef:{}", reference);
            match self.sink.get_invoice_by_source_key(&source_key).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    warn!("ksef source key lookup failed: {}", e);
                    continue;
                }
            }

            let xml = match self.client.download_invoice(&token, reference).await {
                Ok(xml) => xml,
                Err(e) => {
                    warn!("ksef download of {} failed: {}", reference, e);
                    self.bus.publish(InboxEvent::KsefError {
                        message: format!("{}: {}", reference, e),
                    });
                    continue;
                }
            };

            let result = self
                .sink
                .add_invoice(
                    InvoiceSource::Ksef,
                    Some(xml.into_bytes()),
                    IntakeMetadata {
                        file_name: Some(format!("ksef_{}.xml", reference)),
                        file_type: Some("application/xml".to_string()),
                        source_key: Some(source_key),
                        ..Default::default()
                    },
                )
                .await;
            match result {
                Ok(_) => added += 1,
                Err(e) => warn!("ksef intake of {} failed: {}", reference, e),
            }
        }

        *self.since.write() = Some(Utc::now());
        self.bus.publish(InboxEvent::KsefPolled { count: added });
        added
    }
}
