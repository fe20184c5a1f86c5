//! Storage sync: watched local folders plus remote provider connections.
//!
//! One run iterates all enabled connections in priority order, then local
//! folders. Per-connection errors are swallowed (logged + emitted as
//! `<provider>:error`) so one broken connection never blocks the rest.

pub mod dropbox;
pub mod gdrive;
pub mod local;
pub mod nextcloud;
pub mod onedrive;

use crate::poller::spawn_poller;
use faktur_core::config::{HttpConfig, SyncConfig};
use faktur_core::error::Result;
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::traits::IntakeSink;
use faktur_core::types::{
    IntakeMetadata, InvoiceSource, StorageConnection, StorageProvider, SyncCursor, SyncState,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared sync-state: cursor reads/writes plus `state:changed` emission.
#[derive(Clone)]
pub struct SyncStateHandle {
    state: Arc<RwLock<SyncState>>,
    bus: EventBus,
}

impl SyncStateHandle {
    pub fn new(initial: SyncState, bus: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            bus,
        }
    }

    pub fn get(&self, connection_id: &str, folder: &str) -> Option<SyncCursor> {
        self.state.read().get(connection_id, folder).cloned()
    }

    pub fn set(&self, connection_id: &str, folder: &str, cursor: SyncCursor) {
        let snapshot = {
            let mut state = self.state.write();
            state.set(connection_id, folder, cursor);
            state.clone()
        };
        self.bus.publish(InboxEvent::StateChanged(snapshot));
    }

    pub fn clear(&self, connection_id: &str, folder: &str) {
        let snapshot = {
            let mut state = self.state.write();
            state.clear(connection_id, folder);
            state.clone()
        };
        self.bus.publish(InboxEvent::StateChanged(snapshot));
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.read().clone()
    }
}

/// Provider API endpoints, overridable for tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub dropbox_api: String,
    pub dropbox_content: String,
    pub gdrive: String,
    pub onedrive: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            dropbox_api: "https://api.dropboxapi.com".to_string(),
            dropbox_content: "https://content.dropboxapi.com".to_string(),
            gdrive: "https://www.googleapis.com".to_string(),
            onedrive: "https://graph.microsoft.com".to_string(),
        }
    }
}

/// The storage sync poller.
pub struct StorageSync {
    pub(crate) client: reqwest::Client,
    pub(crate) sink: Arc<dyn IntakeSink>,
    pub(crate) bus: EventBus,
    pub(crate) state: SyncStateHandle,
    pub(crate) endpoints: Endpoints,
    connections: RwLock<Vec<StorageConnection>>,
    local_folders: RwLock<Vec<PathBuf>>,
    poll_interval: Duration,
    /// Runtime-only dedup above the persistent source-key index
    processed: Mutex<HashSet<String>>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StorageSync {
    pub fn new(
        config: SyncConfig,
        http: HttpConfig,
        sink: Arc<dyn IntakeSink>,
        bus: EventBus,
        initial_state: SyncState,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .connect_timeout(Duration::from_millis(http.probe_timeout_millis))
            .build()
            .unwrap_or_default();
        Self {
            client,
            sink,
            state: SyncStateHandle::new(initial_state, bus.clone()),
            bus,
            endpoints: Endpoints::default(),
            connections: RwLock::new(config.connections),
            local_folders: RwLock::new(config.local_folders),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            processed: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Override provider endpoints (tests).
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Replace watched local folders (stateless replace semantics).
    pub fn set_local_folders(&self, folders: Vec<PathBuf>) {
        *self.local_folders.write() = folders;
    }

    /// Replace connections; OAuth fields merge so a config update without
    /// credentials does not drop live tokens.
    pub fn set_connections(&self, connections: Vec<StorageConnection>) {
        let mut current = self.connections.write();
        let old = std::mem::take(&mut *current);
        *current = connections
            .into_iter()
            .map(|mut conn| {
                if let Some(previous) = old.iter().find(|c| c.id == conn.id) {
                    conn.oauth = match (conn.oauth.take(), previous.oauth.clone()) {
                        (None, old_oauth) => old_oauth,
                        (Some(mut new_oauth), Some(old_oauth)) => {
                            if new_oauth.refresh_token.is_none() {
                                new_oauth.refresh_token = old_oauth.refresh_token;
                            }
                            if new_oauth.expires_at.is_none() {
                                new_oauth.expires_at = old_oauth.expires_at;
                            }
                            Some(new_oauth)
                        }
                        (new_oauth, None) => new_oauth,
                    };
                }
                conn
            })
            .collect();
    }

    pub fn connections_snapshot(&self) -> Vec<StorageConnection> {
        self.connections.read().clone()
    }

    /// Sync-state handle shared with the orchestrator.
    pub fn state(&self) -> &SyncStateHandle {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the poller: one run immediately, then every poll interval.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let this = Arc::clone(self);
        let task = spawn_poller("storage-sync", this.poll_interval, cancel, move || {
            let this = Arc::clone(&this);
            async move {
                let added = this.run_once().await;
                if added > 0 {
                    info!("storage sync ingested {} new file(s)", added);
                }
            }
        });
        *self.task.lock() = Some(task);
    }

    /// Cooperative stop: no new iterations; in-flight requests finish.
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

    /// One full sync pass; returns the number of newly ingested files.
    pub async fn run_once(&self) -> usize {
        let mut connections: Vec<StorageConnection> = self
            .connections
            .read()
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        connections.sort_by(|a, b| {
            (a.effective_priority(), a.id.as_str()).cmp(&(b.effective_priority(), b.id.as_str()))
        });

        let mut added = 0;
        for mut conn in connections {
            let result = match conn.provider {
                StorageProvider::Dropbox => dropbox::sync(self, &mut conn).await,
                StorageProvider::Gdrive => gdrive::sync(self, &mut conn).await,
                StorageProvider::Onedrive => onedrive::sync(self, &mut conn).await,
                StorageProvider::Nextcloud => nextcloud::sync(self, &mut conn).await,
            };
            match result {
                Ok(count) => {
                    debug!("{} connection {}: {} new", conn.provider.as_str(), conn.id, count);
                    added += count;
                }
                Err(e) => {
                    warn!(
                        "{} connection {} failed: {}",
                        conn.provider.as_str(),
                        conn.id,
                        e
                    );
                    self.bus.publish(InboxEvent::ProviderError {
                        provider: conn.provider.as_str().to_string(),
                        message: e.to_string(),
                    });
                }
            }
            // drivers may have refreshed tokens in place
            self.write_back_tokens(&conn);
        }

        let folders = self.local_folders.read().clone();
        for folder in folders {
            match local::sync_folder(self, &folder).await {
                Ok(count) => added += count,
                Err(e) => {
                    warn!("local folder {} failed: {}", folder.display(), e);
                    self.bus.publish(InboxEvent::ProviderError {
                        provider: "local".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        added
    }

    fn write_back_tokens(&self, conn: &StorageConnection) {
        let mut connections = self.connections.write();
        if let Some(stored) = connections.iter_mut().find(|c| c.id == conn.id) {
            stored.oauth = conn.oauth.clone();
        }
    }

    /// True when this source key is already known (runtime set or store).
    pub(crate) async fn should_skip(&self, source_key: &str) -> bool {
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

    /// Hand downloaded bytes to the sink and record the key as processed.
    pub(crate) async fn ingest(&self, bytes: Vec<u8>, metadata: IntakeMetadata) -> Result<()> {
        let key = metadata.source_key.clone();
        self.sink
            .add_invoice(InvoiceSource::Storage, Some(bytes), metadata)
            .await?;
        if let Some(key) = key {
            self.processed.lock().insert(key);
        }
        Ok(())
    }
}
