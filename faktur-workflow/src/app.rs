//! Application wiring and lifetime.
//!
//! `App` owns every poller and background task; its lifetime bounds all
//! timers. Sync state, refreshed OAuth tokens and contractor history are
//! persisted into the store's settings document with a 1-second coalescing
//! debounce.

use crate::debounce::Debouncer;
use crate::inbox::Inbox;
use crate::workflow::Workflow;
use faktur_core::config::AppConfig;
use faktur_core::error::Result;
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::traits::{IntakeSink, InvoiceStore};
use faktur_core::types::{InvoiceStatus, SyncState};
use faktur_describe::AutoDescribe;
use faktur_ingest::ksef::KsefClient;
use faktur_ingest::{EmailWatcher, KsefIngester, StorageSync};
use faktur_ocr::OcrPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SETTINGS_SYNC_STATE: &str = "syncState";
const SETTINGS_CONNECTIONS: &str = "connections";
const SETTINGS_HISTORY: &str = "contractorHistory";

pub struct App {
    store: Arc<dyn InvoiceStore>,
    bus: EventBus,
    workflow: Arc<Workflow>,
    storage_sync: Arc<StorageSync>,
    email_watcher: Arc<EmailWatcher>,
    ksef: Option<Arc<KsefIngester>>,
    describe: Arc<AutoDescribe>,
    debouncer: Arc<Debouncer>,
    persist_task: JoinHandle<()>,
}

impl App {
    /// Wire every component. The KSeF protocol client is an external
    /// collaborator; without one the KSeF ingester is absent.
    pub async fn build(
        config: AppConfig,
        store: Arc<dyn InvoiceStore>,
        ksef_client: Option<Arc<dyn KsefClient>>,
    ) -> Result<Self> {
        let bus = EventBus::new();
        let inbox = Arc::new(Inbox::new(store.clone(), bus.clone()));
        let sink: Arc<dyn IntakeSink> = inbox.clone();

        // restore persisted runtime state
        let settings = store.get_settings().await?.unwrap_or_default();
        let sync_state: SyncState = settings
            .get(SETTINGS_SYNC_STATE)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        let mut describe = AutoDescribe::new(config.describe.rules.clone()).with_bus(bus.clone());
        if config.describe.ai_enabled {
            describe = describe.with_ai(Arc::new(faktur_describe::NoopAiSuggester));
        }
        let describe = Arc::new(describe);
        if let Some(history) = settings
            .get(SETTINGS_HISTORY)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
        {
            describe.load_history(history);
        }

        let storage_sync = Arc::new(StorageSync::new(
            config.sync.clone(),
            config.http.clone(),
            sink.clone(),
            bus.clone(),
            sync_state,
        ));
        let email_watcher = Arc::new(EmailWatcher::new(
            config.email.clone(),
            config.http.clone(),
            sink.clone(),
            bus.clone(),
        ));
        let ksef = ksef_client.map(|client| {
            Arc::new(KsefIngester::new(&config.ksef, client, sink.clone(), bus.clone()))
        });

        let workflow = Arc::new(
            Workflow::new(
                inbox,
                OcrPipeline::new(config.ocr.clone()),
                describe.clone(),
                bus.clone(),
            )
            .with_pollers(storage_sync.clone(), email_watcher.clone(), ksef.clone()),
        );

        let debouncer = Arc::new(Debouncer::new(Duration::from_secs(1)));
        let persist_task = tokio::spawn(persist_loop(
            bus.subscribe(),
            store.clone(),
            storage_sync.clone(),
            describe.clone(),
            debouncer.clone(),
        ));

        Ok(Self {
            store,
            bus,
            workflow,
            storage_sync,
            email_watcher,
            ksef,
            describe,
            debouncer,
            persist_task,
        })
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Start all pollers.
    pub fn start(&self) {
        self.storage_sync.start();
        self.email_watcher.start();
        if let Some(ksef) = &self.ksef {
            ksef.start();
        }
        info!("faktur pollers started");
    }

    /// Cooperative shutdown: stop the pollers, drop the pending debounced
    /// write and flush runtime state once.
    pub async fn shutdown(self) {
        self.storage_sync.stop();
        self.email_watcher.stop();
        if let Some(ksef) = &self.ksef {
            ksef.stop();
        }
        self.debouncer.cancel();
        self.persist_task.abort();

        if let Err(e) =
            write_settings(&*self.store, &self.storage_sync, &self.describe).await
        {
            warn!("final settings flush failed: {}", e);
        }
        info!("faktur shut down");
    }
}

async fn persist_loop(
    mut rx: tokio::sync::broadcast::Receiver<InboxEvent>,
    store: Arc<dyn InvoiceStore>,
    storage_sync: Arc<StorageSync>,
    describe: Arc<AutoDescribe>,
    debouncer: Arc<Debouncer>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("settings persistence lagged {} event(s)", skipped);
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        let persist_worthy = matches!(
            event,
            InboxEvent::StateChanged(_)
                | InboxEvent::ConnectionUpdated { .. }
                | InboxEvent::StatusChanged {
                    status: InvoiceStatus::Approved,
                    ..
                }
        );
        if !persist_worthy {
            continue;
        }

        let store = store.clone();
        let storage_sync = storage_sync.clone();
        let describe = describe.clone();
        debouncer.schedule(move || async move {
            if let Err(e) = write_settings(&*store, &storage_sync, &describe).await {
                warn!("settings persistence failed: {}", e);
            }
        });
    }
}

/// Snapshot sync cursors, per-connection tokens and contractor history into
/// the canonical settings document.
async fn write_settings(
    store: &dyn InvoiceStore,
    storage_sync: &StorageSync,
    describe: &AutoDescribe,
) -> Result<()> {
    let connections: serde_json::Map<String, serde_json::Value> = storage_sync
        .connections_snapshot()
        .into_iter()
        .filter_map(|conn| {
            conn.oauth
                .as_ref()
                .and_then(|tokens| serde_json::to_value(tokens).ok())
                .map(|tokens| (conn.id, tokens))
        })
        .collect();

    let mut settings = serde_json::Map::new();
    settings.insert(
        SETTINGS_SYNC_STATE.to_string(),
        serde_json::to_value(storage_sync.state().snapshot())?,
    );
    settings.insert(
        SETTINGS_CONNECTIONS.to_string(),
        serde_json::Value::Object(connections),
    );
    settings.insert(
        SETTINGS_HISTORY.to_string(),
        serde_json::to_value(describe.history_snapshot())?,
    );
    store.set_settings(&serde_json::Value::Object(settings)).await
}
