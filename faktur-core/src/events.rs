//! Typed event bus for invoice lifecycle and poller events.
//!
//! Events carry by-value snapshots; subscribers must not assume they see
//! every historical event (the channel drops the oldest entries on lag).

use crate::id::InvoiceId;
use crate::types::{
    Invoice, InvoiceStatus, OAuthTokens, ParsedInvoice, Suggestion, SyncState,
};
use tokio::sync::broadcast;

/// All events published on the bus.
#[derive(Debug, Clone)]
pub enum InboxEvent {
    InvoiceAdded(Invoice),
    InvoiceUpdated(Invoice),
    StatusChanged {
        invoice: Invoice,
        status: InvoiceStatus,
    },
    EmailInvoice(Invoice),
    StorageInvoice(Invoice),
    OcrProcessed {
        invoice_id: InvoiceId,
        parsed: ParsedInvoice,
    },
    OcrError {
        invoice_id: InvoiceId,
        message: String,
    },
    DescribeSuggested {
        invoice_id: InvoiceId,
        suggestion: Suggestion,
    },
    AiSuggest {
        invoice_id: InvoiceId,
    },
    KsefPolled {
        count: usize,
    },
    KsefError {
        message: String,
    },
    /// Sync cursors changed; the orchestrator persists them (debounced)
    StateChanged(SyncState),
    /// OAuth tokens refreshed on a connection
    ConnectionUpdated {
        connection_id: String,
        tokens: OAuthTokens,
    },
    /// A provider-level error that was swallowed by a poller
    ProviderError {
        provider: String,
        message: String,
    },
}

impl InboxEvent {
    /// Stable event kind string used in logs and assertions.
    pub fn kind(&self) -> String {
        match self {
            Self::InvoiceAdded(_) => "invoice:added".to_string(),
            Self::InvoiceUpdated(_) => "invoice:updated".to_string(),
            Self::StatusChanged { status, .. } => format!("invoice:{}", status),
            Self::EmailInvoice(_) => "email:invoice".to_string(),
            Self::StorageInvoice(_) => "storage:invoice".to_string(),
            Self::OcrProcessed { .. } => "ocr:processed".to_string(),
            Self::OcrError { .. } => "ocr:error".to_string(),
            Self::DescribeSuggested { .. } => "describe:suggested".to_string(),
            Self::AiSuggest { .. } => "ai:suggest".to_string(),
            Self::KsefPolled { .. } => "ksef:polled".to_string(),
            Self::KsefError { .. } => "ksef:error".to_string(),
            Self::StateChanged(_) => "state:changed".to_string(),
            Self::ConnectionUpdated { .. } => "connection:updated".to_string(),
            Self::ProviderError { provider, .. } => format!("{}:error", provider),
        }
    }
}

/// Broadcast publisher shared by the inbox, pollers and orchestrator.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<InboxEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self { tx }
    }

    /// Publish an event; lack of subscribers is not an error.
    pub fn publish(&self, event: InboxEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InvoiceSource;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let invoice = Invoice::new(InvoiceSource::Storage);
        bus.publish(InboxEvent::InvoiceAdded(invoice.clone()));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "invoice:added");
        match event {
            InboxEvent::InvoiceAdded(got) => assert_eq!(got.id, invoice.id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(InboxEvent::KsefPolled { count: 0 });
    }

    #[test]
    fn test_event_kinds() {
        let invoice = Invoice::new(InvoiceSource::Ksef);
        let event = InboxEvent::StatusChanged {
            invoice: invoice.clone(),
            status: InvoiceStatus::Approved,
        };
        assert_eq!(event.kind(), "invoice:approved");

        let event = InboxEvent::ProviderError {
            provider: "gdrive".to_string(),
            message: "401".to_string(),
        };
        assert_eq!(event.kind(), "gdrive:error");
    }
}
