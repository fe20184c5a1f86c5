//! Invoice ingestion: storage sync, mailbox watchers and the KSeF ingester.
//!
//! Every poller receives an `IntakeSink` capability from the workflow and
//! never holds the inbox itself. Dedup happens twice: a runtime
//! `processed` set prevents re-downloads within one process lifetime, the
//! persistent source-key index (through the sink) survives restarts.

pub mod candidates;
pub mod email;
pub mod ksef;
pub mod oauth;
pub mod poller;
pub mod storage;

pub use email::{EmailWatcher, MailAttachment, MailTransport};
pub use ksef::{KsefClient, KsefIngester, KsefInvoiceMeta};
pub use storage::{StorageSync, SyncStateHandle};
