//! Core types used across the faktur system.

use crate::id::InvoiceId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where an invoice entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceSource {
    Email,
    Scanner,
    Storage,
    Ksef,
}

impl InvoiceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Scanner => "scanner",
            Self::Storage => "storage",
            Self::Ksef => "ksef",
        }
    }
}

impl std::fmt::Display for InvoiceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an invoice.
///
/// Transitions are driven exclusively through the inbox; `Booked` and
/// `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Ocr,
    Described,
    Approved,
    Booked,
    Rejected,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ocr => "ocr",
            Self::Described => "described",
            Self::Approved => "approved",
            Self::Booked => "booked",
            Self::Rejected => "rejected",
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Booked | Self::Rejected)
    }

    /// Whether the state machine admits `self -> next`.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        match (self, next) {
            (Pending, Ocr) => true,
            (Ocr, Described) => true,
            // approval is allowed before OCR completes
            (Pending | Ocr | Described, Approved) => true,
            (Approved, Booked) => true,
            // any non-terminal state may be rejected
            (s, Rejected) if !s.is_terminal() => true,
            _ => false,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ocr" => Some(Self::Ocr),
            "described" => Some(Self::Described),
            "approved" => Some(Self::Approved),
            "booked" => Some(Self::Booked),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw OCR output attached to an invoice after a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrData {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Normalized record produced by the OCR/parse pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParsedInvoice {
    /// 0-100; 100 for structured XML extraction, 0 when nothing was parsed
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_nip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_nip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Origin of an auto-describe suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    History,
    Rule,
    Ai,
    #[default]
    None,
}

/// A category/description suggestion for an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub source: SuggestionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 0-100
    pub confidence: u8,
    /// Number of historical records the suggestion is based on
    pub based_on: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
}

impl Suggestion {
    /// The sentinel returned when no candidate was produced.
    pub fn none() -> Self {
        Self::default()
    }
}

/// A single ingested invoice document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: InvoiceId,
    pub source: InvoiceSource,
    pub status: InvoiceStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Provider-qualified dedup key; never changes after intake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_nip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub currency: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_amount: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_data: Option<OcrData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_data: Option<ParsedInvoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expense_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Cost-center identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Create a new invoice record at intake.
    pub fn new(source: InvoiceSource) -> Self {
        let now = Utc::now();
        Self {
            id: InvoiceId::new(),
            source,
            status: InvoiceStatus::Pending,
            original_file: None,
            file_name: None,
            file_type: None,
            file_size: None,
            source_key: None,
            contractor_nip: None,
            contractor_name: None,
            invoice_number: None,
            issue_date: None,
            due_date: None,
            currency: "PLN".to_string(),
            gross_amount: None,
            net_amount: None,
            vat_amount: None,
            ocr_data: None,
            parsed_data: None,
            suggestion: None,
            category: None,
            expense_type_id: None,
            project_id: None,
            label_ids: Vec::new(),
            description: None,
            mpk: None,
            rejection_reason: None,
            email_subject: None,
            email_from: None,
            email_date: None,
            source_path: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            approved_at: None,
            booked_at: None,
        }
    }

    /// Rewrite `updated_at`; called by every mutation path.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Deduplicate labels preserving first-seen order and dropping empties.
    pub fn normalize_labels(labels: Vec<String>) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        labels
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .filter(|l| seen.insert(l.clone()))
            .collect()
    }

    /// Best available contractor NIP (meta field first, parsed seller second).
    pub fn effective_nip(&self) -> Option<&str> {
        self.contractor_nip
            .as_deref()
            .or_else(|| self.parsed_data.as_ref().and_then(|p| p.seller_nip.as_deref()))
    }
}

/// Metadata supplied by a poller or manual caller at intake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_date: Option<String>,
}

/// Patch applied through `update_invoice`. All fields optional; only present
/// fields are written. `Some(None)` on a double-option clears the field.
#[derive(Debug, Clone, Default)]
pub struct InvoicePatch {
    pub contractor_nip: Option<Option<String>>,
    pub contractor_name: Option<Option<String>>,
    pub invoice_number: Option<Option<String>>,
    pub issue_date: Option<Option<String>>,
    pub due_date: Option<Option<String>>,
    pub currency: Option<String>,
    pub gross_amount: Option<Option<Decimal>>,
    pub net_amount: Option<Option<Decimal>>,
    pub vat_amount: Option<Option<Decimal>>,
    pub ocr_data: Option<Option<OcrData>>,
    pub parsed_data: Option<Option<ParsedInvoice>>,
    pub suggestion: Option<Option<Suggestion>>,
    pub category: Option<Option<String>>,
    pub expense_type_id: Option<Option<String>>,
    pub project_id: Option<Option<String>>,
    pub label_ids: Option<Vec<String>>,
    pub description: Option<Option<String>>,
    pub mpk: Option<Option<String>>,
    pub rejection_reason: Option<Option<String>>,
}

impl InvoicePatch {
    /// Apply the patch; does not touch timestamps (the inbox does).
    pub fn apply(self, invoice: &mut Invoice) {
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    invoice.$field = v;
                }
            };
        }
        set!(contractor_nip);
        set!(contractor_name);
        set!(invoice_number);
        set!(issue_date);
        set!(due_date);
        set!(gross_amount);
        set!(net_amount);
        set!(vat_amount);
        set!(ocr_data);
        set!(parsed_data);
        set!(suggestion);
        set!(category);
        set!(expense_type_id);
        set!(project_id);
        set!(description);
        set!(mpk);
        set!(rejection_reason);
        if let Some(currency) = self.currency {
            invoice.currency = currency;
        }
        if let Some(labels) = self.label_ids {
            invoice.label_ids = Invoice::normalize_labels(labels);
        }
    }
}

/// Filter accepted by `list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InvoiceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<InvoiceSource>,
    /// Threshold on `created_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        if let Some(status) = self.status {
            if invoice.status != status {
                return false;
            }
        }
        if let Some(source) = self.source {
            if invoice.source != source {
                return false;
            }
        }
        if let Some(since) = self.since {
            if invoice.created_at < since {
                return false;
            }
        }
        true
    }
}

/// Inbox statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_source: HashMap<String, usize>,
}

/// One auto-describe rule. Matching is conjunctive across non-null
/// predicates; the first matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_min: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_max: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub confidence: u8,
}

/// History record kept per contractor NIP after approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractorHistoryEntry {
    pub invoice_id: InvoiceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub saved_at: DateTime<Utc>,
}

/// Per-connection incremental sync cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncCursor {
    /// Opaque Dropbox continuation cursor
    Dropbox { cursor: String },
    /// ISO-8601 `modifiedTime` high-water mark (already skew-adjusted)
    Gdrive { since: String },
    /// Full Graph API delta link URL
    Onedrive { delta_link: String },
}

/// Sync state for all remote connections, keyed `<connectionId>/<folder>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub entries: HashMap<String, SyncCursor>,
}

impl SyncState {
    pub fn key(connection_id: &str, folder: &str) -> String {
        format!("{}/{}", connection_id, folder)
    }

    pub fn get(&self, connection_id: &str, folder: &str) -> Option<&SyncCursor> {
        self.entries.get(&Self::key(connection_id, folder))
    }

    pub fn set(&mut self, connection_id: &str, folder: &str, cursor: SyncCursor) {
        self.entries.insert(Self::key(connection_id, folder), cursor);
    }

    pub fn clear(&mut self, connection_id: &str, folder: &str) {
        self.entries.remove(&Self::key(connection_id, folder));
    }
}

/// OAuth credentials for one connection. Mutated in place after refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub token_url: String,
}

/// Remote storage provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Dropbox,
    Gdrive,
    Onedrive,
    Nextcloud,
}

impl StorageProvider {
    /// Default polling priority; lower polls first and wins contested
    /// source keys.
    pub fn default_priority(&self) -> u32 {
        match self {
            Self::Dropbox => 10,
            Self::Gdrive => 20,
            Self::Onedrive => 25,
            Self::Nextcloud => 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dropbox => "dropbox",
            Self::Gdrive => "gdrive",
            Self::Onedrive => "onedrive",
            Self::Nextcloud => "nextcloud",
        }
    }
}

/// Priority assigned to local watched folders.
pub const LOCAL_FOLDER_PRIORITY: u32 = 40;

/// One configured remote storage connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConnection {
    pub id: String,
    pub provider: StorageProvider,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Drive/OneDrive folder id, Dropbox folder path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Nextcloud server base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Explicit WebDAV URL overriding the `(base_url, username, folder)` form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webdav_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthTokens>,
}

fn default_true() -> bool {
    true
}

impl StorageConnection {
    pub fn effective_priority(&self) -> u32 {
        self.priority.unwrap_or_else(|| self.provider.default_priority())
    }

    /// Folder component used in sync-state keys; empty string when unset.
    pub fn folder_key(&self) -> &str {
        self.folder.as_deref().unwrap_or("")
    }
}

/// Email provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    Imap,
    Gmail,
    Outlook,
}

/// Plain IMAP credentials, consumed through the `MailTransport` contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub tls: bool,
}

/// One configured mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAccount {
    pub id: String,
    pub provider: EmailProvider,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imap: Option<ImapConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthTokens>,
}
