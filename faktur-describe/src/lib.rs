//! Auto-describe engine.
//!
//! For each intake the engine produces up to three candidates (contractor
//! history, first matching rule, optional AI hook) and picks the highest
//! confidence one. With no candidate it returns the `none` sentinel.

use async_trait::async_trait;
use chrono::Utc;
use faktur_core::error::Result;
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::types::{
    ContractorHistoryEntry, Invoice, Suggestion, SuggestionRule, SuggestionSource,
};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Optional AI suggestion hook. Implementations may return `None` (no-op).
#[async_trait]
pub trait AiSuggester: Send + Sync {
    async fn suggest(&self, invoice: &Invoice) -> Result<Option<Suggestion>>;
}

/// Placeholder hook: `ai:suggest` is emitted but no candidate is produced.
pub struct NoopAiSuggester;

#[async_trait]
impl AiSuggester for NoopAiSuggester {
    async fn suggest(&self, _invoice: &Invoice) -> Result<Option<Suggestion>> {
        Ok(None)
    }
}

/// Contractor history index plus rule table.
pub struct AutoDescribe {
    history: RwLock<HashMap<String, Vec<ContractorHistoryEntry>>>,
    rules: Vec<SuggestionRule>,
    ai: Option<Arc<dyn AiSuggester>>,
    bus: Option<EventBus>,
}

impl AutoDescribe {
    pub fn new(rules: Vec<SuggestionRule>) -> Self {
        Self {
            history: RwLock::new(HashMap::new()),
            rules,
            ai: None,
            bus: None,
        }
    }

    /// Attach the AI hook.
    pub fn with_ai(mut self, ai: Arc<dyn AiSuggester>) -> Self {
        self.ai = Some(ai);
        self
    }

    /// Attach the event bus for `ai:suggest` emission.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Seed the history index (e.g. from a persisted snapshot).
    pub fn load_history(&self, entries: HashMap<String, Vec<ContractorHistoryEntry>>) {
        *self.history.write() = entries;
    }

    /// Snapshot of the history index.
    pub fn history_snapshot(&self) -> HashMap<String, Vec<ContractorHistoryEntry>> {
        self.history.read().clone()
    }

    /// Produce the winning suggestion for an invoice.
    pub async fn suggest(&self, invoice: &Invoice) -> Suggestion {
        let mut candidates = Vec::with_capacity(3);

        if let Some(candidate) = self.from_history(invoice) {
            candidates.push(candidate);
        }
        if let Some(candidate) = self.from_rules(invoice) {
            candidates.push(candidate);
        }
        if let Some(ai) = &self.ai {
            if let Some(bus) = &self.bus {
                bus.publish(InboxEvent::AiSuggest {
                    invoice_id: invoice.id,
                });
            }
            match ai.suggest(invoice).await {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(e) => warn!("AI suggester failed: {}", e),
            }
        }

        // stable sort keeps history > rule > ai on equal confidence
        candidates.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        candidates.into_iter().next().unwrap_or_else(Suggestion::none)
    }

    /// Record an approved invoice under its contractor NIP.
    pub fn save_to_history(&self, invoice: &Invoice) {
        let Some(nip) = invoice.effective_nip().map(|n| n.to_string()) else {
            debug!("invoice {} has no contractor NIP, skipping history", invoice.id);
            return;
        };
        let entry = ContractorHistoryEntry {
            invoice_id: invoice.id,
            category: invoice.category.clone(),
            mpk: invoice.mpk.clone(),
            description: invoice.description.clone(),
            gross_amount: invoice.gross_amount,
            date: invoice.issue_date.clone(),
            saved_at: Utc::now(),
        };
        self.history.write().entry(nip).or_default().push(entry);
    }

    /// History candidate: most frequent category for this contractor,
    /// confidence proportional to its share.
    fn from_history(&self, invoice: &Invoice) -> Option<Suggestion> {
        let nip = invoice.effective_nip()?;
        let history = self.history.read();
        let entries = history.get(nip)?;
        if entries.is_empty() {
            return None;
        }

        let total = entries.len();
        let category = most_frequent(entries.iter().filter_map(|e| e.category.as_deref()))?;
        let top_count = entries
            .iter()
            .filter(|e| e.category.as_deref() == Some(category))
            .count();
        let mpk = most_frequent(entries.iter().filter_map(|e| e.mpk.as_deref()));
        let description = most_frequent(entries.iter().filter_map(|e| e.description.as_deref()));

        let confidence = ((top_count as f64 / total as f64) * 100.0).round() as u8;
        Some(Suggestion {
            source: SuggestionSource::History,
            category: Some(category.to_string()),
            mpk: mpk.map(|s| s.to_string()),
            description: description.map(|s| s.to_string()),
            confidence,
            based_on: total as u32,
            rule_name: None,
        })
    }

    /// Rule candidate: first rule whose non-null predicates all hold.
    fn from_rules(&self, invoice: &Invoice) -> Option<Suggestion> {
        let rule = self.rules.iter().find(|rule| rule_matches(rule, invoice))?;
        Some(Suggestion {
            source: SuggestionSource::Rule,
            category: Some(rule.category.clone()),
            mpk: rule.mpk.clone(),
            description: rule.description.clone(),
            confidence: rule.confidence,
            based_on: 0,
            rule_name: Some(rule.name.clone()),
        })
    }
}

fn rule_matches(rule: &SuggestionRule, invoice: &Invoice) -> bool {
    if let Some(pattern) = &rule.nip_pattern {
        let Some(nip) = invoice.effective_nip() else {
            return false;
        };
        match Regex::new(pattern) {
            Ok(re) if re.is_match(nip) => {}
            Ok(_) => return false,
            Err(e) => {
                warn!("rule {} has invalid nipPattern: {}", rule.name, e);
                return false;
            }
        }
    }

    if let Some(pattern) = &rule.name_pattern {
        let name = invoice
            .contractor_name
            .as_deref()
            .or_else(|| invoice.parsed_data.as_ref().and_then(|p| p.seller_name.as_deref()));
        match name {
            Some(name) if name.to_lowercase().contains(&pattern.to_lowercase()) => {}
            _ => return false,
        }
    }

    if rule.amount_min.is_some() || rule.amount_max.is_some() {
        let Some(gross) = invoice.gross_amount else {
            return false;
        };
        if let Some(min) = rule.amount_min {
            if gross < min {
                return false;
            }
        }
        if let Some(max) = rule.amount_max {
            if gross > max {
                return false;
            }
        }
    }

    if let Some(keywords) = &rule.keywords {
        let haystack = [
            invoice.invoice_number.as_deref(),
            invoice.contractor_name.as_deref(),
            invoice
                .parsed_data
                .as_ref()
                .and_then(|p| p.seller_name.as_deref()),
            invoice.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("|")
        .to_lowercase();

        if !keywords
            .iter()
            .any(|keyword| haystack.contains(&keyword.to_lowercase()))
        {
            return false;
        }
    }

    true
}

/// Most frequent value; ties resolved by first occurrence (deterministic).
fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}
