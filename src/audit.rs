//! Append-only ledger of realized stage transitions.
//!
//! Immutability of this ledger is what makes timeline reconstruction
//! correct: entries are only ever appended, and no update or delete
//! operation exists in the public contract.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What caused a transition to be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    QuestionResponse,
    Manual,
    System,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::QuestionResponse => write!(f, "question_response"),
            TriggerSource::Manual => write!(f, "manual"),
            TriggerSource::System => write!(f, "system"),
        }
    }
}

/// Immutable record of one realized stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub item_id: String,
    pub from_stage: Option<String>,
    pub to_stage: Option<String>,
    pub trigger_source: TriggerSource,
    /// Opaque actor id/name supplied by the access-control collaborator.
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    pub response_value: Option<String>,
    /// Hours elapsed since this item's previous entry. None for the first.
    pub duration_in_previous_stage_hours: Option<f64>,
}

/// Append-only store of audit entries, keyed by item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLog {
    entries: HashMap<String, Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, computing `duration_in_previous_stage_hours` as the
    /// elapsed time since the item's previous entry.
    pub fn append(&mut self, mut entry: AuditEntry) {
        let per_item = self.entries.entry(entry.item_id.clone()).or_default();
        entry.duration_in_previous_stage_hours = per_item
            .last()
            .map(|prev| hours_between(prev.created_at, entry.created_at));
        per_item.push(entry);
    }

    /// This item's entries ordered by `created_at` ascending.
    pub fn history(&self, item_id: &str) -> Vec<AuditEntry> {
        let mut entries = self.entries.get(item_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    pub fn entry_count(&self, item_id: &str) -> usize {
        self.entries.get(item_id).map_or(0, Vec::len)
    }
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 3600.0
}
