use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{Question, ResponseType};
use crate::error::EngineError;

/// Externally-owned lifecycle status of an item. The engine reads this but
/// never sets it; only `current_stage_id` and `stage_entered_at` are ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Planning,
    Active,
    Completed,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Cancelled)
    }
}

/// A typed, validated answer to a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResponseValue {
    YesNo(bool),
    Text(String),
    Number(f64),
    Date(NaiveDate),
    FileUpload(String),
    Choice(String),
}

impl ResponseValue {
    /// Validate and parse a raw answer against the question's response type.
    ///
    /// Yes/no input is accepted case-insensitively; everything downstream
    /// (rule triggers, skip conditions) matches on the canonical form, which
    /// keeps exact-match comparison deterministic.
    pub fn parse(question: &Question, raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EngineError::Validation(format!(
                "question {} requires a value",
                question.id
            )));
        }

        match question.response_type {
            ResponseType::YesNo => match raw.to_ascii_lowercase().as_str() {
                "yes" => Ok(ResponseValue::YesNo(true)),
                "no" => Ok(ResponseValue::YesNo(false)),
                _ => Err(EngineError::Validation(format!(
                    "question {} expects Yes or No, got {raw:?}",
                    question.id
                ))),
            },
            ResponseType::Text => Ok(ResponseValue::Text(raw.to_string())),
            ResponseType::Number => {
                let n: f64 = raw.parse().map_err(|_| {
                    EngineError::Validation(format!(
                        "question {} expects a number, got {raw:?}",
                        question.id
                    ))
                })?;
                if !n.is_finite() {
                    return Err(EngineError::Validation(format!(
                        "question {} expects a finite number",
                        question.id
                    )));
                }
                Ok(ResponseValue::Number(n))
            }
            ResponseType::Date => {
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                    EngineError::Validation(format!(
                        "question {} expects a YYYY-MM-DD date, got {raw:?}",
                        question.id
                    ))
                })?;
                Ok(ResponseValue::Date(date))
            }
            ResponseType::FileUpload => Ok(ResponseValue::FileUpload(raw.to_string())),
            ResponseType::MultipleChoice => {
                if question.choices.iter().any(|c| c == raw) {
                    Ok(ResponseValue::Choice(raw.to_string()))
                } else {
                    Err(EngineError::Validation(format!(
                        "question {} expects one of {:?}, got {raw:?}",
                        question.id, question.choices
                    )))
                }
            }
        }
    }

    /// Canonical string form used for rule-trigger and skip-condition
    /// matching and for audit records.
    pub fn canonical(&self) -> String {
        match self {
            ResponseValue::YesNo(true) => "Yes".to_string(),
            ResponseValue::YesNo(false) => "No".to_string(),
            ResponseValue::Text(s)
            | ResponseValue::FileUpload(s)
            | ResponseValue::Choice(s) => s.clone(),
            ResponseValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            ResponseValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// The recorded answer to a question for a specific item. Immutable once
/// the transition it triggered has been committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub item_id: String,
    pub question_id: String,
    pub value: ResponseValue,
    pub responder: String,
    pub recorded_at: DateTime<Utc>,
}

/// A manual transition proposed by the resolver, held on the item until an
/// actor explicitly confirms it. Carries the triggering response so the
/// audit entry written at confirmation is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransition {
    pub to_stage: String,
    pub question_id: String,
    pub response_value: String,
    pub proposed_at: DateTime<Utc>,
}

/// A tracked work item. Lifecycle dates and status are owned by the job
/// management collaborator; this engine exclusively owns and mutates
/// `current_stage_id`, `stage_entered_at`, `pending_transition` and
/// `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub current_stage_id: String,
    pub stage_entered_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every committed mutation.
    pub version: u64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: ItemStatus,
    pub pending_transition: Option<PendingTransition>,
}

impl Item {
    pub fn new(
        tenant_id: impl Into<String>,
        title: impl Into<String>,
        initial_stage: impl Into<String>,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            title: title.into(),
            current_stage_id: initial_stage.into(),
            stage_entered_at: Utc::now(),
            version: 0,
            start_date,
            end_date: None,
            status: ItemStatus::Planning,
            pending_transition: None,
        }
    }
}
