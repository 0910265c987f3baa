//! Per-stage question catalog and skip-condition evaluation.
//!
//! Skip conditions are explicit predicate structs — a conjunction of
//! (question id, operator, expected value) clauses over the item's prior
//! responses. A question is skipped iff every clause holds; a clause whose
//! referenced question has no recorded response never holds, so the
//! question is shown rather than silently skipped.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// The kind of answer a question accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    YesNo,
    Text,
    Number,
    Date,
    FileUpload,
    MultipleChoice,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseType::YesNo => write!(f, "yes_no"),
            ResponseType::Text => write!(f, "text"),
            ResponseType::Number => write!(f, "number"),
            ResponseType::Date => write!(f, "date"),
            ResponseType::FileUpload => write!(f, "file_upload"),
            ResponseType::MultipleChoice => write!(f, "multiple_choice"),
        }
    }
}

/// Comparison operator for one skip clause. Evaluated against the canonical
/// string form of the recorded response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SkipOp {
    Equals { value: String },
    NotEquals { value: String },
    OneOf { values: Vec<String> },
}

/// One clause of a skip condition: a predicate over a prior response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipClause {
    pub question_id: String,
    #[serde(flatten)]
    pub op: SkipOp,
}

impl SkipClause {
    fn is_satisfied(&self, prior: &HashMap<String, String>) -> bool {
        let Some(recorded) = prior.get(&self.question_id) else {
            return false;
        };
        match &self.op {
            SkipOp::Equals { value } => recorded == value,
            SkipOp::NotEquals { value } => recorded != value,
            SkipOp::OneOf { values } => values.iter().any(|v| v == recorded),
        }
    }
}

/// A prompt attached to a stage whose answer may drive a transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub stage_id: String,
    pub text: String,
    pub response_type: ResponseType,
    /// Ordering within the owning stage.
    pub sequence_order: u32,
    /// Valid answers for `multiple_choice` questions; empty otherwise.
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub skip_conditions: Vec<SkipClause>,
}

impl Question {
    /// Skipped iff the question has skip conditions and every clause holds
    /// against the item's prior responses (keyed by question id, canonical
    /// string values).
    pub fn is_skipped(&self, prior: &HashMap<String, String>) -> bool {
        !self.skip_conditions.is_empty()
            && self.skip_conditions.iter().all(|c| c.is_satisfied(prior))
    }
}

/// Per-tenant catalog of questions, held ordered within each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRegistry {
    questions: Vec<Question>,
}

impl QuestionRegistry {
    /// Build a registry, validating the question set:
    ///
    /// - `sequence_order` unique within each stage
    /// - `multiple_choice` questions carry at least one choice
    /// - skip clauses reference questions that exist somewhere in the registry
    pub fn new(mut questions: Vec<Question>) -> Result<Self, EngineError> {
        let mut seen = std::collections::HashSet::new();
        for q in &questions {
            if !seen.insert((q.stage_id.clone(), q.sequence_order)) {
                return Err(EngineError::Configuration(format!(
                    "duplicate question sequence_order {} in stage {}",
                    q.sequence_order, q.stage_id
                )));
            }
            if q.response_type == ResponseType::MultipleChoice && q.choices.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "multiple_choice question {} has no choices",
                    q.id
                )));
            }
        }

        let known: std::collections::HashSet<&str> =
            questions.iter().map(|q| q.id.as_str()).collect();
        for q in &questions {
            for clause in &q.skip_conditions {
                if !known.contains(clause.question_id.as_str()) {
                    return Err(EngineError::Configuration(format!(
                        "question {} skip condition references unknown question {}",
                        q.id, clause.question_id
                    )));
                }
            }
        }

        questions.sort_by(|a, b| {
            a.stage_id
                .cmp(&b.stage_id)
                .then(a.sequence_order.cmp(&b.sequence_order))
        });
        Ok(Self { questions })
    }

    pub fn by_id(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Questions for one stage in `sequence_order`.
    pub fn questions_for<'a>(
        &'a self,
        stage_id: &'a str,
    ) -> impl Iterator<Item = &'a Question> + 'a {
        self.questions.iter().filter(move |q| q.stage_id == stage_id)
    }

    /// The next question to ask in a stage: the first, in sequence order,
    /// that is neither already answered nor skipped. `None` means the stage
    /// is complete and awaiting transition or confirmation.
    pub fn next_question<'a>(
        &'a self,
        stage_id: &'a str,
        prior: &HashMap<String, String>,
    ) -> Option<&'a Question> {
        self.questions_for(stage_id)
            .find(|q| !prior.contains_key(&q.id) && !q.is_skipped(prior))
    }
}
