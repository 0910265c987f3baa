//! Transition resolution: (current stage, answered question, response) →
//! proposed next stage, or nothing.
//!
//! Precedence when several rules structurally match the same
//! (from_stage, trigger_response) pair is explicit and documented:
//!
//! 1. a rule conditioned on the answered question's id beats a
//!    stage-scoped rule;
//! 2. at equal specificity a single automatic rule beats manual ones;
//! 3. anything still ambiguous is a configuration error — the resolver
//!    never guesses, and incidental rule ordering never decides.

use serde::{Deserialize, Serialize};

use crate::catalog::Question;
use crate::error::EngineError;

/// Configuration mapping (stage, trigger value) → next stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub id: String,
    pub from_stage: String,
    pub to_stage: String,
    /// Compared exactly (case-sensitive) against the canonical response
    /// string.
    pub trigger_response: String,
    /// When set, the rule only matches responses to this question.
    #[serde(default)]
    pub question_id: Option<String>,
    /// Automatic rules apply immediately; non-automatic rules require an
    /// explicit confirmation before any state changes.
    #[serde(default = "default_automatic")]
    pub is_automatic: bool,
}

fn default_automatic() -> bool {
    true
}

/// A matched rule and the stage it proposes.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub rule: TransitionRule,
}

impl Resolution {
    pub fn to_stage(&self) -> &str {
        &self.rule.to_stage
    }

    pub fn is_automatic(&self) -> bool {
        self.rule.is_automatic
    }
}

/// The tenant's transition rules, resolved per answered question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    rules: Vec<TransitionRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<TransitionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    /// Resolve an answered question against the rule set.
    ///
    /// `canonical` is the canonical string form of the response value.
    /// Returns `Ok(None)` when no rule matches — the item stays put,
    /// awaiting manual resolution. Returns `ConfigurationError` when the
    /// precedence rules above cannot single out one rule.
    pub fn resolve(
        &self,
        stage_id: &str,
        question: &Question,
        canonical: &str,
    ) -> Result<Option<Resolution>, EngineError> {
        let candidates: Vec<&TransitionRule> = self
            .rules
            .iter()
            .filter(|r| {
                r.from_stage == stage_id
                    && r.trigger_response == canonical
                    && r.question_id
                        .as_deref()
                        .is_none_or(|q| q == question.id)
            })
            .collect();

        let question_scoped: Vec<&TransitionRule> = candidates
            .iter()
            .copied()
            .filter(|r| r.question_id.is_some())
            .collect();

        let pool = if question_scoped.is_empty() {
            candidates
        } else {
            question_scoped
        };

        match pool.len() {
            0 => Ok(None),
            1 => Ok(Some(Resolution {
                rule: pool[0].clone(),
            })),
            _ => {
                let automatic: Vec<&TransitionRule> =
                    pool.iter().copied().filter(|r| r.is_automatic).collect();
                if automatic.len() == 1 {
                    return Ok(Some(Resolution {
                        rule: automatic[0].clone(),
                    }));
                }
                let ids: Vec<&str> = pool.iter().map(|r| r.id.as_str()).collect();
                Err(EngineError::Configuration(format!(
                    "rules {ids:?} ambiguously match response {canonical:?} \
                     to question {} in stage {stage_id}",
                    question.id
                )))
            }
        }
    }

    /// Surface every ambiguous (from_stage, question, trigger) combination
    /// in the rule set, for configuration checking ahead of any live item.
    pub fn ambiguities(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (i, a) in self.rules.iter().enumerate() {
            for b in &self.rules[i + 1..] {
                let same_key =
                    a.from_stage == b.from_stage && a.trigger_response == b.trigger_response;
                let same_scope = a.question_id == b.question_id;
                let both_unresolvable = a.is_automatic == b.is_automatic;
                if same_key && same_scope && both_unresolvable {
                    problems.push(format!(
                        "rules {} and {} both match ({}, {:?})",
                        a.id, b.id, a.from_stage, a.trigger_response
                    ));
                }
            }
        }
        problems
    }
}
