//! The progression engine: question selection, response validation,
//! transition resolution and atomic state update.
//!
//! The engine exclusively owns each item's `current_stage_id` and
//! `stage_entered_at`. Mutations are serialized per item through an
//! optimistic version check: read a snapshot, compute outside the lock,
//! then commit only if the item's version is unchanged — otherwise the
//! caller gets a `Conflict` and must refetch before deciding to retry.
//! The audit append and the pointer update commit in one critical
//! section, so both happen or neither does.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};

use crate::audit::{AuditEntry, AuditLog, TriggerSource};
use crate::catalog::{Question, QuestionRegistry, StageCatalog, StatusMapping};
use crate::engine::item::{Item, ItemStatus, PendingTransition, Response, ResponseValue};
use crate::engine::resolver::RuleSet;
use crate::error::EngineError;
use crate::timeline::{self, TimelineSegment};

/// What a response submission produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// An automatic rule matched; the transition is committed.
    Applied { to_stage: String },
    /// A non-automatic rule matched; the proposal is held on the item
    /// until `confirm_manual_transition` is called.
    PendingManual { to_stage: String },
    /// No rule matched; the item stays in its stage awaiting explicit
    /// resolution.
    AwaitingResolution,
}

struct ItemRecord {
    item: Item,
    /// Latest response per question, keyed by question id.
    responses: HashMap<String, Response>,
    /// Question ids whose responses were consumed by a committed
    /// transition. Those responses are immutable from then on.
    consumed: HashSet<String>,
}

struct EngineState {
    items: HashMap<String, ItemRecord>,
    audit: AuditLog,
}

/// Orchestrates one tenant's stage progression.
pub struct ProgressionEngine {
    catalog: StageCatalog,
    registry: QuestionRegistry,
    rules: RuleSet,
    state: Mutex<EngineState>,
}

impl ProgressionEngine {
    pub fn new(catalog: StageCatalog, registry: QuestionRegistry, rules: RuleSet) -> Self {
        Self {
            catalog,
            registry,
            rules,
            state: Mutex::new(EngineState {
                items: HashMap::new(),
                audit: AuditLog::new(),
            }),
        }
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Create an item seeded at the tenant's lowest-sequence stage.
    pub fn create_item(
        &self,
        title: impl Into<String>,
        start_date: NaiveDate,
    ) -> Result<Item, EngineError> {
        let item = Item::new(
            self.catalog.tenant_id(),
            title,
            self.catalog.initial().id.clone(),
            start_date,
        );
        let mut state = self.lock();
        state.items.insert(
            item.id.clone(),
            ItemRecord {
                item: item.clone(),
                responses: HashMap::new(),
                consumed: HashSet::new(),
            },
        );
        Ok(item)
    }

    /// One-time bootstrap for an externally-created item that carries a
    /// status but no stage pointer: map the status to the first matching
    /// stage and record a `system` audit entry so reconstruction sees a
    /// full history. This is a migration operation, not a runtime branch.
    pub fn adopt_item(
        &self,
        title: impl Into<String>,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        status: ItemStatus,
    ) -> Result<Item, EngineError> {
        let stage = match status {
            ItemStatus::Planning => self.catalog.first_for_status(StatusMapping::Planning),
            ItemStatus::Active => self.catalog.first_for_status(StatusMapping::Active),
            ItemStatus::Completed => self.catalog.first_for_status(StatusMapping::Completed),
            // No cancelled-equivalent stage mapping exists; keep the item
            // where new items start and let the status speak for itself.
            ItemStatus::Cancelled => None,
        }
        .unwrap_or_else(|| self.catalog.initial());

        let mut item = Item::new(self.catalog.tenant_id(), title, stage.id.clone(), start_date);
        item.end_date = end_date;
        item.status = status;
        item.version = 1;

        let mut state = self.lock();
        state.audit.append(AuditEntry {
            item_id: item.id.clone(),
            from_stage: None,
            to_stage: Some(stage.id.clone()),
            trigger_source: TriggerSource::System,
            triggered_by: "bootstrap".to_string(),
            created_at: item.stage_entered_at,
            response_value: None,
            duration_in_previous_stage_hours: None,
        });
        state.items.insert(
            item.id.clone(),
            ItemRecord {
                item: item.clone(),
                responses: HashMap::new(),
                consumed: HashSet::new(),
            },
        );
        Ok(item)
    }

    /// Point-in-time snapshot of an item row.
    pub fn item(&self, item_id: &str) -> Result<Item, EngineError> {
        let state = self.lock();
        state
            .items
            .get(item_id)
            .map(|r| r.item.clone())
            .ok_or_else(|| EngineError::ItemNotFound(item_id.to_string()))
    }

    /// Write-through for the externally-owned lifecycle fields.
    pub fn sync_lifecycle(
        &self,
        item_id: &str,
        status: ItemStatus,
        end_date: Option<NaiveDate>,
    ) -> Result<Item, EngineError> {
        let mut state = self.lock();
        let record = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| EngineError::ItemNotFound(item_id.to_string()))?;
        record.item.status = status;
        record.item.end_date = end_date;
        record.item.version += 1;
        Ok(record.item.clone())
    }

    /// The next unanswered, unskipped question for the item's current
    /// stage, or `None` when the stage is complete and awaiting a
    /// transition or confirmation.
    pub fn next_question(&self, item_id: &str) -> Result<Option<Question>, EngineError> {
        let (item, prior) = self.snapshot(item_id)?;
        Ok(self
            .registry
            .next_question(&item.current_stage_id, &prior)
            .cloned())
    }

    /// Validate and record a response, then resolve and (for automatic
    /// rules) atomically apply the transition.
    pub fn submit_response(
        &self,
        item_id: &str,
        question_id: &str,
        raw_value: &str,
        responder: &str,
    ) -> Result<SubmitOutcome, EngineError> {
        let (item, _prior) = self.snapshot(item_id)?;
        let question = self
            .registry
            .by_id(question_id)
            .ok_or_else(|| EngineError::QuestionNotFound(question_id.to_string()))?
            .clone();

        // Resubmission for a stage the item has left would require
        // reopening a closed stage; reject it before any mutation. This is
        // also what makes a retried, already-applied submission idempotent:
        // no second audit entry can be produced.
        if question.stage_id != item.current_stage_id {
            return Err(EngineError::StaleStage {
                item_id: item.id.clone(),
                question: question.id.clone(),
                stage: question.stage_id.clone(),
            });
        }

        let value = ResponseValue::parse(&question, raw_value)?;
        let canonical = value.canonical();
        let resolution = self
            .rules
            .resolve(&item.current_stage_id, &question, &canonical)?;

        let response = Response {
            item_id: item.id.clone(),
            question_id: question.id.clone(),
            value,
            responder: responder.to_string(),
            recorded_at: Utc::now(),
        };

        self.commit(&item.id, item.version, |record, audit| {
            if record.consumed.contains(&question.id) {
                return Err(EngineError::Validation(format!(
                    "response to {} is immutable: a committed transition consumed it",
                    question.id
                )));
            }
            record.responses.insert(question.id.clone(), response);
            record.item.version += 1;

            match resolution {
                Some(res) if res.is_automatic() => {
                    let now = Utc::now();
                    let from = record.item.current_stage_id.clone();
                    let to = res.to_stage().to_string();
                    audit.append(AuditEntry {
                        item_id: record.item.id.clone(),
                        from_stage: Some(from.clone()),
                        to_stage: Some(to.clone()),
                        trigger_source: TriggerSource::QuestionResponse,
                        triggered_by: responder.to_string(),
                        created_at: now,
                        response_value: Some(canonical.clone()),
                        duration_in_previous_stage_hours: None,
                    });
                    record.item.current_stage_id = to.clone();
                    record.item.stage_entered_at = now;
                    record.item.pending_transition = None;
                    record.consumed.insert(question.id.clone());
                    tracing::debug!(item = %record.item.id, %from, %to, "transition applied");
                    Ok(SubmitOutcome::Applied { to_stage: to })
                }
                Some(res) => {
                    let to = res.to_stage().to_string();
                    record.item.pending_transition = Some(PendingTransition {
                        to_stage: to.clone(),
                        question_id: question.id.clone(),
                        response_value: canonical.clone(),
                        proposed_at: Utc::now(),
                    });
                    Ok(SubmitOutcome::PendingManual { to_stage: to })
                }
                None => Ok(SubmitOutcome::AwaitingResolution),
            }
        })
    }

    /// Apply the item's previously-proposed manual transition, with the
    /// same atomicity guarantee as an automatic one.
    pub fn confirm_manual_transition(
        &self,
        item_id: &str,
        actor: &str,
    ) -> Result<AuditEntry, EngineError> {
        let (item, _) = self.snapshot(item_id)?;
        let pending = item
            .pending_transition
            .clone()
            .ok_or_else(|| EngineError::NoPendingTransition(item.id.clone()))?;

        self.commit(&item.id, item.version, |record, audit| {
            let now = Utc::now();
            let from = record.item.current_stage_id.clone();
            let entry = AuditEntry {
                item_id: record.item.id.clone(),
                from_stage: Some(from.clone()),
                to_stage: Some(pending.to_stage.clone()),
                trigger_source: TriggerSource::Manual,
                triggered_by: actor.to_string(),
                created_at: now,
                response_value: Some(pending.response_value.clone()),
                duration_in_previous_stage_hours: None,
            };
            audit.append(entry.clone());
            record.item.current_stage_id = pending.to_stage.clone();
            record.item.stage_entered_at = now;
            record.item.pending_transition = None;
            record.consumed.insert(pending.question_id.clone());
            record.item.version += 1;
            tracing::debug!(item = %record.item.id, %from, to = %pending.to_stage, "manual transition confirmed");
            // Re-read with computed duration.
            Ok(audit
                .history(&record.item.id)
                .last()
                .cloned()
                .unwrap_or(entry))
        })
    }

    /// This item's audit entries, oldest first.
    pub fn audit_history(&self, item_id: &str) -> Vec<AuditEntry> {
        self.lock().audit.history(item_id)
    }

    /// Recorded responses for an item, keyed by question id.
    pub fn responses(&self, item_id: &str) -> Result<Vec<Response>, EngineError> {
        let state = self.lock();
        let record = state
            .items
            .get(item_id)
            .ok_or_else(|| EngineError::ItemNotFound(item_id.to_string()))?;
        let mut responses: Vec<Response> = record.responses.values().cloned().collect();
        responses.sort_by_key(|r| r.recorded_at);
        Ok(responses)
    }

    /// Display segments reconstructed from the item's audit history.
    /// Read-only over a point-in-time snapshot; safe to call concurrently
    /// for many items.
    pub fn timeline_segments(&self, item_id: &str) -> Result<Vec<TimelineSegment>, EngineError> {
        let item = self.item(item_id)?;
        let history = self.audit_history(item_id);
        Ok(timeline::segments(&item, &history, &self.catalog))
    }

    pub fn progress_percentage(&self, item_id: &str) -> Result<f64, EngineError> {
        let item = self.item(item_id)?;
        Ok(timeline::progress_percentage(&item, Utc::now()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        // Lock poisoning only happens if a panic escaped a critical
        // section; the state is still structurally sound for reads.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot the item row plus its prior responses (canonical strings
    /// keyed by question id).
    fn snapshot(&self, item_id: &str) -> Result<(Item, HashMap<String, String>), EngineError> {
        let state = self.lock();
        let record = state
            .items
            .get(item_id)
            .ok_or_else(|| EngineError::ItemNotFound(item_id.to_string()))?;
        let prior = record
            .responses
            .iter()
            .map(|(id, r)| (id.clone(), r.value.canonical()))
            .collect();
        Ok((record.item.clone(), prior))
    }

    /// Write-if-unchanged: re-lock, verify the version read earlier still
    /// holds, then run the mutation. Audit append and item update share
    /// the critical section.
    fn commit<T>(
        &self,
        item_id: &str,
        expected_version: u64,
        f: impl FnOnce(&mut ItemRecord, &mut AuditLog) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut state = self.lock();
        let state = &mut *state;
        let record = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| EngineError::ItemNotFound(item_id.to_string()))?;
        if record.item.version != expected_version {
            return Err(EngineError::Conflict {
                item_id: item_id.to_string(),
                expected: expected_version,
                found: record.item.version,
            });
        }
        f(record, &mut state.audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ResponseType, SkipClause, SkipOp, Stage, StageType};
    use crate::engine::resolver::TransitionRule;

    fn stage(id: &str, order: u32, status: StatusMapping) -> Stage {
        Stage {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: String::new(),
            color: "#3366FF".to_string(),
            sequence_order: order,
            stage_type: StageType::Standard,
            maps_to_status: status,
            min_duration_hours: None,
            max_duration_hours: None,
            active: true,
        }
    }

    fn question(id: &str, stage: &str, order: u32) -> Question {
        Question {
            id: id.to_string(),
            stage_id: stage.to_string(),
            text: format!("{id}?"),
            response_type: ResponseType::YesNo,
            sequence_order: order,
            choices: Vec::new(),
            skip_conditions: Vec::new(),
        }
    }

    fn rule(id: &str, from: &str, to: &str, trigger: &str, automatic: bool) -> TransitionRule {
        TransitionRule {
            id: id.to_string(),
            from_stage: from.to_string(),
            to_stage: to.to_string(),
            trigger_response: trigger.to_string(),
            question_id: None,
            is_automatic: automatic,
        }
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    /// intake --Yes--> survey --Yes--> done; review stage with a manual
    /// rule back to intake.
    fn engine() -> ProgressionEngine {
        let catalog = StageCatalog::new(
            "t1",
            vec![
                stage("intake", 1, StatusMapping::Planning),
                stage("survey", 2, StatusMapping::Active),
                stage("review", 3, StatusMapping::Active),
                stage("done", 4, StatusMapping::Completed),
            ],
        )
        .unwrap();
        let registry = QuestionRegistry::new(vec![
            question("qualified", "intake", 1),
            question("site-checked", "survey", 1),
            question("approved", "review", 1),
        ])
        .unwrap();
        let rules = RuleSet::new(vec![
            rule("r1", "intake", "survey", "Yes", true),
            rule("r2", "survey", "review", "Yes", true),
            rule("r3", "review", "done", "Yes", true),
            rule("r4", "review", "intake", "No", false),
        ]);
        ProgressionEngine::new(catalog, registry, rules)
    }

    #[test]
    fn item_seeded_at_lowest_sequence_stage() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();
        assert_eq!(item.current_stage_id, "intake");
        assert!(engine.audit_history(&item.id).is_empty());
    }

    #[test]
    fn automatic_transition_applies_atomically() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();

        let outcome = engine
            .submit_response(&item.id, "qualified", "Yes", "alice")
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Applied {
                to_stage: "survey".to_string()
            }
        );

        let item = engine.item(&item.id).unwrap();
        assert_eq!(item.current_stage_id, "survey");

        let history = engine.audit_history(&item.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_stage.as_deref(), Some("intake"));
        assert_eq!(history[0].to_stage.as_deref(), Some("survey"));
        assert_eq!(history[0].trigger_source, TriggerSource::QuestionResponse);
        assert_eq!(history[0].triggered_by, "alice");
        assert_eq!(history[0].response_value.as_deref(), Some("Yes"));
    }

    #[test]
    fn no_matching_rule_leaves_item_awaiting_resolution() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();

        let outcome = engine
            .submit_response(&item.id, "qualified", "No", "alice")
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::AwaitingResolution);

        let item = engine.item(&item.id).unwrap();
        assert_eq!(item.current_stage_id, "intake");
        assert!(engine.audit_history(&item.id).is_empty());
        // The response is still recorded.
        assert_eq!(engine.responses(&item.id).unwrap().len(), 1);
    }

    #[test]
    fn validation_error_causes_no_mutation() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();

        let result = engine.submit_response(&item.id, "qualified", "maybe", "alice");
        assert!(matches!(result, Err(EngineError::Validation(_))));

        let after = engine.item(&item.id).unwrap();
        assert_eq!(after.version, item.version);
        assert!(engine.responses(&item.id).unwrap().is_empty());
        assert!(engine.audit_history(&item.id).is_empty());
    }

    #[test]
    fn manual_rule_proposes_without_mutating_stage() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();
        engine
            .submit_response(&item.id, "qualified", "Yes", "alice")
            .unwrap();
        engine
            .submit_response(&item.id, "site-checked", "Yes", "alice")
            .unwrap();

        // review --No--> intake is manual.
        let outcome = engine
            .submit_response(&item.id, "approved", "No", "bob")
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::PendingManual {
                to_stage: "intake".to_string()
            }
        );

        let snapshot = engine.item(&item.id).unwrap();
        assert_eq!(snapshot.current_stage_id, "review");
        assert_eq!(engine.audit_history(&item.id).len(), 2);
        let pending = snapshot.pending_transition.unwrap();
        assert_eq!(pending.to_stage, "intake");
        assert_eq!(pending.response_value, "No");
    }

    #[test]
    fn confirm_applies_the_pending_manual_transition() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();
        engine
            .submit_response(&item.id, "qualified", "Yes", "alice")
            .unwrap();
        engine
            .submit_response(&item.id, "site-checked", "Yes", "alice")
            .unwrap();
        engine
            .submit_response(&item.id, "approved", "No", "bob")
            .unwrap();

        let entry = engine.confirm_manual_transition(&item.id, "supervisor").unwrap();
        assert_eq!(entry.trigger_source, TriggerSource::Manual);
        assert_eq!(entry.triggered_by, "supervisor");
        assert_eq!(entry.from_stage.as_deref(), Some("review"));
        assert_eq!(entry.to_stage.as_deref(), Some("intake"));

        let snapshot = engine.item(&item.id).unwrap();
        assert_eq!(snapshot.current_stage_id, "intake");
        assert!(snapshot.pending_transition.is_none());
        assert_eq!(engine.audit_history(&item.id).len(), 3);
    }

    #[test]
    fn confirm_without_pending_proposal_errors() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();
        let result = engine.confirm_manual_transition(&item.id, "supervisor");
        assert!(matches!(result, Err(EngineError::NoPendingTransition(_))));
    }

    #[test]
    fn resubmission_after_transition_is_rejected_without_new_audit_entry() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();
        engine
            .submit_response(&item.id, "qualified", "Yes", "alice")
            .unwrap();
        assert_eq!(engine.audit_history(&item.id).len(), 1);

        // Retried submission of the already-applied transition.
        let result = engine.submit_response(&item.id, "qualified", "Yes", "alice");
        assert!(matches!(result, Err(EngineError::StaleStage { .. })));
        assert_eq!(engine.audit_history(&item.id).len(), 1);
        assert_eq!(
            engine.item(&item.id).unwrap().current_stage_id,
            "survey"
        );
    }

    #[test]
    fn reanswering_within_stage_overwrites_when_nothing_committed() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();

        engine
            .submit_response(&item.id, "qualified", "No", "alice")
            .unwrap();
        let outcome = engine
            .submit_response(&item.id, "qualified", "Yes", "alice")
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Applied {
                to_stage: "survey".to_string()
            }
        );
        assert_eq!(engine.responses(&item.id).unwrap().len(), 1);
    }

    #[test]
    fn stale_version_commit_is_a_conflict() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();

        // Another mutation lands between snapshot and commit.
        {
            let mut state = engine.lock();
            state.items.get_mut(&item.id).unwrap().item.version += 1;
        }

        let result = engine.submit_response(&item.id, "qualified", "Yes", "alice");
        assert!(matches!(result, Err(EngineError::Conflict { .. })));
        assert!(engine.audit_history(&item.id).is_empty());
    }

    #[test]
    fn next_question_walks_stage_and_honors_skips() {
        let catalog = StageCatalog::new(
            "t1",
            vec![
                stage("intake", 1, StatusMapping::Planning),
                stage("done", 2, StatusMapping::Completed),
            ],
        )
        .unwrap();
        let mut follow_up = question("follow-up", "intake", 2);
        follow_up.skip_conditions = vec![SkipClause {
            question_id: "qualified".to_string(),
            op: SkipOp::Equals {
                value: "Yes".to_string(),
            },
        }];
        let registry =
            QuestionRegistry::new(vec![question("qualified", "intake", 1), follow_up]).unwrap();
        let rules = RuleSet::new(vec![]);
        let engine = ProgressionEngine::new(catalog, registry, rules);

        let item = engine.create_item("Install roof", start()).unwrap();
        assert_eq!(engine.next_question(&item.id).unwrap().unwrap().id, "qualified");

        engine
            .submit_response(&item.id, "qualified", "Yes", "alice")
            .unwrap();
        // "Yes" satisfies the skip condition: stage is complete.
        assert!(engine.next_question(&item.id).unwrap().is_none());
    }

    #[test]
    fn adopt_item_maps_status_and_writes_system_entry() {
        let engine = engine();
        let item = engine
            .adopt_item("Legacy job", start(), None, ItemStatus::Active)
            .unwrap();
        assert_eq!(item.current_stage_id, "survey");

        let history = engine.audit_history(&item.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trigger_source, TriggerSource::System);
        assert!(history[0].from_stage.is_none());
        assert_eq!(history[0].to_stage.as_deref(), Some("survey"));
    }

    #[test]
    fn adopt_cancelled_item_falls_back_to_initial_stage() {
        let engine = engine();
        let item = engine
            .adopt_item("Dead deal", start(), None, ItemStatus::Cancelled)
            .unwrap();
        assert_eq!(item.current_stage_id, "intake");
    }

    #[test]
    fn sync_lifecycle_updates_external_fields() {
        let engine = engine();
        let item = engine.create_item("Install roof", start()).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        let updated = engine
            .sync_lifecycle(&item.id, ItemStatus::Completed, Some(end))
            .unwrap();
        assert_eq!(updated.status, ItemStatus::Completed);
        assert_eq!(updated.end_date, Some(end));
        assert_eq!(updated.version, item.version + 1);
    }

    #[test]
    fn unknown_item_and_question_are_reported() {
        let engine = engine();
        assert!(matches!(
            engine.submit_response("ghost", "qualified", "Yes", "a"),
            Err(EngineError::ItemNotFound(_))
        ));
        let item = engine.create_item("Install roof", start()).unwrap();
        assert!(matches!(
            engine.submit_response(&item.id, "ghost", "Yes", "a"),
            Err(EngineError::QuestionNotFound(_))
        ));
    }
}
