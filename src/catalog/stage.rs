use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Behavioral classification of a stage within a tenant's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Standard,
    Milestone,
    Approval,
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageType::Standard => write!(f, "standard"),
            StageType::Milestone => write!(f, "milestone"),
            StageType::Approval => write!(f, "approval"),
        }
    }
}

/// Coarse lifecycle status a stage maps onto for external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusMapping {
    Planning,
    Active,
    Completed,
}

/// One node in a tenant's ordered job-progression sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Display color in `#RRGGBB` form.
    pub color: String,
    /// Positive, unique per tenant. Defines the total order of the pipeline.
    pub sequence_order: u32,
    pub stage_type: StageType,
    pub maps_to_status: StatusMapping,
    #[serde(default)]
    pub min_duration_hours: Option<f64>,
    #[serde(default)]
    pub max_duration_hours: Option<f64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Stage {
    /// A stage is terminal when it maps the item to a completed status.
    /// No further forward transition is expected from it.
    pub fn is_terminal(&self) -> bool {
        self.maps_to_status == StatusMapping::Completed
    }
}

/// Per-tenant ordered catalog of stage definitions.
///
/// Construction validates the tenant's configuration; once built, the
/// catalog is read-only and the stages are held sorted by `sequence_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCatalog {
    tenant_id: String,
    stages: Vec<Stage>,
}

impl StageCatalog {
    /// Build a catalog, validating the stage set:
    ///
    /// - at least one active stage (items need somewhere to start)
    /// - `sequence_order` positive and unique across active stages
    /// - colors in `#RRGGBB` form
    /// - `max_duration_hours` ≥ `min_duration_hours` when both set
    pub fn new(tenant_id: impl Into<String>, mut stages: Vec<Stage>) -> Result<Self, EngineError> {
        let tenant_id = tenant_id.into();

        if !stages.iter().any(|s| s.active) {
            return Err(EngineError::Configuration(format!(
                "tenant {tenant_id} has no active stages"
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for stage in stages.iter().filter(|s| s.active) {
            if stage.sequence_order == 0 {
                return Err(EngineError::Configuration(format!(
                    "stage {} has sequence_order 0; orders start at 1",
                    stage.id
                )));
            }
            if !seen.insert(stage.sequence_order) {
                return Err(EngineError::Configuration(format!(
                    "duplicate sequence_order {} in tenant {tenant_id}",
                    stage.sequence_order
                )));
            }
        }

        for stage in &stages {
            if !is_hex_color(&stage.color) {
                return Err(EngineError::Configuration(format!(
                    "stage {} has malformed color {:?} (expected #RRGGBB)",
                    stage.id, stage.color
                )));
            }
            if let (Some(min), Some(max)) = (stage.min_duration_hours, stage.max_duration_hours)
                && max < min
            {
                return Err(EngineError::Configuration(format!(
                    "stage {} has max_duration_hours {max} below min {min}",
                    stage.id
                )));
            }
        }

        stages.sort_by_key(|s| s.sequence_order);
        Ok(Self { tenant_id, stages })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Active stages in `sequence_order`, i.e. the tenant's pipeline.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.active)
    }

    pub fn by_id(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// The stage new items are seeded into: lowest active `sequence_order`.
    pub fn initial(&self) -> &Stage {
        // Validated non-empty in `new`.
        self.stages
            .iter()
            .find(|s| s.active)
            .unwrap_or(&self.stages[0])
    }

    /// First active stage mapping to the given status, used by the one-time
    /// adopt bootstrap for items that carry a status but no stage pointer.
    pub fn first_for_status(&self, status: StatusMapping) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.active && s.maps_to_status == status)
    }

    pub fn is_terminal_stage(&self, id: &str) -> bool {
        self.by_id(id).is_some_and(Stage::is_terminal)
    }
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7
        && s.starts_with('#')
        && s.chars().skip(1).all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn catalog_orders_by_sequence() {
        let catalog = StageCatalog::new(
            "t1",
            vec![
                stage("done", 3, StatusMapping::Completed),
                stage("lead", 1, StatusMapping::Planning),
                stage("work", 2, StatusMapping::Active),
            ],
        )
        .unwrap();

        let ids: Vec<&str> = catalog.stages().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["lead", "work", "done"]);
        assert_eq!(catalog.initial().id, "lead");
    }

    #[test]
    fn duplicate_sequence_order_rejected() {
        let result = StageCatalog::new(
            "t1",
            vec![
                stage("a", 1, StatusMapping::Planning),
                stage("b", 1, StatusMapping::Active),
            ],
        );
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn zero_sequence_order_rejected() {
        let result = StageCatalog::new("t1", vec![stage("a", 0, StatusMapping::Planning)]);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn retired_stages_excluded_from_pipeline_but_resolvable() {
        let mut old = stage("legacy", 2, StatusMapping::Active);
        old.active = false;
        let catalog = StageCatalog::new(
            "t1",
            vec![stage("lead", 1, StatusMapping::Planning), old],
        )
        .unwrap();

        assert_eq!(catalog.stages().count(), 1);
        // Old audit rows may still reference it.
        assert!(catalog.by_id("legacy").is_some());
    }

    #[test]
    fn duplicate_order_allowed_when_one_is_retired() {
        let mut old = stage("legacy", 1, StatusMapping::Planning);
        old.active = false;
        let catalog =
            StageCatalog::new("t1", vec![stage("lead", 1, StatusMapping::Planning), old]);
        assert!(catalog.is_ok());
    }

    #[test]
    fn malformed_color_rejected() {
        let mut bad = stage("a", 1, StatusMapping::Planning);
        bad.color = "blue".to_string();
        let result = StageCatalog::new("t1", vec![bad]);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn max_duration_below_min_rejected() {
        let mut bad = stage("a", 1, StatusMapping::Planning);
        bad.min_duration_hours = Some(24.0);
        bad.max_duration_hours = Some(8.0);
        let result = StageCatalog::new("t1", vec![bad]);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn no_active_stages_rejected() {
        let mut only = stage("a", 1, StatusMapping::Planning);
        only.active = false;
        let result = StageCatalog::new("t1", vec![only]);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn terminal_stage_detection() {
        let catalog = StageCatalog::new(
            "t1",
            vec![
                stage("work", 1, StatusMapping::Active),
                stage("done", 2, StatusMapping::Completed),
            ],
        )
        .unwrap();
        assert!(catalog.is_terminal_stage("done"));
        assert!(!catalog.is_terminal_stage("work"));
        assert!(!catalog.is_terminal_stage("missing"));
    }

    #[test]
    fn first_for_status_bootstrap_lookup() {
        let catalog = StageCatalog::new(
            "t1",
            vec![
                stage("lead", 1, StatusMapping::Planning),
                stage("work", 2, StatusMapping::Active),
                stage("more-work", 3, StatusMapping::Active),
                stage("done", 4, StatusMapping::Completed),
            ],
        )
        .unwrap();
        assert_eq!(
            catalog.first_for_status(StatusMapping::Active).unwrap().id,
            "work"
        );
    }

    #[test]
    fn stage_type_display() {
        assert_eq!(StageType::Standard.to_string(), "standard");
        assert_eq!(StageType::Milestone.to_string(), "milestone");
        assert_eq!(StageType::Approval.to_string(), "approval");
    }
}
