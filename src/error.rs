use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid response: {0}")]
    Validation(String),

    #[error("Concurrent update on item {item_id}: expected version {expected}, found {found}")]
    Conflict {
        item_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Question not found: {0}")]
    QuestionNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("No pending manual transition for item {0}")]
    NoPendingTransition(String),

    #[error("Question {question} belongs to stage {stage}, but item {item_id} has moved on")]
    StaleStage {
        item_id: String,
        question: String,
        stage: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    /// True for errors the caller may resolve by refetching state and
    /// re-issuing the operation as a fresh call. The engine itself never
    /// retries.
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_versions() {
        let err = EngineError::Conflict {
            item_id: "item-1".into(),
            expected: 3,
            found: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("item-1"));
        assert!(msg.contains("expected version 3"));
        assert!(msg.contains("found 4"));
    }

    #[test]
    fn only_conflict_is_caller_retryable() {
        assert!(
            EngineError::Conflict {
                item_id: "x".into(),
                expected: 0,
                found: 1
            }
            .is_retryable_by_caller()
        );
        assert!(!EngineError::Validation("bad".into()).is_retryable_by_caller());
        assert!(!EngineError::Configuration("dup".into()).is_retryable_by_caller());
    }
}
