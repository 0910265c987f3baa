//! Question-driven stage progression engine for multi-tenant job tracking.
//!
//! A per-tenant configurable state machine advances a work item through an
//! ordered sequence of stages. Transitions are driven by answers to
//! dynamic questions, recorded in an append-only audit trail, and later
//! reconstructed into a gap-free, non-overlapping timeline for display.
//!
//! - [`catalog`] — stage graph and question registry (loaded configuration)
//! - [`engine`] — transition resolution and the progression engine itself
//! - [`audit`] — the append-only transition ledger
//! - [`timeline`] — read-time reconstruction and progress math
//! - [`config`] — TOML tenant configuration with a built-in seed pipeline

pub mod audit;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod timeline;
pub mod ui;

pub use engine::{ProgressionEngine, SubmitOutcome};
pub use error::EngineError;
