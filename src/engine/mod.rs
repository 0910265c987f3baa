mod item;
mod progression;
mod resolver;

pub use item::{Item, ItemStatus, PendingTransition, Response, ResponseValue};
pub use progression::{ProgressionEngine, SubmitOutcome};
pub use resolver::{Resolution, RuleSet, TransitionRule};
