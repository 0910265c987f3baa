mod question;
mod stage;

pub use question::{Question, QuestionRegistry, ResponseType, SkipClause, SkipOp};
pub use stage::{Stage, StageCatalog, StageType, StatusMapping};
