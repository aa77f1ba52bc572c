//! Core data types for fetchflow pipelines.

mod identifier;
mod row;
mod status;

pub use identifier::{Identifier, RawRecord};
pub use row::{BatchResult, ProjectedRow};
pub use status::{IllegalTransition, RunState, RunStateMachine};
