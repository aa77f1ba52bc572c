//! Pipeline execution.
//!
//! This module provides:
//! - The retry policy evaluator
//! - The stage executor (deadlines, retries, cancellation)
//! - The fault-isolating batch runner
//! - Checkpoint stores for resumable runs
//! - The two-stage orchestrator and its interval schedule

mod batch;
mod checkpoint;
mod executor;
mod failure_tolerance;
mod orchestrator;
mod retry;
mod schedule;


pub use batch::{BatchCancelled, BatchOutcome, BatchRunner, ItemOutcome};
pub use checkpoint::{
    checkpoint_key, Checkpoint, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
pub use executor::{Attempted, StageExecutor, DEFAULT_START_TO_CLOSE};
pub use failure_tolerance::{FailureCollector, FailureRecord, FailureSummary};
pub use orchestrator::{run_pipeline, PipelineOrchestrator, RunReport};
pub use retry::{AttemptState, RetryDecision, RetryPolicy};
pub use schedule::{Schedule, ScheduleSummary};
