//! Event sink system for observability.
//!
//! Sinks are injected into the orchestrator and passed down to the stage
//! executor and batch runner. Event type names live in [`kinds`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the pipeline.
pub mod kinds {
    /// An attempt of a stage call failed.
    pub const ATTEMPT_FAILED: &str = "stage.attempt_failed";
    /// A retry was scheduled after a backoff wait.
    pub const RETRY_SCHEDULED: &str = "stage.retry_scheduled";
    /// The retry policy gave up.
    pub const GAVE_UP: &str = "stage.gave_up";
    /// An identifier was dropped from the batch.
    pub const ITEM_DROPPED: &str = "batch.item_dropped";
    /// A row was appended to the batch.
    pub const ITEM_PROJECTED: &str = "batch.item_projected";
    /// The run moved to a new state.
    pub const STATE_CHANGED: &str = "pipeline.state_changed";
    /// Stage A output was restored from a checkpoint.
    pub const CHECKPOINT_RESTORED: &str = "pipeline.checkpoint_restored";
    /// A checkpoint was written.
    pub const CHECKPOINT_SAVED: &str = "pipeline.checkpoint_saved";
    /// A stage B checkpoint could not be written.
    pub const CHECKPOINT_SAVE_FAILED: &str = "pipeline.checkpoint_save_failed";
}
