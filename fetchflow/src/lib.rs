//! # Fetchflow
//!
//! A two-stage remote fetch pipeline.
//!
//! A run lists identifiers from a remote service, then fetches, validates
//! and projects the record for each one. Fetchflow provides:
//!
//! - **Retry policies**: deterministic exponential backoff with attempt and
//!   elapsed-time limits and classified non-retryable errors
//! - **Deadlines**: a start-to-close timeout per call and an optional
//!   deadline for the whole run
//! - **Fault isolation**: an identifier that cannot be fetched or projected
//!   is dropped and the batch carries on, keeping input order
//! - **Durable checkpoints**: interrupted runs resume without repeating the
//!   listing call or finished identifiers
//! - **Cancellation** observed at every call and backoff wait
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fetchflow::prelude::*;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::load("fetchflow.toml")?;
//! let source = Arc::new(HttpSource::new(config.source.clone())?);
//! let report = PipelineOrchestrator::new(config, source)?.run().await?;
//!
//! for row in report.result.top_by("views", 10).rows() {
//!     println!("{:?}", row.values());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod projection;
pub mod source;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{PipelineConfig, ScheduleConfig, SourceConfig, StageConfig};
    pub use crate::core::{BatchResult, Identifier, ProjectedRow, RawRecord, RunState};
    pub use crate::errors::{
        CheckpointError, ConfigError, ErrorClass, FatalError, FetchflowError, PipelineError,
        StageError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        run_pipeline, BatchRunner, CheckpointStore, FailureRecord, FailureSummary,
        FileCheckpointStore, InMemoryCheckpointStore, PipelineOrchestrator, RetryPolicy,
        RunReport, Schedule, StageExecutor,
    };
    pub use crate::projection::{Column, ColumnSource, Projection};
    pub use crate::source::RemoteSource;

    #[cfg(feature = "http")]
    pub use crate::source::HttpSource;
}
