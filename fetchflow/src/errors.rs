//! Error types for the fetchflow pipeline.
//!
//! Every remote failure is carried as a [`StageError`] tagged with an
//! [`ErrorClass`]. The class decides whether the retry evaluator may retry it
//! and whether the batch runner isolates it. Exhausted retries become a
//! [`FatalError`]; the outcome of a whole run is a [`PipelineError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The main error type for fetchflow operations.
#[derive(Debug, Error)]
pub enum FetchflowError {
    /// A pipeline run did not complete.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration was rejected.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A checkpoint could not be read or written.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// Tracing could not be initialised.
    #[error("Tracing initialisation failed: {0}")]
    Tracing(String),
}

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network failure, 5xx or throttling.
    TransientRemote,
    /// Not found, undecodable body or missing projection fields.
    MalformedResponse,
    /// The call did not finish before its deadline.
    DeadlineExceeded,
    /// Excluded from retries by policy or by the remote's answer.
    NonRetryableConfigured,
}

impl ErrorClass {
    /// Returns true if errors of this class may ever be retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientRemote | Self::DeadlineExceeded)
    }

    /// Returns the snake_case name used in events and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientRemote => "transient_remote",
            Self::MalformedResponse => "malformed_response",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NonRetryableConfigured => "non_retryable_configured",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of one remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{class}: {message}")]
pub struct StageError {
    /// Classification driving retry and isolation.
    pub class: ErrorClass,
    /// Human-readable description.
    pub message: String,
    /// Set when the pipeline's outermost deadline produced this error.
    #[serde(default)]
    pub hard_stop: bool,
}

impl StageError {
    /// Creates a new stage error.
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            hard_stop: false,
        }
    }

    /// Network or server-side failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::TransientRemote, message)
    }

    /// The remote answered with something unusable.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::MalformedResponse, message)
    }

    /// Failure the policy never retries.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NonRetryableConfigured, message)
    }

    /// The per-call deadline elapsed.
    #[must_use]
    pub fn deadline_exceeded(after: Duration) -> Self {
        Self::new(
            ErrorClass::DeadlineExceeded,
            format!("call did not complete within {}ms", after.as_millis()),
        )
    }

    /// The pipeline's outermost deadline elapsed.
    #[must_use]
    pub fn run_deadline_exceeded() -> Self {
        Self {
            class: ErrorClass::DeadlineExceeded,
            message: "pipeline run deadline reached".to_string(),
            hard_stop: true,
        }
    }

    /// Returns true unless the class or a hard stop forbids a retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.class.is_retryable() && !self.hard_stop
    }
}

/// A stage gave up after exhausting its retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("stage '{stage}' gave up after {attempts} attempt(s): {last_error}")]
pub struct FatalError {
    /// Stage that gave up.
    pub stage: String,
    /// The last observed error.
    pub last_error: StageError,
    /// Total attempts made, including the first.
    pub attempts: u32,
}

/// Why a stage executor stopped without producing output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Retries exhausted or the error was not retryable.
    #[error("{0}")]
    GaveUp(#[from] FatalError),

    /// The pipeline was cancelled at a suspension point.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// Cancellation reason.
        reason: String,
    },
}

/// Terminal outcome of a run that did not complete.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Stage A exhausted its retries.
    #[error("pipeline failed after {attempts} attempt(s): {error}")]
    Failed {
        /// Last classified error.
        error: StageError,
        /// Total attempts made by the failing stage.
        attempts: u32,
    },

    /// The run was cancelled.
    #[error("pipeline cancelled: {reason}")]
    Cancelled {
        /// Cancellation reason.
        reason: String,
    },

    /// The checkpoint store failed.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// The run was configured with unusable values.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The orchestrator attempted a transition the run state machine rejects.
    #[error("{0}")]
    IllegalTransition(#[from] crate::core::IllegalTransition),
}

impl PipelineError {
    /// Returns true for the `Cancelled` outcome.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true for the `Failed` outcome.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl From<FatalError> for PipelineError {
    fn from(err: FatalError) -> Self {
        Self::Failed {
            error: err.last_error,
            attempts: err.attempts,
        }
    }
}

impl From<ExecutionError> for PipelineError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::GaveUp(fatal) => fatal.into(),
            ExecutionError::Cancelled { reason } => Self::Cancelled { reason },
        }
    }
}

/// Invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds an unusable value.
    #[error("invalid config field '{field}': {reason}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),

    /// The file could not be read.
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Creates an invalid-field error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of the durable checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the backing storage failed.
    #[error("checkpoint IO error for '{key}': {source}")]
    Io {
        /// Checkpoint key.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The stored checkpoint could not be decoded.
    #[error("checkpoint '{key}' is corrupt: {reason}")]
    Corrupt {
        /// Checkpoint key.
        key: String,
        /// Decoder message.
        reason: String,
    },

    /// The stored checkpoint was written for a different projection.
    #[error("checkpoint '{key}' has columns {found:?}, expected {expected:?}")]
    Incompatible {
        /// Checkpoint key.
        key: String,
        /// Columns of the current projection.
        expected: Vec<String>,
        /// Columns stored in the checkpoint.
        found: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class_retryable() {
        assert!(ErrorClass::TransientRemote.is_retryable());
        assert!(ErrorClass::DeadlineExceeded.is_retryable());
        assert!(!ErrorClass::MalformedResponse.is_retryable());
        assert!(!ErrorClass::NonRetryableConfigured.is_retryable());
    }

    #[test]
    fn test_error_class_serde_names() {
        let json = serde_json::to_string(&ErrorClass::NonRetryableConfigured).unwrap();
        assert_eq!(json, r#""non_retryable_configured""#);

        let parsed: ErrorClass = serde_json::from_str(r#""malformed_response""#).unwrap();
        assert_eq!(parsed, ErrorClass::MalformedResponse);
        assert_eq!(parsed.to_string(), "malformed_response");
    }

    #[test]
    fn test_hard_stop_is_not_retryable() {
        let soft = StageError::deadline_exceeded(Duration::from_secs(15));
        assert!(soft.is_retryable());

        let hard = StageError::run_deadline_exceeded();
        assert_eq!(hard.class, ErrorClass::DeadlineExceeded);
        assert!(!hard.is_retryable());
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::transient("connection reset");
        assert_eq!(err.to_string(), "transient_remote: connection reset");
    }

    #[test]
    fn test_fatal_error_into_pipeline_failed() {
        let fatal = FatalError {
            stage: "list_identifiers".to_string(),
            last_error: StageError::transient("503"),
            attempts: 3,
        };
        assert!(fatal.to_string().contains("after 3 attempt(s)"));

        let err: PipelineError = ExecutionError::GaveUp(fatal).into();
        assert!(err.is_failed());
        match err {
            PipelineError::Failed { error, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(error.class, ErrorClass::TransientRemote);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_is_distinct_from_failed() {
        let err: PipelineError = ExecutionError::Cancelled {
            reason: "shutdown".to_string(),
        }
        .into();
        assert!(err.is_cancelled());
        assert!(!err.is_failed());
    }
}
