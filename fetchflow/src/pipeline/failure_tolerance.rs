//! Failure records for identifiers dropped by the batch runner.
//!
//! Dropped identifiers never appear in the [`BatchResult`]; they are kept
//! here for observability and the run report.
//!
//! [`BatchResult`]: crate::core::BatchResult

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Identifier;
use crate::errors::{ErrorClass, StageError};

/// Record of one dropped identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The identifier that produced no row.
    pub identifier: Identifier,
    /// Classification of the failure.
    pub classification: ErrorClass,
    /// Error message.
    pub error: String,
    /// Attempts made before the identifier was dropped.
    pub attempts: u32,
    /// Whether the run deadline, not a per-call timeout, dropped it.
    #[serde(default)]
    pub hard_stop: bool,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(identifier: Identifier, error: &StageError, attempts: u32) -> Self {
        Self {
            identifier,
            classification: error.class,
            error: error.message.clone(),
            attempts,
            hard_stop: error.hard_stop,
            timestamp: Utc::now(),
        }
    }

    /// Returns true for any deadline failure, per-call or run-wide.
    #[must_use]
    pub fn is_deadline(&self) -> bool {
        self.classification == ErrorClass::DeadlineExceeded
    }

    /// Returns true if the run deadline dropped the identifier.
    #[must_use]
    pub const fn is_hard_stop(&self) -> bool {
        self.hard_stop
    }
}

/// Summary of failures during a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Identifiers handed to the batch.
    pub total: usize,
    /// Identifiers that produced a row.
    pub succeeded: usize,
    /// Dropped identifiers in processing order.
    pub failures: Vec<FailureRecord>,
}

impl FailureSummary {
    /// Returns the share of identifiers that produced a row.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64
    }

    /// Returns true if any identifier was dropped.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Identifiers that were dropped.
    #[must_use]
    pub fn dropped_identifiers(&self) -> Vec<&Identifier> {
        self.failures.iter().map(|f| &f.identifier).collect()
    }

    /// Number of failures with the given classification.
    #[must_use]
    pub fn count_of(&self, class: ErrorClass) -> usize {
        self.failures.iter().filter(|f| f.classification == class).count()
    }
}

/// Collects failures while a batch runs.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Vec<FailureRecord>,
    succeeded: usize,
}

impl FailureCollector {
    /// Creates a new failure collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores state from an earlier, interrupted run.
    #[must_use]
    pub const fn resume(failures: Vec<FailureRecord>, succeeded: usize) -> Self {
        Self {
            failures,
            succeeded,
        }
    }

    /// Records a dropped identifier.
    pub fn record_failure(&mut self, record: FailureRecord) {
        self.failures.push(record);
    }

    /// Records an identifier that produced a row.
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    /// Returns all failures so far.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Creates a summary for a batch of `total` identifiers.
    #[must_use]
    pub fn summary(&self, total: usize) -> FailureSummary {
        FailureSummary {
            total,
            succeeded: self.succeeded,
            failures: self.failures.clone(),
        }
    }
}
