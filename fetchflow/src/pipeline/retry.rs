//! Retry policy evaluation with deterministic exponential backoff.
//!
//! The evaluator is a pure function of the attempt state and the newly
//! observed error. It never sleeps; the stage executor does.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::errors::{ConfigError, ErrorClass, StageError};

/// Configuration for retry behavior.
///
/// Defaults: 1s initial interval, coefficient 2.0, maximum interval 100x the
/// initial interval, unbounded attempts, empty non-retryable set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry, in seconds.
    #[serde(default = "default_initial_interval")]
    pub initial_interval_seconds: f64,
    /// Growth factor applied per attempt.
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    /// Per-wait cap in seconds. `None` means 100x the initial interval.
    #[serde(default)]
    pub maximum_interval_seconds: Option<f64>,
    /// Attempt limit including the first. `None` is unbounded.
    #[serde(default)]
    pub maximum_attempts: Option<u32>,
    /// Give up once retrying would exceed this total elapsed time.
    #[serde(default)]
    pub maximum_elapsed_seconds: Option<f64>,
    /// Classifications never retried.
    #[serde(default)]
    pub non_retryable: BTreeSet<ErrorClass>,
}

fn default_initial_interval() -> f64 {
    1.0
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_seconds: default_initial_interval(),
            backoff_coefficient: default_backoff_coefficient(),
            maximum_interval_seconds: None,
            maximum_attempts: None,
            maximum_elapsed_seconds: None,
            non_retryable: BTreeSet::new(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial interval.
    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval_seconds = interval.as_secs_f64();
        self
    }

    /// Sets the backoff coefficient.
    #[must_use]
    pub const fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Sets the maximum interval.
    #[must_use]
    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval_seconds = Some(interval.as_secs_f64());
        self
    }

    /// Bounds the number of attempts.
    #[must_use]
    pub const fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = Some(attempts);
        self
    }

    /// Bounds the total time spent retrying.
    #[must_use]
    pub fn with_maximum_elapsed(mut self, elapsed: Duration) -> Self {
        self.maximum_elapsed_seconds = Some(elapsed.as_secs_f64());
        self
    }

    /// Marks a classification as non-retryable.
    #[must_use]
    pub fn with_non_retryable(mut self, class: ErrorClass) -> Self {
        self.non_retryable.insert(class);
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn initial_interval(&self) -> Duration {
        seconds(self.initial_interval_seconds)
    }

    /// Per-wait cap.
    #[must_use]
    pub fn maximum_interval(&self) -> Duration {
        seconds(
            self.maximum_interval_seconds
                .unwrap_or(self.initial_interval_seconds * 100.0),
        )
    }

    /// Checks that the policy can be evaluated.
    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if !self.initial_interval_seconds.is_finite() || self.initial_interval_seconds <= 0.0 {
            return Err(ConfigError::invalid(
                format!("{field}.initial_interval_seconds"),
                "must be a positive number",
            ));
        }
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(ConfigError::invalid(
                format!("{field}.backoff_coefficient"),
                "must be at least 1.0",
            ));
        }
        if let Some(max) = self.maximum_interval_seconds {
            if !max.is_finite() || max < self.initial_interval_seconds {
                return Err(ConfigError::invalid(
                    format!("{field}.maximum_interval_seconds"),
                    "must not be below the initial interval",
                ));
            }
        }
        if self.maximum_attempts == Some(0) {
            return Err(ConfigError::invalid(
                format!("{field}.maximum_attempts"),
                "must be at least 1",
            ));
        }
        if let Some(elapsed) = self.maximum_elapsed_seconds {
            if !elapsed.is_finite() || elapsed <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("{field}.maximum_elapsed_seconds"),
                    "must be a positive number",
                ));
            }
        }
        Ok(())
    }

    /// Backoff after the given failed attempt (1-based).
    ///
    /// `min(initial * coefficient^(attempt-1), maximum)`. Saturates at the
    /// maximum instead of overflowing.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let cap = self.maximum_interval().as_secs_f64();
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.initial_interval_seconds * self.backoff_coefficient.powi(exponent);
        if raw.is_finite() && raw < cap {
            seconds(raw)
        } else {
            seconds(cap)
        }
    }

    /// Decides what to do after `error` ended the attempt in `state`.
    #[must_use]
    pub fn evaluate(&self, state: &AttemptState, error: &StageError) -> RetryDecision {
        if !error.is_retryable() || self.non_retryable.contains(&error.class) {
            return RetryDecision::GiveUp(error.clone());
        }
        if self.maximum_attempts.is_some_and(|max| state.attempt >= max) {
            return RetryDecision::GiveUp(error.clone());
        }

        let after = self.backoff_for(state.attempt);
        if let Some(limit) = self.maximum_elapsed_seconds {
            if state.elapsed.saturating_add(after).as_secs_f64() > limit {
                return RetryDecision::GiveUp(error.clone());
            }
        }
        RetryDecision::Retry(after)
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries; carries the final error.
    GiveUp(StageError),
}

/// Progress of one stage executor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptState {
    /// Current attempt number, starting at 1.
    pub attempt: u32,
    /// Time spent since the first attempt started.
    pub elapsed: Duration,
    /// Classification of the most recent failure.
    pub last_error: Option<ErrorClass>,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptState {
    /// State at the first attempt.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attempt: 1,
            elapsed: Duration::ZERO,
            last_error: None,
        }
    }

    /// Records a failure observed after `elapsed` total time.
    pub fn record_failure(&mut self, class: ErrorClass, elapsed: Duration) {
        self.last_error = Some(class);
        self.elapsed = elapsed;
    }

    /// Moves to the next attempt.
    pub fn next_attempt(&mut self, elapsed: Duration) {
        self.attempt = self.attempt.saturating_add(1);
        self.elapsed = elapsed;
    }
}
