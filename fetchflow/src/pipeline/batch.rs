//! Fault-isolating batch runner for the per-identifier fetch stage.
//!
//! Identifiers are processed strictly in input order. A fetch that exhausts
//! its retries, or a record that fails the projection, drops that identifier
//! and processing continues with the next one. Only cancellation stops a
//! batch early; a passed run deadline drops every identifier not yet fetched.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::executor::StageExecutor;
use super::failure_tolerance::{FailureCollector, FailureRecord, FailureSummary};
use crate::core::{BatchResult, Identifier, ProjectedRow, RawRecord};
use crate::errors::{ExecutionError, StageError};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::projection::Projection;

/// What happened to one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// A row was appended.
    Projected,
    /// The identifier was dropped; the batch continues.
    Dropped,
    /// The run deadline passed; nothing further can be fetched.
    DeadlineReached,
}

/// The batch stopped because the pipeline was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("batch cancelled: {reason}")]
pub struct BatchCancelled {
    /// Cancellation reason.
    pub reason: String,
}

/// Rows and failures produced by a finished batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Rows in identifier order.
    pub result: BatchResult,
    /// Dropped identifiers.
    pub failures: FailureSummary,
}

/// Drives the fetch stage across a list of identifiers.
///
/// Owns the accumulating [`BatchResult`] until [`finish`](Self::finish).
pub struct BatchRunner {
    executor: StageExecutor,
    projection: Projection,
    result: BatchResult,
    collector: FailureCollector,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("stage", &self.executor.stage())
            .field("rows", &self.result.len())
            .field("failures", &self.collector.failures().len())
            .finish_non_exhaustive()
    }
}

impl BatchRunner {
    /// Creates a runner with an empty result.
    #[must_use]
    pub fn new(executor: StageExecutor, projection: Projection) -> Self {
        let result = BatchResult::new(projection.column_names());
        Self {
            executor,
            projection,
            result,
            collector: FailureCollector::new(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Continues from rows and failures of an interrupted run.
    #[must_use]
    pub fn resume(mut self, rows: Vec<ProjectedRow>, failures: Vec<FailureRecord>) -> Self {
        let succeeded = rows.len();
        self.result = BatchResult::from_rows(self.projection.column_names(), rows);
        self.collector = FailureCollector::resume(failures, succeeded);
        self
    }

    /// Rows produced so far.
    #[must_use]
    pub fn rows(&self) -> &[ProjectedRow] {
        self.result.rows()
    }

    /// Failures recorded so far.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        self.collector.failures()
    }

    /// Fetches, validates and projects one identifier.
    pub async fn process_one<F, Fut>(
        &mut self,
        identifier: &Identifier,
        fetch_one: &F,
    ) -> Result<ItemOutcome, BatchCancelled>
    where
        F: Fn(Identifier) -> Fut,
        Fut: Future<Output = Result<RawRecord, StageError>>,
    {
        let fetched = self
            .executor
            .execute_counted(|_| fetch_one(identifier.clone()))
            .await;

        match fetched {
            Ok(done) => match self.projection.project(identifier, &done.output) {
                Ok(row) => {
                    debug!(identifier = %identifier, attempts = done.attempts, "Projected record");
                    self.events.try_emit(
                        kinds::ITEM_PROJECTED,
                        Some(json!({"identifier": identifier, "attempts": done.attempts})),
                    );
                    self.result.push(row);
                    self.collector.record_success();
                    Ok(ItemOutcome::Projected)
                }
                Err(error) => {
                    self.drop_identifier(identifier, &error, done.attempts);
                    Ok(ItemOutcome::Dropped)
                }
            },
            Err(ExecutionError::GaveUp(fatal)) => {
                self.drop_identifier(identifier, &fatal.last_error, fatal.attempts);
                if fatal.last_error.hard_stop {
                    Ok(ItemOutcome::DeadlineReached)
                } else {
                    Ok(ItemOutcome::Dropped)
                }
            }
            Err(ExecutionError::Cancelled { reason }) => Err(BatchCancelled { reason }),
        }
    }

    /// Records identifiers that will not be attempted because the run
    /// deadline has passed.
    pub fn drop_unattempted(&mut self, remaining: &[Identifier]) {
        let error = StageError::run_deadline_exceeded();
        for identifier in remaining {
            self.drop_identifier(identifier, &error, 0);
        }
    }

    /// Processes every identifier in order and returns the outcome.
    pub async fn run_batch<F, Fut>(
        mut self,
        identifiers: &[Identifier],
        fetch_one: F,
    ) -> Result<BatchOutcome, BatchCancelled>
    where
        F: Fn(Identifier) -> Fut,
        Fut: Future<Output = Result<RawRecord, StageError>>,
    {
        for (index, identifier) in identifiers.iter().enumerate() {
            if self.process_one(identifier, &fetch_one).await? == ItemOutcome::DeadlineReached {
                self.drop_unattempted(&identifiers[index + 1..]);
                break;
            }
        }
        Ok(self.finish(identifiers.len()))
    }

    /// Hands off the result for a batch of `total` identifiers.
    #[must_use]
    pub fn finish(self, total: usize) -> BatchOutcome {
        BatchOutcome {
            failures: self.collector.summary(total),
            result: self.result,
        }
    }

    fn drop_identifier(&mut self, identifier: &Identifier, error: &StageError, attempts: u32) {
        warn!(
            identifier = %identifier,
            classification = %error.class,
            attempts,
            error = %error.message,
            "Dropping identifier from batch"
        );
        self.events.try_emit(
            kinds::ITEM_DROPPED,
            Some(json!({
                "identifier": identifier,
                "classification": error.class,
                "attempts": attempts,
                "hard_stop": error.hard_stop,
                "error": error.message,
            })),
        );
        self.collector
            .record_failure(FailureRecord::new(identifier.clone(), error, attempts));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;
    use crate::events::CollectingEventSink;
    use crate::pipeline::RetryPolicy;
    use crate::testing::fixtures::topic_record;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn runner() -> BatchRunner {
        let executor = StageExecutor::new("fetch_record", RetryPolicy::new().with_maximum_attempts(3));
        BatchRunner::new(executor, Projection::community_posts())
    }

    fn ids(values: &[i64]) -> Vec<Identifier> {
        values.iter().copied().map(Identifier::Int).collect()
    }

    async fn valid(id: Identifier) -> Result<RawRecord, StageError> {
        Ok(topic_record(&id, 10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_valid_keeps_length_and_order() {
        let identifiers = ids(&[5, 3, 9, 1]);
        let outcome = runner().run_batch(&identifiers, valid).await.unwrap();

        assert_eq!(outcome.result.len(), identifiers.len());
        let got: Vec<&Identifier> = outcome.result.identifiers();
        assert_eq!(got, identifiers.iter().collect::<Vec<_>>());
        assert!(!outcome.failures.has_failures());
        assert_eq!(outcome.failures.succeeded, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_middle_identifier_is_dropped() {
        let sink = Arc::new(CollectingEventSink::new());
        let runner = runner().with_event_sink(sink.clone());

        let outcome = runner
            .run_batch(&ids(&[1, 2, 3]), |id| async move {
                if id == Identifier::Int(2) {
                    Err(StageError::malformed("missing title"))
                } else {
                    Ok(topic_record(&id, 1))
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.result.identifiers(), vec![&Identifier::Int(1), &Identifier::Int(3)]);
        assert_eq!(outcome.failures.dropped_identifiers(), vec![&Identifier::Int(2)]);
        assert_eq!(outcome.failures.failures[0].classification, ErrorClass::MalformedResponse);

        let dropped = sink.payloads_of(kinds::ITEM_DROPPED);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0]["identifier"], json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_failing_projection_is_dropped() {
        let outcome = runner()
            .run_batch(&ids(&[1, 2]), |id| async move {
                if id == Identifier::Int(1) {
                    Ok(RawRecord::new(json!({"title": "no author or slug"})))
                } else {
                    Ok(topic_record(&id, 1))
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.result.identifiers(), vec![&Identifier::Int(2)]);
        assert_eq!(outcome.failures.failures[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_transient_is_isolated() {
        let calls = AtomicU32::new(0);
        let outcome = runner()
            .run_batch(&ids(&[1, 2, 3]), |id| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if id == Identifier::Int(1) {
                        Err(StageError::transient("502"))
                    } else {
                        Ok(topic_record(&id, 1))
                    }
                }
            })
            .await
            .unwrap();

        // Three attempts for id 1, one each for 2 and 3.
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(outcome.result.len(), 2);
        assert_eq!(outcome.failures.failures[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_is_identical() {
        let identifiers = ids(&[4, 8, 15, 16, 23, 42]);
        let fetch = |id: Identifier| async move {
            match id {
                Identifier::Int(n) if n % 2 == 1 => Err(StageError::malformed("odd")),
                other => Ok(topic_record(&other, 7)),
            }
        };

        let first = runner().run_batch(&identifiers, fetch).await.unwrap();
        let second = runner().run_batch(&identifiers, fetch).await.unwrap();
        assert_eq!(first.result, second.result);
        assert_eq!(first.result.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch() {
        let outcome = runner().run_batch(&[], valid).await.unwrap();
        assert!(outcome.result.is_empty());
        assert_eq!(outcome.failures.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_drops_remaining() {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let executor = StageExecutor::new("fetch_record", RetryPolicy::default())
            .with_run_deadline(Some(deadline));
        let runner = BatchRunner::new(executor, Projection::community_posts());

        let outcome = runner
            .run_batch(&ids(&[1, 2, 3, 4]), |id| async move {
                if id == Identifier::Int(2) {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(topic_record(&id, 1))
            })
            .await
            .unwrap();

        assert_eq!(outcome.result.identifiers(), vec![&Identifier::Int(1)]);
        assert_eq!(outcome.failures.failures.len(), 3);
        assert!(outcome.failures.failures.iter().all(FailureRecord::is_hard_stop));
        assert_eq!(outcome.failures.failures[2].attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_drop_is_not_hard_stop() {
        let outcome = runner()
            .run_batch(&ids(&[1, 2, 3]), |id| async move {
                if id == Identifier::Int(2) {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(topic_record(&id, 1))
            })
            .await
            .unwrap();

        assert_eq!(
            outcome.result.identifiers(),
            vec![&Identifier::Int(1), &Identifier::Int(3)]
        );
        let dropped = &outcome.failures.failures[0];
        assert!(dropped.is_deadline());
        assert!(!dropped.is_hard_stop());
        assert_eq!(dropped.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_batch() {
        let token = Arc::new(crate::cancellation::CancellationToken::new());
        let executor = StageExecutor::new("fetch_record", RetryPolicy::default())
            .with_cancellation(Arc::clone(&token));
        let runner = BatchRunner::new(executor, Projection::community_posts());

        let err = runner
            .run_batch(&ids(&[1, 2, 3]), |id| {
                let token = Arc::clone(&token);
                async move {
                    if id == Identifier::Int(2) {
                        token.cancel("stop");
                    }
                    Ok(topic_record(&id, 1))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.reason, "stop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_appends_after_prior_rows() {
        let prior = vec![Projection::community_posts()
            .project(&Identifier::Int(1), &topic_record(&Identifier::Int(1), 1))
            .unwrap()];
        let runner = runner().resume(prior, Vec::new());

        let outcome = runner.run_batch(&ids(&[2, 3]), valid).await.unwrap();
        assert_eq!(
            outcome.result.identifiers(),
            vec![&Identifier::Int(1), &Identifier::Int(2), &Identifier::Int(3)]
        );
    }
}
