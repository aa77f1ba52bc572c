//! Stage executor: one remote operation under a deadline and a retry policy.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::retry::{AttemptState, RetryDecision, RetryPolicy};
use crate::cancellation::CancellationToken;
use crate::errors::{ExecutionError, FatalError, StageError};
use crate::events::{kinds, EventSink, NoOpEventSink};

/// Default start-to-close timeout of a single call.
pub const DEFAULT_START_TO_CLOSE: Duration = Duration::from_secs(15);

/// Output of a successful execution with the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// The operation's output.
    pub output: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Runs one remote operation, retrying failures per its [`RetryPolicy`].
///
/// Each attempt is bounded by the start-to-close timeout, or by the time left
/// before the run deadline when that is sooner. Cancellation is observed
/// while a call is in flight and during every backoff wait.
#[derive(Clone)]
pub struct StageExecutor {
    stage: String,
    policy: RetryPolicy,
    start_to_close: Duration,
    run_deadline: Option<Instant>,
    cancel: Arc<CancellationToken>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("stage", &self.stage)
            .field("policy", &self.policy)
            .field("start_to_close", &self.start_to_close)
            .field("run_deadline", &self.run_deadline)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor for the named stage.
    pub fn new(stage: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            stage: stage.into(),
            policy,
            start_to_close: DEFAULT_START_TO_CLOSE,
            run_deadline: None,
            cancel: Arc::new(CancellationToken::new()),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub const fn with_start_to_close(mut self, timeout: Duration) -> Self {
        self.start_to_close = timeout;
        self
    }

    /// Sets the pipeline's outermost deadline.
    #[must_use]
    pub const fn with_run_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.run_deadline = deadline;
        self
    }

    /// Sets the pipeline cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Stage name used in logs and errors.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// The retry policy in force.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds or the policy gives up.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ExecutionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        self.execute_counted(operation).await.map(|done| done.output)
    }

    /// Like [`execute`](Self::execute), also reporting the attempt count.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute_counted<T, F, Fut>(
        &self,
        mut operation: F,
    ) -> Result<Attempted<T>, ExecutionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let started = Instant::now();
        let mut state = AttemptState::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            let (budget, hard_stop) = self.call_budget();
            let result = if hard_stop && budget.is_zero() {
                Err(StageError::run_deadline_exceeded())
            } else {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(self.cancelled()),
                    outcome = tokio::time::timeout(budget, operation(state.attempt)) => match outcome {
                        Ok(result) => result,
                        Err(_) if hard_stop => Err(StageError::run_deadline_exceeded()),
                        Err(_) => Err(StageError::deadline_exceeded(budget)),
                    },
                }
            };

            let error = match result {
                Ok(output) => {
                    debug!(stage = %self.stage, attempt = state.attempt, "Stage call succeeded");
                    return Ok(Attempted {
                        output,
                        attempts: state.attempt,
                    });
                }
                Err(error) => error,
            };

            state.record_failure(error.class, started.elapsed());
            debug!(
                stage = %self.stage,
                attempt = state.attempt,
                classification = %error.class,
                error = %error.message,
                "Stage call failed"
            );
            self.events.try_emit(
                kinds::ATTEMPT_FAILED,
                Some(json!({
                    "stage": self.stage,
                    "attempt": state.attempt,
                    "classification": error.class,
                    "message": error.message,
                    "hard_stop": error.hard_stop,
                })),
            );

            match self.policy.evaluate(&state, &error) {
                RetryDecision::GiveUp(last_error) => {
                    warn!(
                        stage = %self.stage,
                        attempts = state.attempt,
                        classification = %last_error.class,
                        error = %last_error.message,
                        "Giving up on stage call"
                    );
                    self.events.try_emit(
                        kinds::GAVE_UP,
                        Some(json!({
                            "stage": self.stage,
                            "attempts": state.attempt,
                            "classification": last_error.class,
                        })),
                    );
                    return Err(FatalError {
                        stage: self.stage.clone(),
                        last_error,
                        attempts: state.attempt,
                    }
                    .into());
                }
                RetryDecision::Retry(after) => {
                    debug!(
                        stage = %self.stage,
                        attempt = state.attempt,
                        delay_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                        "Retrying after error"
                    );
                    self.events.try_emit(
                        kinds::RETRY_SCHEDULED,
                        Some(json!({
                            "stage": self.stage,
                            "attempt": state.attempt,
                            "delay_ms": u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                        })),
                    );

                    let wait = self.run_deadline.map_or(after, |deadline| {
                        after.min(deadline.saturating_duration_since(Instant::now()))
                    });
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(self.cancelled()),
                        () = tokio::time::sleep(wait) => {}
                    }
                    state.next_attempt(started.elapsed());
                }
            }
        }
    }

    /// Time allowed for the next call and whether the run deadline set it.
    fn call_budget(&self) -> (Duration, bool) {
        match self.run_deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining <= self.start_to_close {
                    (remaining, true)
                } else {
                    (self.start_to_close, false)
                }
            }
            None => (self.start_to_close, false),
        }
    }

    fn cancelled(&self) -> ExecutionError {
        ExecutionError::Cancelled {
            reason: self.cancel.reason_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;
    use crate::events::CollectingEventSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let executor = StageExecutor::new("fetch", RetryPolicy::default());
        let done = executor
            .execute_counted(|_| async { Ok::<_, StageError>(42) })
            .await
            .unwrap();
        assert_eq!(done, Attempted { output: 42, attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_five_failures_then_success() {
        let sink = Arc::new(CollectingEventSink::new());
        let executor = StageExecutor::new("fetch", RetryPolicy::default())
            .with_event_sink(sink.clone());
        let calls = AtomicU32::new(0);

        let started = Instant::now();
        let done = executor
            .execute_counted(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt <= 5 {
                        Err(StageError::transient(format!("503 on attempt {attempt}")))
                    } else {
                        Ok("payload")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(done.attempts, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        let delays: Vec<u64> = sink
            .payloads_of(kinds::RETRY_SCHEDULED)
            .iter()
            .map(|p| p["delay_ms"].as_u64().unwrap())
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(31) && elapsed < Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_attempts_exactly_n() {
        let policy = RetryPolicy::new().with_maximum_attempts(4);
        let executor = StageExecutor::new("list", policy);
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StageError::transient("connection refused")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            ExecutionError::GaveUp(fatal) => {
                assert_eq!(fatal.attempts, 4);
                assert_eq!(fatal.stage, "list");
                assert_eq!(fatal.last_error.class, ErrorClass::TransientRemote);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_gives_up_immediately() {
        let executor = StageExecutor::new("fetch", RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StageError::malformed("not json")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ExecutionError::GaveUp(f) if f.attempts == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable_deadline_exceeded() {
        let policy = RetryPolicy::new().with_maximum_attempts(2);
        let executor = StageExecutor::new("fetch", policy)
            .with_start_to_close(Duration::from_secs(5));

        let err = executor
            .execute(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, StageError>(())
            })
            .await
            .unwrap_err();

        match err {
            ExecutionError::GaveUp(fatal) => {
                assert_eq!(fatal.attempts, 2);
                assert_eq!(fatal.last_error.class, ErrorClass::DeadlineExceeded);
                assert!(!fatal.last_error.hard_stop);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success() {
        let executor = StageExecutor::new("fetch", RetryPolicy::default())
            .with_start_to_close(Duration::from_secs(5));

        let done = executor
            .execute_counted(|attempt| async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, StageError>(attempt)
            })
            .await
            .unwrap();

        assert_eq!(done.output, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_is_hard_stop() {
        let deadline = Instant::now() + Duration::from_secs(3);
        let executor = StageExecutor::new("fetch", RetryPolicy::default())
            .with_start_to_close(Duration::from_secs(15))
            .with_run_deadline(Some(deadline));
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, StageError>(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            ExecutionError::GaveUp(fatal) => {
                assert!(fatal.last_error.hard_stop);
                assert_eq!(fatal.last_error.class, ErrorClass::DeadlineExceeded);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_run_deadline_skips_call() {
        let executor = StageExecutor::new("fetch", RetryPolicy::default())
            .with_run_deadline(Some(Instant::now()));
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, StageError>(()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(err, ExecutionError::GaveUp(f) if f.last_error.hard_stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let token = Arc::new(CancellationToken::new());
        let executor = StageExecutor::new("fetch", RetryPolicy::default())
            .with_cancellation(Arc::clone(&token));

        let cancel = {
            let token = Arc::clone(&token);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2_500)).await;
                token.cancel("operator abort");
            })
        };

        let calls = AtomicU32::new(0);
        let err = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StageError::transient("503")) }
            })
            .await
            .unwrap_err();
        cancel.await.unwrap();

        // Attempts at t=0 and t=1s; cancelled during the 2s wait.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            err,
            ExecutionError::Cancelled {
                reason: "operator abort".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_in_flight_call() {
        let token = Arc::new(CancellationToken::new());
        let executor = StageExecutor::new("fetch", RetryPolicy::default())
            .with_start_to_close(Duration::from_secs(600))
            .with_cancellation(Arc::clone(&token));

        let cancel = {
            let token = Arc::clone(&token);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel("shutdown");
            })
        };

        let started = Instant::now();
        let err = executor
            .execute(|_| async {
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok::<_, StageError>(())
            })
            .await
            .unwrap_err();
        cancel.await.unwrap();

        assert!(matches!(err, ExecutionError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
