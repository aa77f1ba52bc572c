//! Two-stage pipeline orchestrator.
//!
//! A run lists identifiers (stage A), then fetches and projects each one in
//! order (stage B). Stage A failures fail the run; stage B failures only drop
//! the affected identifier. Progress is checkpointed so that a restarted run
//! resumes where the previous one stopped. A checkpoint that cannot be
//! written after stage A fails the run; one that cannot be written during
//! stage B only loses that resume point.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::batch::{BatchCancelled, BatchRunner, ItemOutcome};
use super::checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
use super::executor::StageExecutor;
use super::failure_tolerance::FailureSummary;
use crate::cancellation::CancellationToken;
use crate::config::{PipelineConfig, StageConfig};
use crate::core::{BatchResult, Identifier, RunState, RunStateMachine};
use crate::errors::{ConfigError, ExecutionError, PipelineError};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::source::RemoteSource;

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Rows in identifier order.
    pub result: BatchResult,
    /// Identifiers dropped by stage B.
    pub failures: FailureSummary,
    /// Whether stage A output came from a checkpoint.
    pub restored_from_checkpoint: bool,
    /// States visited, starting with `Start`.
    pub transitions: Vec<RunState>,
}

/// Runs the pipeline against a [`RemoteSource`].
///
/// Every call to [`run`](Self::run) has its own state machine, so one
/// orchestrator can be run repeatedly, for example by a schedule.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    source: Arc<dyn RemoteSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("run_key", &self.config.run_key())
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator after validating `config`.
    pub fn new(config: PipelineConfig, source: Arc<dyn RemoteSource>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        })
    }

    /// Sets the checkpoint store.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shares an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels runs of this orchestrator.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel)
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Discards saved progress so the next run starts from stage A.
    pub async fn reset_checkpoint(&self) -> Result<(), PipelineError> {
        self.checkpoints.clear(&self.config.checkpoint_key()).await?;
        Ok(())
    }

    /// Executes one run.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, run_key = %self.config.run_key());
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunReport, PipelineError> {
        let mut machine = RunStateMachine::new();
        let deadline = self
            .config
            .run_timeout()
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let key = self.config.checkpoint_key();
        let columns = self.config.projection.column_names();

        let stored = self.checkpoints.load(&key).await?;
        if let Some(checkpoint) = &stored {
            checkpoint.ensure_columns(&key, &columns)?;
        }

        self.transition(&mut machine, RunState::FetchingIdentifiers)?;
        let (mut checkpoint, restored) = match stored.filter(|c| c.identifiers.is_some()) {
            Some(checkpoint) => {
                info!(
                    next_index = checkpoint.next_index,
                    rows = checkpoint.rows.len(),
                    "Restored listing from checkpoint"
                );
                self.events.try_emit(
                    kinds::CHECKPOINT_RESTORED,
                    Some(json!({
                        "run_id": run_id,
                        "next_index": checkpoint.next_index,
                        "rows": checkpoint.rows.len(),
                    })),
                );
                (checkpoint, true)
            }
            None => {
                let executor = self.executor("list_identifiers", &self.config.stage_a, deadline);
                match executor.execute(|_| self.source.list_identifiers()).await {
                    Ok(identifiers) => {
                        info!(count = identifiers.len(), "Listed identifiers");
                        let checkpoint = Checkpoint::new(self.config.run_key(), columns.clone())
                            .with_identifiers(identifiers);
                        if let Err(err) = self.save(&key, &checkpoint).await {
                            error!(error = %err, "Could not checkpoint listing");
                            self.transition(&mut machine, RunState::Failed)?;
                            return Err(err);
                        }
                        (checkpoint, false)
                    }
                    Err(ExecutionError::GaveUp(fatal)) => {
                        error!(
                            attempts = fatal.attempts,
                            classification = %fatal.last_error.class,
                            error = %fatal.last_error.message,
                            "Listing stage failed"
                        );
                        self.transition(&mut machine, RunState::Failed)?;
                        return Err(fatal.into());
                    }
                    Err(ExecutionError::Cancelled { reason }) => {
                        self.transition(&mut machine, RunState::Cancelled)?;
                        return Err(PipelineError::Cancelled { reason });
                    }
                }
            }
        };

        self.transition(&mut machine, RunState::FetchingRecords)?;
        let identifiers: Vec<Identifier> = checkpoint.identifiers.clone().unwrap_or_default();
        let executor = self.executor("fetch_record", &self.config.stage_b, deadline);
        let mut runner = BatchRunner::new(executor, self.config.projection.clone())
            .with_event_sink(Arc::clone(&self.events))
            .resume(
                std::mem::take(&mut checkpoint.rows),
                std::mem::take(&mut checkpoint.failures),
            );
        let fetch_one = |identifier: Identifier| {
            let source = Arc::clone(&self.source);
            async move { source.fetch_record(&identifier).await }
        };

        let start = checkpoint.next_index.min(identifiers.len());
        for index in start..identifiers.len() {
            match runner.process_one(&identifiers[index], &fetch_one).await {
                Ok(ItemOutcome::DeadlineReached) => {
                    let remaining = &identifiers[index + 1..];
                    warn!(remaining = remaining.len(), "Run deadline reached during fetch stage");
                    runner.drop_unattempted(remaining);
                    break;
                }
                Ok(ItemOutcome::Projected | ItemOutcome::Dropped) => {
                    checkpoint.record_progress(index + 1, runner.rows(), runner.failures());
                    self.save_progress(&key, &checkpoint).await;
                }
                Err(BatchCancelled { reason }) => {
                    checkpoint.record_progress(index, runner.rows(), runner.failures());
                    self.save_progress(&key, &checkpoint).await;
                    self.transition(&mut machine, RunState::Cancelled)?;
                    return Err(PipelineError::Cancelled { reason });
                }
            }
        }

        let outcome = runner.finish(identifiers.len());
        self.transition(&mut machine, RunState::Completed)?;
        if let Err(err) = self.checkpoints.clear(&key).await {
            warn!(error = %err, "Could not clear checkpoint of completed run");
        }
        info!(
            rows = outcome.result.len(),
            dropped = outcome.failures.failures.len(),
            "Run completed"
        );

        Ok(RunReport {
            run_id,
            result: outcome.result,
            failures: outcome.failures,
            restored_from_checkpoint: restored,
            transitions: machine.history().to_vec(),
        })
    }

    fn executor(&self, stage: &str, config: &StageConfig, deadline: Option<Instant>) -> StageExecutor {
        StageExecutor::new(stage, config.retry.clone())
            .with_start_to_close(config.start_to_close())
            .with_run_deadline(deadline)
            .with_cancellation(Arc::clone(&self.cancel))
            .with_event_sink(Arc::clone(&self.events))
    }

    fn transition(&self, machine: &mut RunStateMachine, next: RunState) -> Result<(), PipelineError> {
        let previous = machine.advance(next)?;
        info!(from = %previous, to = %next, "Run state changed");
        self.events.try_emit(
            kinds::STATE_CHANGED,
            Some(json!({"from": previous, "to": next})),
        );
        Ok(())
    }

    async fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<(), PipelineError> {
        self.checkpoints.save(key, checkpoint).await?;
        self.events.try_emit(
            kinds::CHECKPOINT_SAVED,
            Some(json!({"next_index": checkpoint.next_index})),
        );
        Ok(())
    }

    /// Stage B save. Failures are reported and the batch carries on.
    async fn save_progress(&self, key: &str, checkpoint: &Checkpoint) {
        if let Err(err) = self.save(key, checkpoint).await {
            warn!(
                next_index = checkpoint.next_index,
                error = %err,
                "Checkpoint not saved, continuing"
            );
            self.events.try_emit(
                kinds::CHECKPOINT_SAVE_FAILED,
                Some(json!({
                    "next_index": checkpoint.next_index,
                    "error": err.to_string(),
                })),
            );
        }
    }
}

/// Validates `config` and executes one run.
pub async fn run_pipeline(
    config: PipelineConfig,
    source: Arc<dyn RemoteSource>,
) -> Result<RunReport, PipelineError> {
    PipelineOrchestrator::new(config, source)?.run().await
}
