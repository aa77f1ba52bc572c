//! Interval schedule of repeated pipeline runs.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::orchestrator::{PipelineOrchestrator, RunReport};
use crate::cancellation::CancellationToken;
use crate::config::ScheduleConfig;
use crate::errors::PipelineError;

/// Drives runs of one orchestrator on a fixed interval.
///
/// The first run starts immediately. Each tick is an independent run; a
/// failed tick is logged and the schedule keeps going. The schedule stops
/// when its token is cancelled or after `max_runs` ticks.
#[derive(Debug)]
pub struct Schedule {
    every: Duration,
    max_runs: Option<u32>,
    cancel: Arc<CancellationToken>,
}

/// Counts of a finished schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    /// Ticks that produced a report.
    pub completed: u32,
    /// Ticks that ended in an error.
    pub failed: u32,
}

impl Schedule {
    /// Creates a schedule from configuration.
    #[must_use]
    pub fn new(config: &ScheduleConfig) -> Self {
        Self {
            every: config.every().max(Duration::from_millis(1)),
            max_runs: config.max_runs,
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the token that stops the schedule.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the schedule.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel)
    }

    /// Runs until cancelled or `max_runs` is reached, handing every outcome
    /// to `on_run`.
    pub async fn run<F>(&self, orchestrator: &PipelineOrchestrator, mut on_run: F) -> ScheduleSummary
    where
        F: FnMut(&Result<RunReport, PipelineError>),
    {
        let mut summary = ScheduleSummary::default();
        let mut interval = tokio::time::interval(self.every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.max_runs.is_some_and(|max| summary.completed + summary.failed >= max) {
                break;
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let outcome = orchestrator.run().await;
            match &outcome {
                Ok(report) => {
                    summary.completed += 1;
                    info!(run_id = %report.run_id, rows = report.result.len(), "Scheduled run completed");
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(error = %err, "Scheduled run did not complete");
                }
            }
            on_run(&outcome);
        }

        info!(completed = summary.completed, failed = summary.failed, "Schedule stopped");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::errors::StageError;
    use crate::testing::{int_ids, StubSource};
    use tokio::time::Instant;

    fn schedule(every_seconds: f64, max_runs: Option<u32>) -> Schedule {
        Schedule::new(&ScheduleConfig {
            every_seconds,
            max_runs,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_until_max_runs() {
        let source = Arc::new(StubSource::new(int_ids(&[1])));
        let orchestrator = PipelineOrchestrator::new(PipelineConfig::default(), source.clone()).unwrap();

        let started = Instant::now();
        let mut seen = Vec::new();
        let summary = schedule(3600.0, Some(3))
            .run(&orchestrator, |outcome| seen.push(outcome.is_ok()))
            .await;

        assert_eq!(summary, ScheduleSummary { completed: 3, failed: 0 });
        assert_eq!(seen, vec![true, true, true]);
        assert_eq!(source.list_calls(), 3);
        // First tick is immediate, then two full intervals.
        assert_eq!(started.elapsed(), Duration::from_secs(7200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_stop_schedule() {
        let source = Arc::new(
            StubSource::new(int_ids(&[1]))
                .with_listing(Err(StageError::non_retryable("HTTP 401"))),
        );
        let orchestrator = PipelineOrchestrator::new(PipelineConfig::default(), source).unwrap();

        let summary = schedule(60.0, Some(2)).run(&orchestrator, |_| {}).await;
        assert_eq!(summary, ScheduleSummary { completed: 1, failed: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_schedule() {
        let orchestrator =
            PipelineOrchestrator::new(PipelineConfig::default(), Arc::new(StubSource::new(vec![])))
                .unwrap();
        let every_minute = schedule(60.0, None);
        let token = every_minute.cancellation_token();

        let mut runs = 0;
        let summary = every_minute
            .run(&orchestrator, |_| {
                runs += 1;
                if runs == 2 {
                    token.cancel("stop schedule");
                }
            })
            .await;

        assert_eq!(summary.completed, 2);
    }
}
