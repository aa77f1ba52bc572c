//! `fetchflow` binary: runs the pipeline from a configuration file.

mod cli;
mod table;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use cli::{Cli, Command, LogFormatArg, OutputArg};
use fetchflow::observability::{init_tracing, LogFormat};
use fetchflow::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Json => LogFormat::Json,
    };
    init_tracing(format, &cli.log_level)?;

    let mut config = PipelineConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if !cli.config.exists() {
        // Without a file the forum preset is used, so --top can rank by views.
        config = config.with_projection(Projection::community_posts_with_views());
    }

    match cli.command {
        Command::ShowConfig => {
            let rendered = toml::to_string_pretty(&config).context("rendering configuration")?;
            print!("{rendered}");
        }
        Command::Run {
            top,
            rank_by,
            fresh,
            output,
        } => {
            if top.is_some() {
                table::check_rank_column(&config.projection.column_names(), &rank_by)?;
            }
            let orchestrator = build_orchestrator(config)?;
            if fresh {
                orchestrator.reset_checkpoint().await?;
            }
            cancel_on_ctrl_c(orchestrator.cancellation_token());

            let report = orchestrator.run().await?;
            print_report(&report, top, &rank_by, output)?;
        }
        Command::Schedule { max_runs } => {
            if max_runs.is_some() {
                config.schedule.max_runs = max_runs;
            }
            let schedule = Schedule::new(&config.schedule);
            let orchestrator = build_orchestrator(config)?
                .with_cancellation(schedule.cancellation_token());
            cancel_on_ctrl_c(schedule.cancellation_token());

            let summary = schedule
                .run(&orchestrator, |outcome| {
                    if let Ok(report) = outcome {
                        print!("{}", table::render(&report.result));
                    }
                })
                .await;
            info!(completed = summary.completed, failed = summary.failed, "Done");
        }
    }
    Ok(())
}

fn build_orchestrator(config: PipelineConfig) -> Result<PipelineOrchestrator> {
    let source = Arc::new(HttpSource::new(config.source.clone())?);
    let store: Arc<dyn CheckpointStore> = match &config.checkpoint_dir {
        Some(dir) => Arc::new(FileCheckpointStore::new(dir)),
        None => Arc::new(InMemoryCheckpointStore::new()),
    };
    Ok(PipelineOrchestrator::new(config, source)?
        .with_checkpoint_store(store)
        .with_event_sink(Arc::new(LoggingEventSink::debug())))
}

fn cancel_on_ctrl_c(token: Arc<CancellationToken>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel("interrupted");
        }
    });
}

fn print_report(report: &RunReport, top: Option<usize>, rank_by: &str, output: OutputArg) -> Result<()> {
    match output {
        OutputArg::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputArg::Table => {
            let shown = table::select(&report.result, top, rank_by)?;
            print!("{}", table::render(&shown));
            if report.failures.has_failures() {
                eprintln!(
                    "{} of {} identifier(s) dropped",
                    report.failures.failures.len(),
                    report.failures.total
                );
            }
        }
    }
    Ok(())
}
