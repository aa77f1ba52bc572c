//! Command-line interface definition.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Run the two-stage fetch pipeline against a forum.
#[derive(Debug, Parser)]
#[command(name = "fetchflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML, or JSON by extension).
    #[arg(long, short, global = true, default_value = "fetchflow.toml")]
    pub config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per line.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputArg {
    /// Aligned columns.
    Table,
    /// The full run report as JSON.
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executes one run and prints the rows.
    Run {
        /// Print only the N rows with the most views.
        #[arg(long)]
        top: Option<usize>,

        /// Column used by --top.
        #[arg(long, default_value = "views")]
        rank_by: String,

        /// Discard saved progress before running.
        #[arg(long, default_value_t = false)]
        fresh: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputArg::Table)]
        output: OutputArg,
    },

    /// Runs on the configured interval until interrupted.
    Schedule {
        /// Stop after this many runs.
        #[arg(long)]
        max_runs: Option<u32>,
    },

    /// Prints the effective configuration as TOML.
    ShowConfig,
}
