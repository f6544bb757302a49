//! CLI definitions for Tidewater.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tidewater CLI.
#[derive(Parser)]
#[command(name = "tidewater")]
#[command(about = "Mode-partitioned run loop for timers, deferred work and descriptor readiness")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/runloop.toml", global = true)]
    pub config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Drive a loop with a heartbeat timer and cross-thread workers (default)
    Run {
        /// How long to run the loop, in seconds
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,

        /// Heartbeat timer interval, in milliseconds
        #[arg(long, default_value_t = 1000)]
        heartbeat_ms: u64,

        /// Number of worker threads posting work to the loop
        #[arg(long, default_value_t = 2)]
        workers: usize,

        /// Echo lines read from stdin through a readiness watcher
        #[arg(long)]
        watch_stdin: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

impl Commands {
    pub(crate) fn default_run() -> Self {
        Commands::Run {
            duration_secs: 5,
            heartbeat_ms: 1000,
            workers: 2,
            watch_stdin: false,
        }
    }
}
