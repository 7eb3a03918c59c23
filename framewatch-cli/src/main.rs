// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Framewatch CLI
//!
//! Command-line tooling for framewatch diagnostics.

use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod log_buffer;

pub use log_buffer::LogRingBuffer;

/// Lines kept in memory for inclusion in diagnostic snapshots.
const LOG_RING_CAPACITY: usize = 4096;

/// fwatch - Inspect and exercise framewatch diagnostic captures
#[derive(Parser)]
#[command(name = "fwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "framewatch.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// List persisted snapshots, oldest first
    List {
        /// Only this pool (crash, thermal, perf)
        #[arg(short, long)]
        pool: Option<String>,
    },

    /// Verify and print one snapshot artifact
    Show {
        /// Path to the artifact
        artifact: String,
    },

    /// Enforce the per-pool entry ceiling on existing snapshots
    Prune,

    /// Run a synthetic render loop through every detector
    Simulate {
        /// Number of frames to render
        #[arg(long, default_value_t = 300)]
        frames: u32,

        /// Start a jank burst every N frames (0 disables jank)
        #[arg(long, default_value_t = 60)]
        jank_every: u32,

        /// Consecutive janky frames per burst
        #[arg(long, default_value_t = 5)]
        jank_burst: u32,

        /// Duration of a janky frame
        #[arg(long, default_value_t = 40.0)]
        jank_ms: f64,

        /// Block the primary loop this long halfway through (0 disables)
        #[arg(long, default_value_t = 0)]
        stall_main_ms: u64,

        /// Override the configured watchdog timeout
        #[arg(long)]
        watchdog_timeout_ms: Option<u64>,

        /// Crash a simulated unit at this frame
        #[arg(long)]
        crash_at: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging: stderr plus the in-memory tail used by captures
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let log_ring = LogRingBuffer::new(LOG_RING_CAPACITY);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(log_ring.clone()),
        )
        .init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::List { pool } => commands::list::execute(&cli.config, pool.as_deref()).await,
        Commands::Show { artifact } => commands::show::execute(&artifact).await,
        Commands::Prune => commands::prune::execute(&cli.config).await,
        Commands::Simulate {
            frames,
            jank_every,
            jank_burst,
            jank_ms,
            stall_main_ms,
            watchdog_timeout_ms,
            crash_at,
        } => {
            let options = commands::simulate::SimulateOptions {
                frames,
                jank_every,
                jank_burst,
                jank_ms,
                stall_main_ms,
                watchdog_timeout_ms,
                crash_at,
            };
            commands::simulate::execute(&cli.config, options, log_ring).await
        }
    }
}
