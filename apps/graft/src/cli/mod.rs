//! # graft CLI Module
//!
//! This module implements the CLI interface for graft.
//!
//! ## Available Commands
//!
//! - `ingest` - Ingest JSON-lines record files into the graph
//! - `status` - Show tracker status
//! - `init` - Initialize a new tracker store
//! - `compact` - Compact a redb tracker
//! - `config` - Print the effective configuration

mod commands;

use clap::{Parser, Subcommand};
use graft::config::{ConfigOverrides, FileConfig, Settings, TrackerKind, parse_choice};
use graft::reader::InputSpec;
use graft_core::GraftError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// graft - idempotent ingestion of tabular records into a property graph
///
/// Every source entity is created in the graph at most once; re-running the
/// same input updates instead of duplicating.
#[derive(Parser, Debug)]
#[command(name = "graft")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// List every failed record in the summary
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $GRAFT_CONFIG, then ./graft.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the tracker store
    #[arg(short = 'D', long, global = true)]
    pub tracker_path: Option<PathBuf>,

    /// Tracker backend
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<TrackerKind>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest record files, in the order given
    Ingest {
        /// Input as KIND:PATH, e.g. question:questions.jsonl (repeatable)
        #[arg(short, long = "input", required = true)]
        inputs: Vec<InputSpec>,

        /// Gremlin Server HTTP endpoint
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Write to an in-memory graph with a fresh tracker instead
        #[arg(long)]
        dry_run: bool,

        /// Failed record handling: abort or skip
        #[arg(long)]
        on_error: Option<String>,

        /// Attempts per remote write, the first one included
        #[arg(long)]
        retries: Option<u32>,

        /// When edges are written: per-record or deferred
        #[arg(long)]
        edge_flush: Option<String>,

        /// Unseen referenced vertices: placeholder or defer
        #[arg(long)]
        forward_refs: Option<String>,
    },

    /// Show tracker status
    Status,

    /// Initialize a new empty tracker store
    Init {
        /// Force initialization even if the store exists
        #[arg(short, long)]
        force: bool,
    },

    /// Compact a redb tracker store
    Compact,

    /// Print the effective configuration as TOML
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), GraftError> {
    let json_mode = cli.json_mode;
    let (file, config_path) = FileConfig::discover(cli.config.as_deref())?;

    let mut overrides = ConfigOverrides {
        tracker: cli.backend,
        tracker_path: cli.tracker_path.clone(),
        ..ConfigOverrides::default()
    };

    match cli.command {
        Some(Commands::Ingest {
            inputs,
            endpoint,
            dry_run,
            on_error,
            retries,
            edge_flush,
            forward_refs,
        }) => {
            overrides.endpoint = endpoint;
            overrides.retry_attempts = retries;
            overrides.error_policy = on_error
                .as_deref()
                .map(|v| parse_choice("on_error", v))
                .transpose()?;
            overrides.edge_flush = edge_flush
                .as_deref()
                .map(|v| parse_choice("edge_flush", v))
                .transpose()?;
            overrides.forward_refs = forward_refs
                .as_deref()
                .map(|v| parse_choice("forward_refs", v))
                .transpose()?;

            let settings = Settings::resolve(file, &overrides)?;
            cmd_ingest(&settings, &inputs, dry_run, json_mode, cli.verbose).await
        }
        Some(Commands::Status) => cmd_status(&Settings::resolve(file, &overrides)?, json_mode),
        Some(Commands::Init { force }) => cmd_init(&Settings::resolve(file, &overrides)?, force),
        Some(Commands::Compact) => cmd_compact(&Settings::resolve(file, &overrides)?),
        Some(Commands::Config) => cmd_config(
            &Settings::resolve(file, &overrides)?,
            config_path.as_deref(),
            json_mode,
        ),
        None => {
            // No subcommand - show status by default
            cmd_status(&Settings::resolve(file, &overrides)?, json_mode)
        }
    }
}
