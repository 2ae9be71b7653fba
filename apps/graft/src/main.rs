//! # graft - Tabular Records into Property Graphs
//!
//! The main binary for graft.
//!
//! This application provides:
//! - CLI interface for ingestion runs and tracker maintenance
//! - Gremlin Server HTTP client
//! - Ctrl+C handling that finishes the record in flight
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    apps/graft (THE BINARY)                   │
//! │                                                              │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │    CLI      │   │ JSON-lines   │   │  Gremlin client  │   │
//! │  │   (clap)    │   │   reader     │   │    (reqwest)     │   │
//! │  └──────┬──────┘   └──────┬───────┘   └────────┬─────────┘   │
//! │         │                 │                    │             │
//! │         └─────────────────┼────────────────────┘             │
//! │                           ▼                                  │
//! │                   ┌───────────────┐                          │
//! │                   │  graft-core   │                          │
//! │                   │ (THE LOGIC)   │                          │
//! │                   └───────────────┘                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! graft init
//! graft ingest -i question:questions.jsonl -i answer:answers.jsonl
//! graft ingest -i tags:tags.jsonl --on-error skip
//! graft status
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // GRAFT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("GRAFT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "graft=info,graft_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the graft startup banner.
fn print_banner() {
    println!(
        r#"
  graft v{}
  tabular records -> property graph, each entity created once
"#,
        env!("CARGO_PKG_VERSION")
    );
}
