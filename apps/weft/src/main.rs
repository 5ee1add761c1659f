//! # Weft - Template Search
//!
//! The main binary for the Weft search engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            apps/weft (THE BINARY)             │
//! │                                               │
//! │  ┌─────────────┐        ┌──────────────────┐  │
//! │  │    CLI      │        │   Corpus files   │  │
//! │  │   (clap)    │        │ (JSON, snapshot) │  │
//! │  └──────┬──────┘        └────────┬─────────┘  │
//! │         └───────────┬────────────┘            │
//! │                     ▼                         │
//! │             ┌───────────────┐                 │
//! │             │   weft-core   │                 │
//! │             │  (THE LOGIC)  │                 │
//! │             └───────────────┘                 │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! weft --corpus corpus.json info
//! weft --corpus corpus.json search -e $'sentence\n  word text=cat'
//! weft --corpus corpus.json plan --details --template query.txt
//! weft --corpus corpus.json snapshot --output corpus.weft
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weft::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // WEFT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("WEFT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.quiet {
        "weft=warn,weft_core=warn"
    } else {
        "weft=info,weft_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

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

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
