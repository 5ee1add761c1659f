//! # Weft CLI Module
//!
//! This module implements the CLI interface for Weft.
//!
//! ## Available Commands
//!
//! - `search` - Run a search template and print the results
//! - `count` - Count the results of a search template
//! - `plan` - Study a template and show its retrieval plan
//! - `legend` - List the relations templates can use
//! - `snapshot` - Convert a corpus to a binary snapshot
//! - `info` - Summarize a corpus

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use weft_core::WeftError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Weft - declarative search in annotated corpora
///
/// Search templates describe nodes, their features and how they relate.
/// Weft finds every combination of corpus nodes that fits.
#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Corpus file: a JSON description or a binary snapshot
    #[arg(short = 'C', long, global = true, default_value = "corpus.json")]
    pub corpus: PathBuf,

    /// Search configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where a template comes from.
#[derive(clap::Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct TemplateSource {
    /// Read the template from a file
    #[arg(short, long)]
    pub template: Option<PathBuf>,

    /// Template text given directly
    #[arg(short = 'e', long = "expr")]
    pub expr: Option<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a search template
    Search {
        #[command(flatten)]
        source: TemplateSource,

        /// Deliver at most this many results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Planning strategy
        #[arg(short, long)]
        strategy: Option<String>,

        /// Only distinct result prefixes of this length
        #[arg(long)]
        shallow: Option<usize>,

        /// Render results as text, using this feature for the slots
        #[arg(short, long, value_name = "FEATURE")]
        glean: Option<String>,
    },

    /// Count the results of a search template
    Count {
        #[command(flatten)]
        source: TemplateSource,

        /// Log progress every this many results
        #[arg(short, long)]
        progress: Option<usize>,

        /// Stop counting here (0 counts everything)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the retrieval plan of a search template
    Plan {
        #[command(flatten)]
        source: TemplateSource,

        /// Planning strategy
        #[arg(short, long)]
        strategy: Option<String>,

        /// Also show yarn sizes, parameters and plan edges
        #[arg(short, long)]
        details: bool,
    },

    /// List the relations available on the corpus
    Legend,

    /// Write the corpus as a binary snapshot
    Snapshot {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Summarize the corpus
    Info,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), WeftError> {
    let json_mode = cli.json_mode;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Search {
            source,
            limit,
            strategy,
            shallow,
            glean,
        }) => {
            let session = load_session(&cli.corpus, config)?;
            let template = read_template(&source)?;
            let options = SearchOptions {
                limit,
                strategy,
                shallow,
                glean,
            };
            cmd_search(&session, &template, &options, json_mode)
        }
        Some(Commands::Count {
            source,
            progress,
            limit,
        }) => {
            let session = load_session(&cli.corpus, config)?;
            let template = read_template(&source)?;
            cmd_count(&session, &template, progress, limit, json_mode)
        }
        Some(Commands::Plan {
            source,
            strategy,
            details,
        }) => {
            let session = load_session(&cli.corpus, config)?;
            let template = read_template(&source)?;
            cmd_plan(&session, &template, strategy.as_deref(), details, json_mode)
        }
        Some(Commands::Legend) => {
            let session = load_session(&cli.corpus, config)?;
            cmd_legend(&session, json_mode)
        }
        Some(Commands::Snapshot { output }) => {
            let session = load_session(&cli.corpus, config)?;
            cmd_snapshot(&session, &output)
        }
        Some(Commands::Info) | None => {
            let session = load_session(&cli.corpus, config)?;
            cmd_info(&session, &cli.corpus, json_mode)
        }
    }
}
