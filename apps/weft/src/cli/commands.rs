//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::TemplateSource;
use crate::corpus_file::{load_corpus, validate_file_path, validate_output_path};
use std::path::Path;
use weft_core::{
    Corpus, MemoryCorpus, ResultTuple, SearchConfig, Session, WeftError, corpus_to_bytes,
};

/// Maximum size of a template or configuration file (1 MB).
const MAX_TEXT_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// SEARCH COMMAND
// =============================================================================

/// How `search` selects and renders results.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub strategy: Option<String>,
    /// Keep distinct prefixes of this length only.
    pub shallow: Option<usize>,
    /// Slot feature to render results with.
    pub glean: Option<String>,
}

/// Run a template and print its results, one tuple per line.
pub fn cmd_search(
    session: &Session,
    template: &str,
    options: &SearchOptions,
    json_mode: bool,
) -> Result<(), WeftError> {
    let results = search_results(session, template, options)?;
    tracing::info!("{} results", results.len());
    let output = match &options.glean {
        Some(feature) => format_gleaned(session, &results, feature, json_mode),
        None => format_results(&results, json_mode),
    };
    println!("{}", output);
    Ok(())
}

/// The results a `search` prints.
pub fn search_results(
    session: &Session,
    template: &str,
    options: &SearchOptions,
) -> Result<Vec<ResultTuple>, WeftError> {
    let query = session.study(template, options.strategy.as_deref())?;
    let limit = options.limit.unwrap_or(usize::MAX);
    Ok(match options.shallow {
        Some(size) => query.fetch_shallow(size).into_iter().take(limit).collect(),
        None => query.fetch(options.limit),
    })
}

/// Render result tuples as text, one line each, or as a JSON list.
pub fn format_gleaned(
    session: &Session,
    results: &[ResultTuple],
    feature: &str,
    json_mode: bool,
) -> String {
    let lines: Vec<String> = results.iter().map(|t| session.glean(t, feature)).collect();
    if json_mode {
        let output = serde_json::json!({
            "count": results.len(),
            "results": lines,
        });
        return serde_json::to_string_pretty(&output).unwrap_or_default();
    }
    lines.join("\n")
}

/// Render result tuples as tab-separated node numbers, or as JSON.
pub fn format_results(results: &[ResultTuple], json_mode: bool) -> String {
    if json_mode {
        let tuples: Vec<Vec<u64>> = results
            .iter()
            .map(|t| t.iter().map(|n| n.0).collect())
            .collect();
        let output = serde_json::json!({
            "count": results.len(),
            "results": tuples,
        });
        return serde_json::to_string_pretty(&output).unwrap_or_default();
    }
    results
        .iter()
        .map(|t| {
            t.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// COUNT COMMAND
// =============================================================================

/// Count the results of a template.
pub fn cmd_count(
    session: &Session,
    template: &str,
    progress: Option<usize>,
    limit: Option<usize>,
    json_mode: bool,
) -> Result<(), WeftError> {
    let count = session.count(template, progress, limit)?;

    if json_mode {
        let output = serde_json::json!({ "count": count });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
    } else {
        println!("{}", count);
    }
    Ok(())
}

// =============================================================================
// PLAN COMMAND
// =============================================================================

/// Study a template and print its plan.
pub fn cmd_plan(
    session: &Session,
    template: &str,
    strategy: Option<&str>,
    details: bool,
    json_mode: bool,
) -> Result<(), WeftError> {
    let query = session.study(template, strategy)?;
    let plan = query.show_plan(details);

    if json_mode {
        let output = serde_json::json!({
            "strategy": query.strategy().name(),
            "yarn_sizes": query.yarns().iter().map(|y| y.len()).collect::<Vec<_>>(),
            "plan": plan,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
    } else {
        print!("{}", plan);
    }
    Ok(())
}

// =============================================================================
// LEGEND COMMAND
// =============================================================================

/// Print the relations available on the corpus.
pub fn cmd_legend(session: &Session, json_mode: bool) -> Result<(), WeftError> {
    let legend = session.relations_legend();

    if json_mode {
        let lines: Vec<&str> = legend.lines().map(str::trim_start).collect();
        let output = serde_json::json!({ "relations": lines });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
    } else {
        print!("{}", legend);
    }
    Ok(())
}

// =============================================================================
// SNAPSHOT COMMAND
// =============================================================================

/// Write the session's corpus as a binary snapshot.
pub fn cmd_snapshot(session: &Session, output: &Path) -> Result<(), WeftError> {
    let validated_output = validate_output_path(output)?;
    let data = corpus_to_bytes(session.corpus())?;

    std::fs::write(&validated_output, &data)
        .map_err(|e| WeftError::IoError(format!("Write file: {}", e)))?;

    println!("Wrote {} bytes to {:?}", data.len(), validated_output);
    Ok(())
}

// =============================================================================
// INFO COMMAND
// =============================================================================

/// Print a summary of the corpus.
pub fn cmd_info(session: &Session, path: &Path, json_mode: bool) -> Result<(), WeftError> {
    let mut summary = corpus_summary(session.corpus());

    if json_mode {
        summary["corpus"] = serde_json::json!(path.to_string_lossy());
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
        return Ok(());
    }

    let corpus = session.corpus();
    println!("Weft Corpus");
    println!("===========");
    println!("Corpus: {:?}", path);
    println!();
    println!("Slot type:  {}", corpus.slot_type());
    println!("Slots:      {}", corpus.max_slot());
    println!("Nodes:      {}", corpus.max_node());
    println!();
    println!("Object types (most comprehensive first):");
    for level in corpus.levels() {
        println!("  {:<20} {:>8}", level, corpus.nodes_of_type(level).len());
    }
    println!("Node features: {}", corpus.node_feature_names().join(", "));
    println!("Edge features: {}", corpus.edge_feature_names().join(", "));

    Ok(())
}

/// The corpus summary shown by `info`, as JSON.
pub fn corpus_summary(corpus: &MemoryCorpus) -> serde_json::Value {
    let levels: Vec<serde_json::Value> = corpus
        .levels()
        .iter()
        .map(|level| {
            serde_json::json!({
                "type": level,
                "count": corpus.nodes_of_type(level).len(),
            })
        })
        .collect();
    serde_json::json!({
        "slot_type": corpus.slot_type(),
        "slots": corpus.max_slot(),
        "nodes": corpus.max_node(),
        "levels": levels,
        "node_features": corpus.node_feature_names(),
        "edge_features": corpus.edge_feature_names(),
    })
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Load the corpus and wrap it in a session.
pub fn load_session(corpus: &Path, config: SearchConfig) -> Result<Session, WeftError> {
    let corpus = load_corpus(corpus)?;
    Ok(Session::with_config(corpus, config))
}

/// Read the search configuration, or use the defaults.
pub fn load_config(path: Option<&Path>) -> Result<SearchConfig, WeftError> {
    match path {
        Some(path) => SearchConfig::from_toml_str(&read_text(path)?),
        None => Ok(SearchConfig::default()),
    }
}

/// The template text, from a file or given inline.
pub fn read_template(source: &TemplateSource) -> Result<String, WeftError> {
    match (&source.template, &source.expr) {
        (Some(path), _) => read_text(path),
        (None, Some(text)) => Ok(text.clone()),
        (None, None) => Err(WeftError::IoError(
            "No template given. Use --template <file> or -e <text>.".to_string(),
        )),
    }
}

fn read_text(path: &Path) -> Result<String, WeftError> {
    let path = validate_file_path(path)?;
    let size = std::fs::metadata(&path)
        .map_err(|e| WeftError::IoError(format!("Cannot read file metadata: {}", e)))?
        .len();
    if size > MAX_TEXT_FILE_SIZE {
        return Err(WeftError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            size, MAX_TEXT_FILE_SIZE
        )));
    }
    std::fs::read_to_string(&path)
        .map_err(|e| WeftError::IoError(format!("Read {}: {}", path.display(), e)))
}
