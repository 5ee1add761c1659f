//! Integration tests for corpus loading and CLI commands.

#![allow(clippy::panic)]

use std::io::Write;
use weft::cli::{
    Cli, Commands, SearchOptions, TemplateSource, cmd_snapshot, corpus_summary, format_gleaned,
    format_results, load_config, load_session, read_template, search_results,
};
use weft::corpus_file::load_corpus;
use weft_core::{Corpus, NodeId, SearchConfig, WeftError};

/// "the cat": letters 1..=6, words 7 and 8, a sentence 9.
const CORPUS_JSON: &str = r#"{
    "slot_type": "letter",
    "slots": 6,
    "nodes": [
        { "type": "word", "slots": [1, 2, 3] },
        { "type": "word", "slots": [4, 5, 6] },
        { "type": "sentence", "slots": [1, 2, 3, 4, 5, 6] }
    ],
    "node_features": {
        "g": { "1": "t", "2": "h", "3": "e", "4": "c", "5": "a", "6": "t" },
        "text": { "7": "the", "8": "cat" }
    },
    "edge_features": {
        "next": { "edges": [
            { "from": 1, "to": 2 }, { "from": 2, "to": 3 },
            { "from": 4, "to": 5 }, { "from": 5, "to": 6 }
        ] }
    }
}"#;

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(contents.as_bytes()).expect("write");
    path
}

// =============================================================================
// CORPUS LOADING
// =============================================================================

#[test]
fn test_load_json_corpus() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "corpus.json", CORPUS_JSON);

    let corpus = load_corpus(&path).expect("load");
    assert_eq!(corpus.max_node(), 9);
    assert_eq!(corpus.levels(), ["sentence", "word", "letter"]);
}

#[test]
fn test_snapshot_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let json = write_file(&dir, "corpus.json", CORPUS_JSON);
    let snapshot = dir.path().join("corpus.weft");

    let session = load_session(&json, SearchConfig::default()).expect("session");
    cmd_snapshot(&session, &snapshot).expect("snapshot");

    let restored = load_session(&snapshot, SearchConfig::default()).expect("restore");
    let template = "sentence\n  word\n    letter g=t";
    assert_eq!(
        session.search(template, None).expect("search"),
        restored.search(template, None).expect("search")
    );
    assert_eq!(
        corpus_summary(session.corpus()),
        corpus_summary(restored.corpus())
    );
}

#[test]
fn test_garbage_corpus_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "corpus.json", "[1, 2, 3]");
    assert!(matches!(
        load_corpus(&path),
        Err(WeftError::DeserializationError(_))
    ));

    let truncated = dir.path().join("broken.weft");
    std::fs::write(&truncated, b"WEFT\x01\xff").expect("write");
    assert!(load_corpus(&truncated).is_err());
}

#[test]
fn test_snapshot_needs_existing_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let json = write_file(&dir, "corpus.json", CORPUS_JSON);
    let session = load_session(&json, SearchConfig::default()).expect("session");
    let target = dir.path().join("missing").join("corpus.weft");
    assert!(matches!(
        cmd_snapshot(&session, &target),
        Err(WeftError::IoError(_))
    ));
}

// =============================================================================
// TEMPLATES AND CONFIGURATION
// =============================================================================

#[test]
fn test_template_from_file_or_inline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "query.txt", "word text=cat\n  letter\n");

    let from_file = TemplateSource {
        template: Some(path),
        expr: None,
    };
    assert_eq!(
        read_template(&from_file).expect("read"),
        "word text=cat\n  letter\n"
    );

    let inline = TemplateSource {
        template: None,
        expr: Some("word".to_string()),
    };
    assert_eq!(read_template(&inline).expect("read"), "word");
}

#[test]
fn test_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(&dir, "weft.toml", "count_limit = 1\nspin_limit = 50\n");

    let config = load_config(Some(path.as_path())).expect("config");
    assert_eq!(config.count_limit, 1);
    assert_eq!(config.spin_limit, 50);
    assert_eq!(load_config(None).expect("default"), SearchConfig::default());

    let json = write_file(&dir, "corpus.json", CORPUS_JSON);
    let session = load_session(&json, config).expect("session");
    assert_eq!(session.count("letter", None, None), Ok(1));

    let bad = write_file(&dir, "bad.toml", "progress = 0\n");
    assert!(matches!(load_config(Some(bad.as_path())), Err(WeftError::Config(_))));
}

// =============================================================================
// OUTPUT
// =============================================================================

#[test]
fn test_format_results() {
    let results = vec![vec![NodeId(7), NodeId(1)], vec![NodeId(8), NodeId(6)]];
    assert_eq!(format_results(&results, false), "7\t1\n8\t6");

    let json: serde_json::Value =
        serde_json::from_str(&format_results(&results, true)).expect("json");
    assert_eq!(json["count"], 2);
    assert_eq!(json["results"][1][0], 8);
}

#[test]
fn test_shallow_search_and_glean() {
    let dir = tempfile::tempdir().expect("tempdir");
    let json = write_file(&dir, "corpus.json", CORPUS_JSON);
    let session = load_session(&json, SearchConfig::default()).expect("session");

    let template = "word\n  letter g=t";
    let full = SearchOptions::default();
    assert_eq!(search_results(&session, template, &full).expect("search").len(), 2);

    let shallow = SearchOptions {
        shallow: Some(1),
        ..SearchOptions::default()
    };
    let words = search_results(&session, template, &shallow).expect("search");
    assert_eq!(words, vec![vec![NodeId(7)], vec![NodeId(8)]]);

    let gleaned = format_gleaned(&session, &words, "g", false);
    assert_eq!(gleaned, "word[t h e]\nword[c a t]");

    let pair = vec![vec![NodeId(8), NodeId(6)]];
    let json: serde_json::Value =
        serde_json::from_str(&format_gleaned(&session, &pair, "g", true)).expect("json");
    assert_eq!(json["count"], 1);
    assert_eq!(json["results"][0], "word[c a t] t");
}

#[test]
fn test_corpus_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let json = write_file(&dir, "corpus.json", CORPUS_JSON);
    let session = load_session(&json, SearchConfig::default()).expect("session");

    let summary = corpus_summary(session.corpus());
    assert_eq!(summary["slots"], 6);
    assert_eq!(summary["levels"][1]["type"], "word");
    assert_eq!(summary["levels"][1]["count"], 2);
    assert_eq!(summary["edge_features"][0], "next");
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn test_cli_parsing() {
    use clap::Parser;

    let cli = Cli::try_parse_from([
        "weft", "--corpus", "c.json", "search", "-e", "word", "--limit", "3",
    ])
    .expect("parse");
    assert_eq!(cli.corpus, std::path::PathBuf::from("c.json"));
    match cli.command {
        Some(Commands::Search { source, limit, .. }) => {
            assert_eq!(source.expr.as_deref(), Some("word"));
            assert_eq!(limit, Some(3));
        }
        other => panic!("unexpected command {other:?}"),
    }

    let cli = Cli::try_parse_from([
        "weft", "search", "-e", "word", "--shallow", "1", "--glean", "text",
    ])
    .expect("parse");
    match cli.command {
        Some(Commands::Search { shallow, glean, .. }) => {
            assert_eq!(shallow, Some(1));
            assert_eq!(glean.as_deref(), Some("text"));
        }
        other => panic!("unexpected command {other:?}"),
    }

    // a template is required, and only one source at a time
    assert!(Cli::try_parse_from(["weft", "count"]).is_err());
    assert!(Cli::try_parse_from(["weft", "plan", "-e", "word", "-t", "q.txt"]).is_err());
}
