//! # Corpus Files
//!
//! Loading corpora from disk. Two formats are accepted:
//!
//! - binary snapshots written by `weft snapshot` (recognized by the magic
//!   bytes at the start of the file)
//! - JSON corpus descriptions:
//!
//! ```json
//! {
//!   "slot_type": "letter",
//!   "slots": 3,
//!   "nodes": [{ "type": "word", "slots": [1, 2, 3] }],
//!   "node_features": { "g": { "1": "c", "2": "a", "3": "t" } },
//!   "edge_features": {
//!     "next": { "edges": [{ "from": 1, "to": 2 }, { "from": 2, "to": 3 }] }
//!   }
//! }
//! ```
//!
//! Non-slot nodes are numbered after the slots, in the order they are listed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use weft_core::primitives::MAGIC_BYTES;
use weft_core::{
    CorpusBuilder, FeatureType, FeatureValue, MemoryCorpus, NodeId, WeftError, corpus_from_bytes,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a JSON corpus description (100 MB).
const MAX_JSON_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum size of a snapshot (500 MB).
const MAX_SNAPSHOT_FILE_SIZE: u64 = 500 * 1024 * 1024;

// =============================================================================
// JSON FORMAT
// =============================================================================

/// A corpus as described in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusFile {
    pub slot_type: String,
    pub slots: u64,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    /// Feature name to (node number to value).
    #[serde(default)]
    pub node_features: BTreeMap<String, BTreeMap<u64, FeatureValue>>,
    #[serde(default)]
    pub edge_features: BTreeMap<String, EdgeFeatureSpec>,
}

/// A non-slot node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "type")]
    pub otype: String,
    pub slots: Vec<u64>,
}

/// An edge feature. Without `value_type` its edges carry no values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeFeatureSpec {
    #[serde(default)]
    pub value_type: Option<FeatureType>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: u64,
    pub to: u64,
    #[serde(default)]
    pub value: Option<FeatureValue>,
}

impl CorpusFile {
    /// Parse a JSON corpus description.
    pub fn from_json(data: &[u8]) -> Result<Self, WeftError> {
        serde_json::from_slice(data)
            .map_err(|e| WeftError::DeserializationError(format!("Corpus JSON: {e}")))
    }

    /// Build the in-memory corpus with all its indices.
    pub fn build(&self) -> Result<MemoryCorpus, WeftError> {
        let mut builder = CorpusBuilder::new(self.slot_type.as_str(), self.slots);
        for node in &self.nodes {
            builder.add_node(&node.otype, &node.slots)?;
        }
        for (feature, values) in &self.node_features {
            for (node, value) in values {
                builder.set_value(feature, NodeId(*node), value.clone())?;
            }
        }
        for (feature, spec) in &self.edge_features {
            builder.declare_edge_feature(feature, spec.value_type);
            for edge in &spec.edges {
                builder.add_edge(feature, NodeId(edge.from), NodeId(edge.to), edge.value.clone())?;
            }
        }
        builder.build()
    }
}

// =============================================================================
// LOADING
// =============================================================================

/// Load a corpus from a snapshot or a JSON description.
pub fn load_corpus(path: &Path) -> Result<MemoryCorpus, WeftError> {
    let path = validate_file_path(path)?;
    validate_file_size(&path, MAX_SNAPSHOT_FILE_SIZE)?;
    let data = std::fs::read(&path)
        .map_err(|e| WeftError::IoError(format!("Read corpus {}: {e}", path.display())))?;

    if data.starts_with(MAGIC_BYTES) {
        tracing::info!("Loading snapshot {}", path.display());
        return corpus_from_bytes(&data);
    }
    if data.len() as u64 > MAX_JSON_FILE_SIZE {
        return Err(WeftError::SerializationError(format!(
            "JSON corpus of {} bytes exceeds maximum allowed {} bytes",
            data.len(),
            MAX_JSON_FILE_SIZE
        )));
    }
    tracing::info!("Building corpus from {}", path.display());
    CorpusFile::from_json(&data)?.build()
}

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), WeftError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| WeftError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(WeftError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path and make sure it is a regular file.
pub fn validate_file_path(path: &Path) -> Result<PathBuf, WeftError> {
    let canonical = path.canonicalize().map_err(|e| {
        WeftError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(WeftError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path: the parent directory must exist.
pub fn validate_output_path(path: &Path) -> Result<PathBuf, WeftError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        WeftError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(WeftError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| WeftError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// TESTS
// =============================================================================
