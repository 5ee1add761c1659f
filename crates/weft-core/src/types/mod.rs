//! # Core Type Definitions
//!
//! This module contains the core types shared by every stage of the search
//! pipeline:
//! - Corpus identifiers (`NodeId`)
//! - Feature values and their declared types (`FeatureValue`, `FeatureType`)
//! - Diagnostics collected while checking a template (`Diagnostic`)
//! - Error types (`WeftError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// CORPUS IDENTIFIERS
// =============================================================================

/// Identifier of a node in the corpus.
///
/// Slots are numbered `1..=max_slot`, all other nodes follow them.
/// `NodeId(0)` is never a valid node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Position of this node in dense per-node tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A result tuple: one corpus node per query node, in query node order.
pub type ResultTuple = Vec<NodeId>;

// =============================================================================
// FEATURE VALUES
// =============================================================================

/// Declared value type of a node or edge feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// Free text values.
    Str,
    /// Integer values.
    Int,
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str => write!(f, "str"),
            Self::Int => write!(f, "int"),
        }
    }
}

/// A single feature value as stored in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Int(i64),
    Str(String),
}

impl FeatureValue {
    /// Create a string value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// The integer payload, if this is an integer value.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(_) => None,
        }
    }

    /// The string payload, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    /// The declared type this value belongs to.
    #[must_use]
    pub const fn feature_type(&self) -> FeatureType {
        match self {
            Self::Int(_) => FeatureType::Int,
            Self::Str(_) => FeatureType::Str,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// One problem found in a template.
///
/// `line` is 0-based and already shifted into the coordinates of the
/// outermost template; `None` marks a message about the template as a whole.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Diagnostic {
    pub line: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    /// A diagnostic attached to a template line.
    #[must_use]
    pub fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }

    /// A diagnostic about the template as a whole.
    #[must_use]
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }

    /// Shift the line number by `offset` lines.
    #[must_use]
    pub fn shifted(self, offset: usize) -> Self {
        Self {
            line: self.line.map(|l| l.saturating_add(offset)),
            message: self.message,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Weft engine.
///
/// - No silent failures
/// - Use `Result<T, WeftError>` for fallible operations
/// - The engine never panics; all errors are recoverable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeftError {
    /// The template could not be tokenized.
    #[error("Syntax errors in search template:\n{}", render(.0))]
    Syntax(Vec<Diagnostic>),

    /// The template parsed but does not make sense against the corpus.
    #[error("Semantic errors in search template:\n{}", render(.0))]
    Semantic(Vec<Diagnostic>),

    /// A planning strategy produced a plan that does not cover the query.
    /// Always a defect in the strategy, never a user error.
    #[error("Planning error: {0}")]
    Planning(String),

    /// The requested planning strategy does not exist.
    #[error("Unknown search strategy: {0}")]
    UnknownStrategy(String),

    /// A nested quantifier query failed.
    #[error("Error under quantifier on line {line}: {source}")]
    Quantifier {
        line: usize,
        #[source]
        source: Box<WeftError>,
    },

    /// The query has problems and cannot produce results.
    #[error("This search has problems. No results to count.")]
    QueryFailed,

    /// The corpus description is inconsistent.
    #[error("Invalid corpus: {0}")]
    InvalidCorpus(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Configuration could not be read.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WeftError {
    /// The diagnostics carried by a syntax or semantic error, looking through
    /// quantifier wrappers.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Syntax(d) | Self::Semantic(d) => d,
            Self::Quantifier { source, .. } => source.diagnostics(),
            _ => &[],
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
