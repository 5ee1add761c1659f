//! # weft-core
//!
//! The declarative graph-pattern search engine for Weft - THE LOGIC.
//!
//! A search template describes node patterns ("atoms"), feature conditions,
//! relations between atoms and quantified sub-conditions. The engine returns
//! every tuple of corpus nodes that satisfies the template.
//!
//! ## Pipeline
//!
//! - `syntax`: template text to tokens
//! - `semantics`: tokens to a query graph, checked against the corpus
//! - `connectivity`: reject queries that fall apart
//! - `spin`: narrow candidate sets through features, quantifiers and edges
//! - `planner`: order the edges for retrieval
//! - `stitch`: lazy backtracking enumeration of results
//! - `query` / `session`: the facade
//!
//! ## Architectural Constraints
//!
//! - The corpus is read-only during a search
//! - Deterministic: the same template on the same corpus gives the same
//!   estimates, the same plan and the same results
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod connectivity;
pub mod constraint;
pub mod corpus;
pub mod formats;
pub mod planner;
pub mod primitives;
pub mod query;
pub mod relations;
pub mod semantics;
pub mod session;
pub mod spin;
pub mod stitch;
pub mod syntax;
pub mod types;

#[cfg(test)]
mod fixtures;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Diagnostic, FeatureType, FeatureValue, NodeId, ResultTuple, WeftError};

// =============================================================================
// RE-EXPORTS: Corpus and Search
// =============================================================================

pub use config::SearchConfig;
pub use constraint::{FeatureConstraint, Predicates, ValuePredicate};
pub use corpus::{Corpus, CorpusBuilder, EdgeTarget, MemoryCorpus, SerializableCorpus};
pub use planner::{Plan, Strategy};
pub use query::{Query, QueryState};
pub use relations::relations_legend;
pub use semantics::CustomSets;
pub use session::Session;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{PersistenceHeader, corpus_from_bytes, corpus_to_bytes};
