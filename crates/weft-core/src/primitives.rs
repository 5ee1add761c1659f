//! # Innate Primitives
//!
//! Hardcoded constants for the Weft engine.
//!
//! Tuning values here are the defaults of [`crate::SearchConfig`];
//! everything else is fixed by the template language and the snapshot format.

// =============================================================================
// SNAPSHOT FORMAT
// =============================================================================

/// Magic bytes for the Weft corpus snapshot header.
///
/// - File Header = Magic Bytes ("WEFT") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"WEFT";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

/// Largest node count a corpus description may declare.
///
/// Index tables are sized from the declared counts before any node is read.
pub const MAX_CORPUS_NODES: u64 = 50_000_000;

// =============================================================================
// SEARCH TUNING DEFAULTS
// =============================================================================

/// Fixed-point unit for spreads and yarn fractions.
///
/// A spread of `PER_MILLE` means one expected target node per source node.
pub const PER_MILLE: u64 = 1000;

/// Work budget for narrowing a yarn pair through the generic relation path.
///
/// A narrowing step whose `spread * |yarn(from)|` exceeds this is skipped.
pub const SPIN_LIMIT: u64 = 1000;

/// Number of source nodes sampled when estimating the spread of a relation.
pub const TRY_LIMIT_FROM: usize = 10;

/// Number of target nodes sampled per source when the relation is a predicate.
pub const TRY_LIMIT_TO: usize = 10;

/// Default progress interval of `count`.
pub const PROGRESS: usize = 100;

/// Default number of results after which `count` stops. Zero means no limit.
pub const COUNT_LIMIT: usize = 1000;

// =============================================================================
// TEMPLATE LANGUAGE
// =============================================================================

/// Atom type that matches nodes of every type.
pub const ANY_TYPE: &str = ".";

/// Atom type that refers to the quantified atom inside a quantifier body.
pub const PARENT_REF: &str = "..";

/// Base name for a synthetic parent atom name.
pub const PARENT_NAME: &str = "parent";

/// Relation implied between a child atom and its enclosing atom.
pub const EMBEDDED_IN: &str = "]]";

/// Relation implied between an atom and the atom it names as its type.
pub const SAME_NODE: &str = "=";
