//! # Weft
//!
//! The command line face of the weft-core search engine.
//!
//! - `corpus_file`: corpora from JSON descriptions or binary snapshots
//! - `cli`: argument parsing and command implementations

pub mod cli;
pub mod corpus_file;
