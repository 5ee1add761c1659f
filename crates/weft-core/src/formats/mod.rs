//! # Formats
//!
//! Byte-level encodings of corpus data. File I/O lives in the app layer.

pub mod persistence;

pub use persistence::{
    MAX_PERSISTENCE_PAYLOAD_SIZE, PersistenceHeader, corpus_from_bytes, corpus_to_bytes,
};
