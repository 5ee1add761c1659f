//! # Persistence Format
//!
//! Binary snapshots of a corpus.
//!
//! Format: Header (5 bytes) + postcard-serialized corpus data.
//! - 4 bytes: Magic ("WEFT")
//! - 1 byte: Version
//!
//! Only the raw corpus data is stored; every index is rebuilt on load, so a
//! snapshot that decodes also passes the corpus consistency checks or is
//! rejected as a whole.
//!
//! ## Limits
//!
//! - Maximum payload size (`MAX_PERSISTENCE_PAYLOAD_SIZE`), checked before
//!   decoding
//! - Header validation before payload parsing

use crate::{MemoryCorpus, SerializableCorpus, WeftError, primitives};

/// Maximum allowed snapshot size.
///
/// Checked BEFORE attempting deserialization.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 500 * 1024 * 1024; // 500 MB

const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all corpus data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// A header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), WeftError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(WeftError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(WeftError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WeftError> {
        if bytes.len() < HEADER_SIZE {
            return Err(WeftError::DeserializationError(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a corpus to bytes (header + payload).
pub fn corpus_to_bytes(corpus: &MemoryCorpus) -> Result<Vec<u8>, WeftError> {
    let data = SerializableCorpus::from(corpus);
    let payload =
        postcard::to_stdvec(&data).map_err(|e| WeftError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a corpus from bytes and rebuild its indices.
pub fn corpus_from_bytes(bytes: &[u8]) -> Result<MemoryCorpus, WeftError> {
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(WeftError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }
    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    let data: SerializableCorpus = postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        WeftError::DeserializationError(format!("Failed to deserialize corpus data: {e}"))
    })?;
    MemoryCorpus::try_from(data)
}

// =============================================================================
// TESTS
// =============================================================================
