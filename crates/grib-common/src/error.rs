//! Error types for the GRIB toolkit.

use thiserror::Error;

/// Result type alias using GribError.
pub type GribResult<T> = Result<T, GribError>;

/// Primary error type for decode, accessor, and index operations.
#[derive(Debug, Error)]
pub enum GribError {
    // === Structural decode errors ===
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Missing 7777 marker at end of message")]
    MissingEndMarker,

    #[error("Premature end of file while reading a message")]
    PrematureEndOfFile,

    #[error("Unsupported edition: {0}")]
    UnsupportedEdition(u8),

    // === Key lookup ===
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Missing key: {0}")]
    MissingKey(String),

    // === Accessor contract violations ===
    #[error("Cannot convert key '{key}' from {from} to {to}")]
    WrongConversion {
        key: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Value {value} for key '{key}' does not fit in {bits} bits")]
    OutOfRange { key: String, value: i64, bits: u32 },

    #[error("Key is read only: {0}")]
    ReadOnly(String),

    #[error("Invalid type for key '{key}': expected {expected}, got {actual}")]
    InvalidType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    // === Capacity negotiation ===
    #[error("Buffer too small: need {needed}, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Array too small: need {needed}, have {capacity}")]
    ArrayTooSmall { needed: usize, capacity: usize },

    // === Index enumeration ===
    #[error("End of index reached")]
    EndOfIndex,

    // === Storage boundary ===
    #[error("I/O problem: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    // === Persisted index ===
    #[error("Corrupted index: {0}")]
    CorruptedIndex(String),
}

impl GribError {
    /// Stable numeric code for this error kind.
    ///
    /// Suitable for FFI surfaces and log correlation; the mapping never
    /// changes for an existing variant.
    pub fn code(&self) -> i32 {
        match self {
            GribError::InvalidMessage(_) => -12,
            GribError::Malformed(_) => -51,
            GribError::MissingEndMarker => -5,
            GribError::PrematureEndOfFile => -45,
            GribError::UnsupportedEdition(_) => -64,
            GribError::KeyNotFound(_) => -10,
            GribError::MissingKey(_) => -34,
            GribError::WrongConversion { .. } => -58,
            GribError::OutOfRange { .. } => -65,
            GribError::ReadOnly(_) => -18,
            GribError::InvalidType { .. } => -24,
            GribError::BufferTooSmall { .. } => -3,
            GribError::ArrayTooSmall { .. } => -6,
            GribError::EndOfIndex => -43,
            GribError::Io(_) => -11,
            GribError::FileNotFound(_) => -7,
            GribError::CorruptedIndex(_) => -52,
        }
    }

    /// True for the enumeration termination sentinel, which callers loop
    /// on rather than treat as a failure.
    pub fn is_end_of_index(&self) -> bool {
        matches!(self, GribError::EndOfIndex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(GribError::MissingEndMarker.code(), -5);
        assert_eq!(GribError::KeyNotFound("t".into()).code(), -10);
        assert_eq!(GribError::EndOfIndex.code(), -43);
        assert_eq!(GribError::CorruptedIndex("bad magic".into()).code(), -52);
    }

    #[test]
    fn test_end_of_index_sentinel() {
        assert!(GribError::EndOfIndex.is_end_of_index());
        assert!(!GribError::PrematureEndOfFile.is_end_of_index());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: GribError = io.into();
        assert_eq!(err.code(), -11);
    }
}
