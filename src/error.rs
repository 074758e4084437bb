//! Error types for archive operations.
//!
//! Every fallible operation in the library returns [`Result<T>`]. Variants
//! carry the entry name, byte offset and expected/actual values where they
//! are known, so a failure can be diagnosed without re-parsing the archive.

use std::fmt;
use std::io;

use crate::zip::CompressionMethod;

/// Which integrity value failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityKind {
    Crc,
    Sha256,
    /// Decompressed length differs from the directory's uncompressed size.
    Size,
}

impl fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityKind::Crc => write!(f, "CRC-32"),
            IntegrityKind::Sha256 => write!(f, "SHA-256"),
            IntegrityKind::Size => write!(f, "size"),
        }
    }
}

/// Errors that can occur while reading, writing or copying archives.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// I/O error from the underlying source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport error from an HTTP source.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A remote source misbehaved (bad status, missing headers, retries exhausted).
    #[error("remote source error: {0}")]
    Remote(String),

    /// A record signature did not match or its fixed region was truncated.
    #[error("malformed {record} at offset {offset:#x}: {reason}")]
    MalformedRecord {
        record: &'static str,
        offset: u64,
        reason: String,
    },

    /// No End-Of-Central-Directory record, or the directory it describes is unusable.
    #[error("invalid archive format: {0}")]
    InvalidFormat(String),

    /// A verified hash did not match the stored value.
    #[error("{kind} mismatch for '{name}': expected {expected}, got {actual}")]
    Integrity {
        name: String,
        kind: IntegrityKind,
        expected: String,
        actual: String,
    },

    /// The cipher check byte did not match; no plaintext was released.
    #[error("incorrect password for '{name}'")]
    PasswordIncorrect { name: String },

    /// A SHA-256 check was required but the entry carries no digest.
    #[error("entry '{name}' has no stored SHA-256 digest")]
    MissingDigest { name: String },

    /// Declared sizes reach past the end of the source.
    #[error(
        "source truncated while copying '{name}': need {needed} bytes at offset {offset:#x}, only {available} available"
    )]
    TruncatedSource {
        name: String,
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// The 16-byte trailer after a payload is not a data descriptor.
    #[error("bad data descriptor signature for '{name}' at offset {offset:#x}: {actual:#010x}")]
    BadDataDescriptorSignature {
        name: String,
        offset: u64,
        actual: u32,
    },

    /// The underlying codec rejected the data.
    #[error("{method} codec failure: {reason}")]
    CompressionFailure {
        method: CompressionMethod,
        reason: String,
    },

    /// Compression method code this engine cannot decode.
    #[error("unsupported compression method: {0}")]
    UnsupportedMethod(u16),

    /// No entry with the requested name.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// The container is empty; call `load` first.
    #[error("archive not loaded")]
    NotLoaded,

    /// A configuration value is out of range.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A valid request that this engine does not support.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    pub(crate) fn malformed(record: &'static str, offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            record,
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn crc_mismatch(name: &str, expected: u32, actual: u32) -> Self {
        Error::Integrity {
            name: name.to_string(),
            kind: IntegrityKind::Crc,
            expected: format!("{expected:#010x}"),
            actual: format!("{actual:#010x}"),
        }
    }

    pub(crate) fn sha256_mismatch(name: &str, expected: &str, actual: &str) -> Self {
        Error::Integrity {
            name: name.to_string(),
            kind: IntegrityKind::Sha256,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn size_mismatch(name: &str, expected: u64, actual: u64) -> Self {
        Error::Integrity {
            name: name.to_string(),
            kind: IntegrityKind::Size,
            expected: format!("{expected} bytes"),
            actual: format!("{actual} bytes"),
        }
    }

    pub(crate) fn codec(method: CompressionMethod, err: impl fmt::Display) -> Self {
        Error::CompressionFailure {
            method,
            reason: err.to_string(),
        }
    }

    /// Whether this error reports a failed integrity check.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity { .. })
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
