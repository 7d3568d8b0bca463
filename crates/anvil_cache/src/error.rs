//! Error types for cache and build-state operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Cache reads are fail-safe: callers turn these into misses rather than
/// build failures. The build-state store surfaces them because losing a
/// commit must be reported.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An artifact file has an invalid or missing header.
    #[error("invalid artifact header in {path}: {reason}")]
    InvalidHeader {
        /// The artifact file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The artifact format version does not match the current version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the file.
        actual: u32,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A network cache could not be reached or the connection broke.
    #[error("cache transport error with {address}: {reason}")]
    Transport {
        /// The remote address.
        address: String,
        /// Description of the transport failure.
        reason: String,
    },

    /// The peer sent a malformed or unexpected message.
    #[error("cache protocol error: {reason}")]
    Protocol {
        /// Description of the protocol violation.
        reason: String,
    },

    /// The cache tier does not allow the requested access.
    #[error("cache '{cache}' is unavailable: {reason}")]
    Unavailable {
        /// Name of the cache tier.
        cache: String,
        /// Why the tier refused.
        reason: String,
    },

    /// A build-state transaction was begun twice or ended without beginning.
    #[error("build-state transaction error: {reason}")]
    Transaction {
        /// Description of the misuse.
        reason: String,
    },
}
