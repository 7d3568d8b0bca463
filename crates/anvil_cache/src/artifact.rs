//! Binary framing for every file the cache layer writes.
//!
//! Cache entries and the build-state file share one layout: a 4-byte
//! little-endian header length, a bincode-encoded [`ArtifactHeader`], then the
//! payload. The header carries magic bytes identifying the file kind, a
//! format version, and a checksum over the payload.

use std::path::{Path, PathBuf};

use anvil_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes of a content cache entry.
pub const ENTRY_MAGIC: [u8; 4] = *b"ANVC";

/// Magic bytes of a build-state file.
pub const STATE_MAGIC: [u8; 4] = *b"ANVS";

/// Current artifact format version. Increment on breaking changes to
/// the header or payload format.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every artifact for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes identifying the file kind.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// Content hash of the payload data (for integrity checks).
    pub checksum: ContentHash,
}

/// Frames `payload` with a header for the given file kind.
pub fn encode(magic: [u8; 4], payload: &[u8]) -> Result<Vec<u8>, CacheError> {
    let header = ArtifactHeader {
        magic,
        format_version: ARTIFACT_FORMAT_VERSION,
        checksum: ContentHash::from_bytes(payload),
    };

    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(payload);
    Ok(output)
}

/// Validates a framed artifact and returns its payload.
///
/// `path` is only used to label errors.
pub fn decode<'a>(magic: [u8; 4], raw: &'a [u8], path: &Path) -> Result<&'a [u8], CacheError> {
    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if raw.len() < 4 {
        return Err(invalid("truncated header length"));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if raw.len() < 4 + header_len {
        return Err(invalid("truncated header"));
    }

    let (header, _): (ArtifactHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
            .map_err(|e| invalid(&e.to_string()))?;

    if header.magic != magic {
        return Err(invalid("wrong magic bytes"));
    }

    if header.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: ARTIFACT_FORMAT_VERSION,
            actual: header.format_version,
        });
    }

    let payload = &raw[4 + header_len..];
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    Ok(payload)
}

/// Writes `bytes` to `path` atomically: temp file in the same directory,
/// fsync, then rename over the destination.
pub fn write_atomic(path: &Path, temp: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let result = (|| {
        let mut file = std::fs::File::create(temp).map_err(|e| io_error(temp, e))?;
        file.write_all(bytes).map_err(|e| io_error(temp, e))?;
        file.sync_all().map_err(|e| io_error(temp, e))?;
        std::fs::rename(temp, path).map_err(|e| io_error(path, e))
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(temp);
    }
    result
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(header: &ArtifactHeader, payload: &[u8]) -> Vec<u8> {
        let header_bytes =
            bincode::serde::encode_to_vec(header, bincode::config::standard()).unwrap();
        let mut output = Vec::new();
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(payload);
        output
    }

    #[test]
    fn encode_then_decode_returns_payload() {
        let raw = encode(ENTRY_MAGIC, b"hello artifact world").unwrap();
        let payload = decode(ENTRY_MAGIC, &raw, Path::new("x")).unwrap();
        assert_eq!(payload, b"hello artifact world");
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode(ENTRY_MAGIC, b"garbage data", Path::new("x")).unwrap_err();
        assert!(matches!(err, CacheError::InvalidHeader { .. }));
    }

    #[test]
    fn decode_rejects_truncated_length() {
        let err = decode(ENTRY_MAGIC, b"AB", Path::new("x")).unwrap_err();
        assert!(matches!(err, CacheError::InvalidHeader { .. }));
    }

    #[test]
    fn decode_rejects_other_file_kind() {
        let raw = encode(STATE_MAGIC, b"state").unwrap();
        let err = decode(ENTRY_MAGIC, &raw, Path::new("x")).unwrap_err();
        assert!(err.to_string().contains("wrong magic"));
    }

    #[test]
    fn decode_rejects_wrong_version() {
        let header = ArtifactHeader {
            magic: ENTRY_MAGIC,
            format_version: 999,
            checksum: ContentHash::from_bytes(b"data"),
        };
        let raw = frame_with(&header, b"data");
        let err = decode(ENTRY_MAGIC, &raw, Path::new("x")).unwrap_err();
        assert!(matches!(
            err,
            CacheError::VersionMismatch { actual: 999, .. }
        ));
    }

    #[test]
    fn decode_rejects_tampered_payload() {
        let header = ArtifactHeader {
            magic: ENTRY_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            checksum: ContentHash::from_bytes(b"data"),
        };
        let raw = frame_with(&header, b"tampered");
        let err = decode(ENTRY_MAGIC, &raw, Path::new("x")).unwrap_err();
        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
    }

    #[test]
    fn write_atomic_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("file.bin");
        let temp = dir.path().join("nested").join("file.bin.tmp");
        write_atomic(&dest, &temp, b"one").unwrap();
        write_atomic(&dest, &temp, b"two").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"two");
        assert!(!temp.exists());
    }
}
