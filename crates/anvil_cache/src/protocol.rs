//! Wire protocol between [`RemoteCache`](crate::RemoteCache) and
//! [`CacheServer`](crate::CacheServer).
//!
//! Each message is one frame: a 4-byte little-endian body length followed by
//! the bincode-encoded message. A connection carries any number of
//! request/response pairs; closing it between frames ends the session.

use std::io::{ErrorKind, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::content::CacheKey;
use crate::error::CacheError;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Liveness check.
    Ping,
    /// Fetch the entry for a key.
    Get {
        /// The entry key.
        key: CacheKey,
    },
    /// Store and commit an entry.
    Put {
        /// The entry key.
        key: CacheKey,
        /// The product bytes.
        data: Vec<u8>,
    },
}

/// A server response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Answer to [`Request::Ping`].
    Pong,
    /// The requested entry.
    Hit {
        /// The product bytes.
        data: Vec<u8>,
    },
    /// No entry for the key.
    Miss,
    /// The entry was committed.
    Stored,
    /// The server refused or failed the request.
    Rejected {
        /// Why the request failed.
        reason: String,
    },
}

/// Writes one framed message.
pub fn write_frame<T: Serialize>(writer: &mut impl Write, message: &T) -> Result<(), CacheError> {
    let body = bincode::serde::encode_to_vec(message, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CacheError::Protocol {
            reason: format!("frame of {} bytes exceeds limit", body.len()),
        });
    }
    writer
        .write_all(&(body.len() as u32).to_le_bytes())
        .and_then(|()| writer.write_all(&body))
        .and_then(|()| writer.flush())
        .map_err(|e| CacheError::Protocol {
            reason: format!("failed to send frame: {e}"),
        })
}

/// Reads one framed message. Returns `Ok(None)` if the peer closed the
/// connection cleanly before a new frame started.
pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<Option<T>, CacheError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(CacheError::Protocol {
                reason: format!("failed to read frame length: {e}"),
            })
        }
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CacheError::Protocol {
            reason: format!("frame of {len} bytes exceeds limit"),
        });
    }
    // Grows with the bytes that actually arrive, not with the declared length.
    let mut body = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut body)
        .map_err(|e| CacheError::Protocol {
            reason: format!("truncated frame: {e}"),
        })?;
    if body.len() < len {
        return Err(CacheError::Protocol {
            reason: format!("truncated frame: {} of {len} bytes", body.len()),
        });
    }
    let (message, _) = bincode::serde::decode_from_slice(&body, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    Ok(Some(message))
}
