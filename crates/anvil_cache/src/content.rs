//! The pluggable content cache interface.

use std::io::{Read, Write};

use anvil_common::{ContentHash, Fingerprint, Identity};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Key of one cached build product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Identity of the output.
    pub identity: Identity,
    /// Fingerprint that produced the output.
    pub fingerprint: Fingerprint,
    /// Version of the transform that produced the output.
    pub version: u32,
}

impl CacheKey {
    /// Creates a new cache key.
    pub fn new(identity: Identity, fingerprint: Fingerprint, version: u32) -> Self {
        Self {
            identity,
            fingerprint,
            version,
        }
    }

    /// Returns the hash of all three key parts, used as the storage address.
    pub fn digest(&self) -> ContentHash {
        ContentHash::from_parts([
            self.identity.as_bytes().as_slice(),
            self.fingerprint.as_bytes().as_slice(),
            &self.version.to_le_bytes(),
        ])
    }
}

/// Read/write permissions of a cache tier.
///
/// A shared team cache is typically read-only for engineers and writable
/// only by the build server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheAccess {
    /// Entries may be read.
    pub read: bool,
    /// Entries may be written.
    pub write: bool,
}

impl CacheAccess {
    /// Full access.
    pub const READ_WRITE: CacheAccess = CacheAccess {
        read: true,
        write: true,
    };
    /// Lookups only.
    pub const READ_ONLY: CacheAccess = CacheAccess {
        read: true,
        write: false,
    };
    /// Stores only.
    pub const WRITE_ONLY: CacheAccess = CacheAccess {
        read: false,
        write: true,
    };
}

/// A storage of build products keyed by [`CacheKey`].
///
/// Implementations must publish entries atomically: a concurrent [`get`]
/// never observes an entry whose writer has not committed.
///
/// [`get`]: ContentCache::get
pub trait ContentCache: Send + Sync {
    /// Short human-readable name used in logs.
    fn name(&self) -> &str;

    /// The access this tier grants.
    fn access(&self) -> CacheAccess;

    /// Opens the entry for `key`, or returns `Ok(None)` on a miss.
    fn get(&self, key: &CacheKey) -> Result<Option<Box<dyn Read + Send>>, CacheError>;

    /// Starts writing the entry for `key`. Nothing is visible until
    /// [`CacheWriter::commit`] succeeds.
    fn put(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>, CacheError>;
}

/// A pending cache entry. Dropping it without committing discards it.
pub trait CacheWriter: Write + Send {
    /// Publishes the written bytes under the writer's key.
    fn commit(self: Box<Self>) -> Result<(), CacheError>;
}

/// Writer that collects bytes in memory and hands them to `publish` on commit.
pub(crate) struct BufferedWriter<F>
where
    F: FnOnce(Vec<u8>) -> Result<(), CacheError> + Send,
{
    buffer: Vec<u8>,
    publish: Option<F>,
}

impl<F> BufferedWriter<F>
where
    F: FnOnce(Vec<u8>) -> Result<(), CacheError> + Send,
{
    pub(crate) fn new(publish: F) -> Self {
        Self {
            buffer: Vec::new(),
            publish: Some(publish),
        }
    }
}

impl<F> Write for BufferedWriter<F>
where
    F: FnOnce(Vec<u8>) -> Result<(), CacheError> + Send,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<F> CacheWriter for BufferedWriter<F>
where
    F: FnOnce(Vec<u8>) -> Result<(), CacheError> + Send,
{
    fn commit(mut self: Box<Self>) -> Result<(), CacheError> {
        let buffer = std::mem::take(&mut self.buffer);
        match self.publish.take() {
            Some(publish) => publish(buffer),
            None => Err(CacheError::Protocol {
                reason: "cache entry committed twice".to_string(),
            }),
        }
    }
}

/// Reads a whole entry into memory.
pub fn read_entry(cache: &dyn ContentCache, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
    let Some(mut reader) = cache.get(key)? else {
        return Ok(None);
    };
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| CacheError::Protocol {
            reason: format!("failed to read entry from '{}': {e}", cache.name()),
        })?;
    Ok(Some(bytes))
}

/// Writes and commits a whole entry.
pub fn write_entry(
    cache: &dyn ContentCache,
    key: &CacheKey,
    bytes: &[u8],
) -> Result<(), CacheError> {
    let mut writer = cache.put(key)?;
    writer.write_all(bytes).map_err(|e| CacheError::Protocol {
        reason: format!("failed to write entry to '{}': {e}", cache.name()),
    })?;
    writer.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_common::FingerprintBuilder;

    fn key(name: &str, version: u32) -> CacheKey {
        CacheKey::new(
            Identity::from_name(name),
            FingerprintBuilder::new(name).finish(),
            version,
        )
    }

    #[test]
    fn digest_depends_on_every_part() {
        let base = key("a", 1);
        assert_eq!(base.digest(), key("a", 1).digest());
        assert_ne!(base.digest(), key("a", 2).digest());

        let mut other_fp = base;
        other_fp.fingerprint = FingerprintBuilder::new("other").finish();
        assert_ne!(base.digest(), other_fp.digest());

        let mut other_id = base;
        other_id.identity = Identity::from_name("b");
        assert_ne!(base.digest(), other_id.digest());
    }

    #[test]
    fn buffered_writer_publishes_on_commit() {
        use std::sync::{Arc, Mutex};

        let published = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&published);
        let mut writer: Box<dyn CacheWriter> = Box::new(BufferedWriter::new(move |bytes| {
            *sink.lock().unwrap() = Some(bytes);
            Ok(())
        }));
        writer.write_all(b"abc").unwrap();
        writer.write_all(b"def").unwrap();
        assert!(published.lock().unwrap().is_none());
        writer.commit().unwrap();
        assert_eq!(published.lock().unwrap().as_deref(), Some(&b"abcdef"[..]));
    }
}
