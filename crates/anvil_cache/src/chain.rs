//! Priority-ordered composition of cache tiers.

use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::content::{
    read_entry, write_entry, BufferedWriter, CacheAccess, CacheKey, CacheWriter, ContentCache,
};
use crate::error::CacheError;

/// An ordered list of cache tiers consulted as one cache.
///
/// Lookups walk the readable tiers in order and stop at the first hit, then
/// back-fill every earlier writable tier with the found bytes. Stores go to
/// every writable tier. A tier that errors is logged and skipped: caching
/// never fails a build. An empty chain is a disabled cache.
#[derive(Clone, Default)]
pub struct CacheChain {
    tiers: Vec<Arc<dyn ContentCache>>,
}

impl CacheChain {
    /// Creates an empty (disabled) chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tier with the lowest priority so far.
    pub fn push(&mut self, tier: Arc<dyn ContentCache>) {
        self.tiers.push(tier);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, tier: Arc<dyn ContentCache>) -> Self {
        self.push(tier);
        self
    }

    /// Returns `true` if no tier is configured.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Returns the number of tiers.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Looks `key` up in priority order. Errors count as misses.
    pub fn fetch(&self, key: &CacheKey) -> Option<Vec<u8>> {
        for (index, tier) in self.tiers.iter().enumerate() {
            if !tier.access().read {
                continue;
            }
            match read_entry(tier.as_ref(), key) {
                Ok(Some(bytes)) => {
                    tracing::debug!(cache = tier.name(), identity = %key.identity, "cache hit");
                    self.backfill(index, key, &bytes);
                    return Some(bytes);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        cache = tier.name(),
                        identity = %key.identity,
                        error = %e,
                        "cache unavailable, treating as miss"
                    );
                }
            }
        }
        None
    }

    /// Stores `bytes` in every writable tier. Returns how many tiers committed.
    pub fn store(&self, key: &CacheKey, bytes: &[u8]) -> usize {
        self.store_in(&self.tiers, key, bytes)
    }

    fn backfill(&self, hit_index: usize, key: &CacheKey, bytes: &[u8]) {
        self.store_in(&self.tiers[..hit_index], key, bytes);
    }

    fn store_in(&self, tiers: &[Arc<dyn ContentCache>], key: &CacheKey, bytes: &[u8]) -> usize {
        let mut committed = 0;
        for tier in tiers.iter().filter(|t| t.access().write) {
            match write_entry(tier.as_ref(), key, bytes) {
                Ok(()) => committed += 1,
                Err(e) => {
                    tracing::warn!(
                        cache = tier.name(),
                        identity = %key.identity,
                        error = %e,
                        "cache store failed"
                    );
                }
            }
        }
        committed
    }
}

impl ContentCache for CacheChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn access(&self) -> CacheAccess {
        CacheAccess {
            read: self.tiers.iter().any(|t| t.access().read),
            write: self.tiers.iter().any(|t| t.access().write),
        }
    }

    fn get(&self, key: &CacheKey) -> Result<Option<Box<dyn Read + Send>>, CacheError> {
        Ok(self
            .fetch(key)
            .map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>))
    }

    fn put(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>, CacheError> {
        if !self.access().write {
            return Err(CacheError::Unavailable {
                cache: self.name().to_string(),
                reason: "no writable tier".to_string(),
            });
        }
        let chain = self.clone();
        let key = *key;
        Ok(Box::new(BufferedWriter::new(move |bytes: Vec<u8>| {
            if chain.store(&key, &bytes) == 0 {
                return Err(CacheError::Unavailable {
                    cache: "chain".to_string(),
                    reason: "every writable tier failed".to_string(),
                });
            }
            Ok(())
        })))
    }
}
