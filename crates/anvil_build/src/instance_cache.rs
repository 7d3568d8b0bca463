//! Read-through cache of deserialized source assets.

use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use anvil_common::{ContentHash, Identity};

use crate::asset::SourceAsset;
use crate::store::{SourceStore, StoreError};

#[derive(Clone)]
struct CachedInstance {
    asset: Arc<SourceAsset>,
    content_hash: ContentHash,
}

struct InstanceState {
    entries: HashMap<Identity, CachedInstance>,
    notifications: Option<Receiver<Identity>>,
}

/// Memoizes source assets by identity for collection and build.
///
/// Invalidation is push-only: the source store's change notifications, or an
/// explicit [`flush`](Self::flush), evict entries. Pending notifications are
/// applied at the start of every lookup. The store is read outside the lock.
pub struct InstanceCache {
    store: Arc<dyn SourceStore>,
    state: Mutex<InstanceState>,
}

impl InstanceCache {
    /// Creates a cache over `store` and subscribes to its change notifications.
    pub fn new(store: Arc<dyn SourceStore>) -> Self {
        let notifications = store.subscribe();
        Self {
            store,
            state: Mutex::new(InstanceState {
                entries: HashMap::new(),
                notifications,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InstanceState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let changed: Vec<Identity> = match &state.notifications {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        };
        for identity in changed {
            if state.entries.remove(&identity).is_some() {
                tracing::trace!(%identity, "source changed, instance evicted");
            }
        }
        state
    }

    /// Returns the asset for `identity`, fetching it from the store on a miss.
    pub fn get_object_read_only(
        &self,
        identity: &Identity,
    ) -> Result<Option<Arc<SourceAsset>>, StoreError> {
        Ok(self.lookup(identity)?.map(|cached| cached.asset))
    }

    /// Returns the asset together with its content hash.
    pub fn get_with_hash(
        &self,
        identity: &Identity,
    ) -> Result<Option<(Arc<SourceAsset>, ContentHash)>, StoreError> {
        Ok(self
            .lookup(identity)?
            .map(|cached| (cached.asset, cached.content_hash)))
    }

    fn lookup(&self, identity: &Identity) -> Result<Option<CachedInstance>, StoreError> {
        if let Some(hit) = self.lock().entries.get(identity) {
            return Ok(Some(hit.clone()));
        }
        let Some(asset) = self.store.get_object_read_only(identity)? else {
            return Ok(None);
        };
        let fetched = CachedInstance {
            content_hash: asset.content_hash(),
            asset: Arc::new(asset),
        };
        // A concurrent miss may have inserted first; keep that one so every
        // caller shares a single Arc.
        let mut state = self.lock();
        Ok(Some(state.entries.entry(*identity).or_insert(fetched).clone()))
    }

    /// Evicts `identity`. The next lookup re-reads the store.
    pub fn flush(&self, identity: &Identity) -> bool {
        self.lock().entries.remove(identity).is_some()
    }

    /// Evicts every entry.
    pub fn flush_all(&self) {
        self.lock().entries.clear();
    }

    /// Number of cached instances.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
