//! Capabilities the engine needs from the source and output asset stores.
//!
//! The engine reads sources through [`SourceStore`] and writes products
//! through [`OutputStore`]; it never writes the source store. [`MemoryStore`]
//! implements both for embedding and tests.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use anvil_common::Identity;

use crate::asset::SourceAsset;

/// Errors raised by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An instance was committed without an object.
    #[error("instance {identity} has no object to commit")]
    EmptyInstance {
        /// The instance identity.
        identity: Identity,
    },

    /// The backing storage failed.
    #[error("store I/O failed: {reason}")]
    Io {
        /// Underlying failure.
        reason: String,
    },

    /// The object could not be read back.
    #[error("object {identity} is unreadable: {reason}")]
    Unreadable {
        /// The object identity.
        identity: Identity,
        /// Why decoding failed.
        reason: String,
    },
}

/// Read-only access to source assets.
pub trait SourceStore: Send + Sync {
    /// Fetches the current value of `identity`, or `None` if it does not exist.
    fn get_object_read_only(&self, identity: &Identity) -> Result<Option<SourceAsset>, StoreError>;

    /// Subscribes to change notifications. Each message names an identity
    /// whose content changed. Stores without notifications return `None`.
    fn subscribe(&self) -> Option<Receiver<Identity>> {
        None
    }
}

/// Versioned storage for build products.
pub trait OutputStore: Send + Sync {
    /// Opens a new instance slot at `path` for `identity`.
    ///
    /// Nothing is visible until [`OutputInstance::commit`].
    fn create_instance(
        &self,
        path: &str,
        identity: Identity,
    ) -> Result<Box<dyn OutputInstance>, StoreError>;

    /// Returns the path of the committed instance for `identity`.
    fn locate(&self, identity: &Identity) -> Option<String>;

    /// Removes the committed instance for `identity`. Returns whether one existed.
    fn remove(&self, identity: &Identity) -> Result<bool, StoreError>;

    /// Reads the committed object for `identity`.
    fn read(&self, identity: &Identity) -> Result<Option<Vec<u8>>, StoreError>;

    /// Returns `true` if a committed instance exists for `identity`.
    fn contains(&self, identity: &Identity) -> bool {
        self.locate(identity).is_some()
    }
}

/// An uncommitted output slot.
pub trait OutputInstance: Send {
    /// The identity this instance will be committed under.
    fn identity(&self) -> Identity;

    /// Sets the object to commit.
    fn set_object(&mut self, data: Vec<u8>);

    /// Publishes the object, replacing any previous version. Returns the new version.
    fn commit(self: Box<Self>) -> Result<u64, StoreError>;

    /// Discards the instance.
    fn revert(self: Box<Self>);
}

#[derive(Debug, Clone)]
struct StoredOutput {
    path: String,
    version: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct MemoryInner {
    sources: HashMap<Identity, SourceAsset>,
    outputs: HashMap<Identity, StoredOutput>,
    subscribers: Vec<Sender<Identity>>,
    source_reads: usize,
    commits: usize,
}

/// An in-memory source and output store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        lock_inner(&self.inner)
    }

    /// Inserts or replaces a source asset and notifies subscribers.
    pub fn set_source(&self, identity: Identity, asset: SourceAsset) {
        let mut inner = self.lock();
        inner.sources.insert(identity, asset);
        inner.subscribers.retain(|tx| tx.send(identity).is_ok());
    }

    /// Removes a source asset and notifies subscribers.
    pub fn remove_source(&self, identity: &Identity) -> Option<SourceAsset> {
        let mut inner = self.lock();
        let removed = inner.sources.remove(identity);
        if removed.is_some() {
            let identity = *identity;
            inner.subscribers.retain(|tx| tx.send(identity).is_ok());
        }
        removed
    }

    /// Number of source reads served so far.
    pub fn source_reads(&self) -> usize {
        self.lock().source_reads
    }

    /// Number of successful output commits so far.
    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    /// Returns `(path, version)` of the committed output for `identity`.
    pub fn output_info(&self, identity: &Identity) -> Option<(String, u64)> {
        self.lock()
            .outputs
            .get(identity)
            .map(|o| (o.path.clone(), o.version))
    }

    /// Number of committed outputs.
    pub fn output_count(&self) -> usize {
        self.lock().outputs.len()
    }
}

fn lock_inner(inner: &Mutex<MemoryInner>) -> MutexGuard<'_, MemoryInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl SourceStore for MemoryStore {
    fn get_object_read_only(&self, identity: &Identity) -> Result<Option<SourceAsset>, StoreError> {
        let mut inner = self.lock();
        inner.source_reads += 1;
        Ok(inner.sources.get(identity).cloned())
    }

    fn subscribe(&self) -> Option<Receiver<Identity>> {
        let (tx, rx) = channel();
        self.lock().subscribers.push(tx);
        Some(rx)
    }
}

impl OutputStore for MemoryStore {
    fn create_instance(
        &self,
        path: &str,
        identity: Identity,
    ) -> Result<Box<dyn OutputInstance>, StoreError> {
        Ok(Box::new(MemoryInstance {
            inner: Arc::clone(&self.inner),
            path: path.to_string(),
            identity,
            data: None,
        }))
    }

    fn locate(&self, identity: &Identity) -> Option<String> {
        self.lock().outputs.get(identity).map(|o| o.path.clone())
    }

    fn remove(&self, identity: &Identity) -> Result<bool, StoreError> {
        Ok(self.lock().outputs.remove(identity).is_some())
    }

    fn read(&self, identity: &Identity) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock().outputs.get(identity).map(|o| o.data.clone()))
    }
}

struct MemoryInstance {
    inner: Arc<Mutex<MemoryInner>>,
    path: String,
    identity: Identity,
    data: Option<Vec<u8>>,
}

impl OutputInstance for MemoryInstance {
    fn identity(&self) -> Identity {
        self.identity
    }

    fn set_object(&mut self, data: Vec<u8>) {
        self.data = Some(data);
    }

    fn commit(self: Box<Self>) -> Result<u64, StoreError> {
        let MemoryInstance {
            inner,
            path,
            identity,
            data,
        } = *self;
        let Some(data) = data else {
            return Err(StoreError::EmptyInstance { identity });
        };
        let mut inner = lock_inner(&inner);
        let version = inner
            .outputs
            .get(&identity)
            .map_or(1, |previous| previous.version + 1);
        inner.outputs.insert(identity, StoredOutput { path, version, data });
        inner.commits += 1;
        Ok(version)
    }

    fn revert(self: Box<Self>) {}
}
