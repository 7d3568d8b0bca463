//! Persistent record of the fingerprint that last produced each output.
//!
//! The store is one artifact-framed file holding every `(identity,
//! fingerprint)` record. Updates made inside a transaction stay in memory
//! until [`BuildStateStore::end_transaction`] compacts the whole table into a
//! temp file and renames it over the old one, so a crash mid-session leaves
//! the pre-session state on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anvil_common::{Fingerprint, Identity};
use serde::{Deserialize, Serialize};

use crate::artifact::{self, io_error, STATE_MAGIC};
use crate::error::CacheError;

/// On-disk payload of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    records: Vec<StateRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    identity: Identity,
    fingerprint: Fingerprint,
}

#[derive(Default)]
struct StateInner {
    committed: HashMap<Identity, Fingerprint>,
    /// `None` values are removals.
    pending: Option<HashMap<Identity, Option<Fingerprint>>>,
}

/// Durable `identity → fingerprint` table used to classify outputs as up to date.
pub struct BuildStateStore {
    path: Option<PathBuf>,
    inner: Mutex<StateInner>,
}

impl BuildStateStore {
    /// Opens the store at `path`.
    ///
    /// A missing file yields an empty store. A corrupt or incompatible file
    /// is discarded with a warning: the next build simply rebuilds everything.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let committed = match std::fs::read(&path) {
            Ok(raw) => match decode_state(&raw, &path) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "discarding unreadable build state"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(io_error(&path, e)),
        };
        tracing::debug!(path = %path.display(), records = committed.len(), "opened build state");
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(StateInner {
                committed,
                pending: None,
            }),
        })
    }

    /// Creates a store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(StateInner::default()),
        }
    }

    /// Returns the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts a transaction. Fails if one is already open.
    pub fn begin_transaction(&self) -> Result<(), CacheError> {
        let mut inner = self.lock();
        if inner.pending.is_some() {
            return Err(CacheError::Transaction {
                reason: "a transaction is already open".to_string(),
            });
        }
        inner.pending = Some(HashMap::new());
        Ok(())
    }

    /// Returns `true` while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Applies the open transaction and persists the compacted table.
    ///
    /// Returns the number of records the transaction touched.
    pub fn end_transaction(&self) -> Result<usize, CacheError> {
        let mut inner = self.lock();
        let Some(pending) = inner.pending.take() else {
            return Err(CacheError::Transaction {
                reason: "no transaction is open".to_string(),
            });
        };
        let touched = pending.len();
        for (identity, fingerprint) in pending {
            match fingerprint {
                Some(fp) => inner.committed.insert(identity, fp),
                None => inner.committed.remove(&identity),
            };
        }
        self.persist(&inner.committed)?;
        tracing::debug!(touched, records = inner.committed.len(), "build state committed");
        Ok(touched)
    }

    /// Discards the open transaction, if any.
    pub fn abort_transaction(&self) {
        self.lock().pending = None;
    }

    /// Returns the fingerprint recorded for `identity`.
    pub fn get(&self, identity: &Identity) -> Option<Fingerprint> {
        let inner = self.lock();
        if let Some(pending) = &inner.pending {
            if let Some(entry) = pending.get(identity) {
                return *entry;
            }
        }
        inner.committed.get(identity).copied()
    }

    /// Records `fingerprint` for `identity`.
    ///
    /// Inside a transaction the record is staged; outside one it is applied
    /// and persisted immediately.
    pub fn put(&self, identity: Identity, fingerprint: Fingerprint) -> Result<(), CacheError> {
        self.stage(identity, Some(fingerprint))
    }

    /// Forgets `identity`. Staged like [`put`](Self::put).
    pub fn remove(&self, identity: Identity) -> Result<(), CacheError> {
        self.stage(identity, None)
    }

    fn stage(
        &self,
        identity: Identity,
        fingerprint: Option<Fingerprint>,
    ) -> Result<(), CacheError> {
        let mut inner = self.lock();
        if let Some(pending) = inner.pending.as_mut() {
            pending.insert(identity, fingerprint);
            return Ok(());
        }
        match fingerprint {
            Some(fp) => inner.committed.insert(identity, fp),
            None => inner.committed.remove(&identity),
        };
        self.persist(&inner.committed)
    }

    /// Returns the number of committed records.
    pub fn len(&self) -> usize {
        self.lock().committed.len()
    }

    /// Returns `true` if no record is committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all committed records sorted by identity.
    pub fn entries(&self) -> Vec<(Identity, Fingerprint)> {
        let mut entries: Vec<_> = self
            .lock()
            .committed
            .iter()
            .map(|(id, fp)| (*id, *fp))
            .collect();
        entries.sort();
        entries
    }

    fn persist(&self, committed: &HashMap<Identity, Fingerprint>) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut records: Vec<StateRecord> = committed
            .iter()
            .map(|(identity, fingerprint)| StateRecord {
                identity: *identity,
                fingerprint: *fingerprint,
            })
            .collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));

        let payload =
            bincode::serde::encode_to_vec(StateFile { records }, bincode::config::standard())
                .map_err(|e| CacheError::Serialization {
                    reason: e.to_string(),
                })?;
        let framed = artifact::encode(STATE_MAGIC, &payload)?;
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        artifact::write_atomic(path, Path::new(&temp), &framed)
    }
}

fn decode_state(raw: &[u8], path: &Path) -> Result<HashMap<Identity, Fingerprint>, CacheError> {
    let payload = artifact::decode(STATE_MAGIC, raw, path)?;
    let (file, _): (StateFile, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;
    Ok(file
        .records
        .into_iter()
        .map(|r| (r.identity, r.fingerprint))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_common::FingerprintBuilder;

    fn fp(tag: &str) -> Fingerprint {
        FingerprintBuilder::new(tag).finish()
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuildStateStore::open(dir.path().join("state.bin")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn committed_transaction_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let a = Identity::from_name("a");
        {
            let store = BuildStateStore::open(&path).unwrap();
            store.begin_transaction().unwrap();
            store.put(a, fp("1")).unwrap();
            assert_eq!(store.get(&a), Some(fp("1")));
            assert_eq!(store.end_transaction().unwrap(), 1);
        }
        let store = BuildStateStore::open(&path).unwrap();
        assert_eq!(store.get(&a), Some(fp("1")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unfinished_transaction_leaves_disk_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let a = Identity::from_name("a");
        let b = Identity::from_name("b");
        {
            let store = BuildStateStore::open(&path).unwrap();
            store.put(a, fp("old")).unwrap();
            store.begin_transaction().unwrap();
            store.put(a, fp("new")).unwrap();
            store.put(b, fp("b")).unwrap();
            // dropped without end_transaction, as after a crash
        }
        let store = BuildStateStore::open(&path).unwrap();
        assert_eq!(store.get(&a), Some(fp("old")));
        assert_eq!(store.get(&b), None);
    }

    #[test]
    fn abort_discards_staged_records() {
        let store = BuildStateStore::in_memory();
        let a = Identity::from_name("a");
        store.begin_transaction().unwrap();
        store.put(a, fp("1")).unwrap();
        store.abort_transaction();
        assert_eq!(store.get(&a), None);
        assert!(!store.in_transaction());
    }

    #[test]
    fn remove_inside_transaction() {
        let store = BuildStateStore::in_memory();
        let a = Identity::from_name("a");
        store.put(a, fp("1")).unwrap();
        store.begin_transaction().unwrap();
        store.remove(a).unwrap();
        assert_eq!(store.get(&a), None);
        store.end_transaction().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn nested_begin_is_rejected() {
        let store = BuildStateStore::in_memory();
        store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction(),
            Err(CacheError::Transaction { .. })
        ));
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let store = BuildStateStore::in_memory();
        assert!(store.end_transaction().is_err());
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        std::fs::write(&path, b"not a state file").unwrap();
        let store = BuildStateStore::open(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn entries_are_sorted() {
        let store = BuildStateStore::in_memory();
        for name in ["c", "a", "b"] {
            store.put(Identity::from_name(name), fp(name)).unwrap();
        }
        let entries = store.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
