//! Content-addressed local filesystem cache.
//!
//! Entries live at `<root>/<xx>/<rest-of-digest>.entry`, where the digest is
//! the hash of identity, fingerprint and transform version. Every entry is an
//! artifact-framed payload; writes go to `<root>/tmp/` first and are renamed
//! into place on commit.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::artifact::{self, io_error, ENTRY_MAGIC};
use crate::content::{BufferedWriter, CacheAccess, CacheKey, CacheWriter, ContentCache};
use crate::error::CacheError;

/// File extension of committed entries.
const ENTRY_EXT: &str = "entry";

/// Subdirectory for uncommitted writes.
const TEMP_SUBDIR: &str = "tmp";

/// Temp files younger than this may belong to a writer still in flight.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Local filesystem tier of the content cache.
pub struct LocalCache {
    root: PathBuf,
    access: CacheAccess,
    temp_counter: AtomicU64,
}

impl LocalCache {
    /// Creates a cache rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>, access: CacheAccess) -> Self {
        Self {
            root: root.into(),
            access,
            temp_counter: AtomicU64::new(0),
        }
    }

    /// Returns the cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the entry file for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let digest = key.digest().to_string();
        self.root
            .join(&digest[..2])
            .join(format!("{}.{ENTRY_EXT}", &digest[2..]))
    }

    fn temp_path(&self, key: &CacheKey) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(TEMP_SUBDIR).join(format!(
            "{}.{}.{n}.tmp",
            key.digest(),
            std::process::id()
        ))
    }

    /// Returns `true` if a committed entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Removes every entry whose key is not in `live`, plus stale temp files.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self, live: &[CacheKey]) -> Result<usize, CacheError> {
        let live: HashSet<PathBuf> = live.iter().map(|k| self.entry_path(k)).collect();
        self.remove_entries(|path| !live.contains(path))
    }

    /// Removes every entry and stale temp file. Returns the number of files
    /// removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        self.remove_entries(|_| true)
    }

    /// Counts committed entries.
    pub fn entry_count(&self) -> Result<usize, CacheError> {
        let mut count = 0;
        self.for_each_entry(|_| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    fn remove_entries(
        &self,
        mut doomed: impl FnMut(&Path) -> bool,
    ) -> Result<usize, CacheError> {
        let mut removed = 0;
        self.for_each_entry(|path| {
            if doomed(path) {
                std::fs::remove_file(path).map_err(|e| io_error(path, e))?;
                removed += 1;
            }
            Ok(())
        })?;

        Ok(removed + self.remove_stale_temps(STALE_TEMP_AGE)?)
    }

    /// Removes temp files last modified at least `max_age` ago. Younger ones
    /// are left to the writer that will commit or drop them.
    fn remove_stale_temps(&self, max_age: Duration) -> Result<usize, CacheError> {
        let temp_dir = self.root.join(TEMP_SUBDIR);
        if !temp_dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&temp_dir).map_err(|e| io_error(&temp_dir, e))? {
            let entry = entry.map_err(|e| io_error(&temp_dir, e))?;
            let stale = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= max_age);
            if !stale {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                // Committed or dropped by its writer meanwhile.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        tracing::debug!(dir = %temp_dir.display(), removed, "stale temp files removed");
        Ok(removed)
    }

    fn for_each_entry(
        &self,
        mut visit: impl FnMut(&Path) -> Result<(), CacheError>,
    ) -> Result<(), CacheError> {
        if !self.root.is_dir() {
            return Ok(());
        }
        for shard in std::fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))? {
            let shard = shard.map_err(|e| io_error(&self.root, e))?.path();
            let is_temp_dir = shard.file_name().and_then(|n| n.to_str()) == Some(TEMP_SUBDIR);
            if !shard.is_dir() || is_temp_dir {
                continue;
            }
            for entry in std::fs::read_dir(&shard).map_err(|e| io_error(&shard, e))? {
                let path = entry.map_err(|e| io_error(&shard, e))?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
                    visit(&path)?;
                }
            }
        }
        Ok(())
    }
}

impl ContentCache for LocalCache {
    fn name(&self) -> &str {
        "local"
    }

    fn access(&self) -> CacheAccess {
        self.access
    }

    fn get(&self, key: &CacheKey) -> Result<Option<Box<dyn Read + Send>>, CacheError> {
        if !self.access.read {
            return Ok(None);
        }
        let path = self.entry_path(key);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let payload = artifact::decode(ENTRY_MAGIC, &raw, &path)?;
        Ok(Some(Box::new(Cursor::new(payload.to_vec()))))
    }

    fn put(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>, CacheError> {
        if !self.access.write {
            return Err(CacheError::Unavailable {
                cache: self.name().to_string(),
                reason: "write access disabled".to_string(),
            });
        }
        let path = self.entry_path(key);
        let temp = self.temp_path(key);
        Ok(Box::new(BufferedWriter::new(move |bytes: Vec<u8>| {
            let framed = artifact::encode(ENTRY_MAGIC, &bytes)?;
            if let Some(parent) = temp.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
            artifact::write_atomic(&path, &temp, &framed)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{read_entry, write_entry};
    use anvil_common::{FingerprintBuilder, Identity};
    use std::io::Write;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(
            Identity::from_name(name),
            FingerprintBuilder::new(name).finish(),
            1,
        )
    }

    fn make_cache(access: CacheAccess) -> (tempfile::TempDir, LocalCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path().join("cache"), access);
        (dir, cache)
    }

    #[test]
    fn miss_on_empty_cache() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        assert!(cache.get(&key("a")).unwrap().is_none());
    }

    #[test]
    fn committed_entry_is_readable() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        write_entry(&cache, &key("a"), b"product bytes").unwrap();
        assert!(cache.contains(&key("a")));
        assert_eq!(
            read_entry(&cache, &key("a")).unwrap().as_deref(),
            Some(&b"product bytes"[..])
        );
    }

    #[test]
    fn uncommitted_entry_is_invisible() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        let mut writer = cache.put(&key("a")).unwrap();
        writer.write_all(b"partial").unwrap();
        assert!(cache.get(&key("a")).unwrap().is_none());
        drop(writer);
        assert!(cache.get(&key("a")).unwrap().is_none());
    }

    #[test]
    fn entry_path_is_sharded() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        let path = cache.entry_path(&key("a"));
        let digest = key("a").digest().to_string();
        assert!(path.ends_with(format!("{}/{}.entry", &digest[..2], &digest[2..])));
    }

    #[test]
    fn corrupt_entry_is_an_error() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        let path = cache.entry_path(&key("a"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        assert!(cache.get(&key("a")).is_err());
    }

    #[test]
    fn read_disabled_always_misses() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LocalCache::new(dir.path(), CacheAccess::WRITE_ONLY);
        write_entry(&writer, &key("a"), b"data").unwrap();
        assert!(writer.get(&key("a")).unwrap().is_none());

        let reader = LocalCache::new(dir.path(), CacheAccess::READ_ONLY);
        assert!(reader.get(&key("a")).unwrap().is_some());
    }

    #[test]
    fn write_disabled_is_unavailable() {
        let (_dir, cache) = make_cache(CacheAccess::READ_ONLY);
        let err = cache.put(&key("a")).err().unwrap();
        assert!(matches!(err, CacheError::Unavailable { .. }));
    }

    #[test]
    fn gc_keeps_live_entries() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        write_entry(&cache, &key("a"), b"A").unwrap();
        write_entry(&cache, &key("b"), b"B").unwrap();
        assert_eq!(cache.entry_count().unwrap(), 2);

        let removed = cache.gc(&[key("a")]).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
    }

    #[test]
    fn clear_removes_everything() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        write_entry(&cache, &key("a"), b"A").unwrap();
        write_entry(&cache, &key("b"), b"B").unwrap();
        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    fn temp_file(cache: &LocalCache, name: &str, age: Duration) -> PathBuf {
        let dir = cache.root().join(TEMP_SUBDIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        file.set_modified(std::time::SystemTime::now() - age).unwrap();
        path
    }

    #[test]
    fn maintenance_spares_temp_files_of_writers_in_flight() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        write_entry(&cache, &key("a"), b"A").unwrap();
        let fresh = temp_file(&cache, "fresh.tmp", Duration::ZERO);
        let abandoned = temp_file(&cache, "abandoned.tmp", STALE_TEMP_AGE * 2);

        assert_eq!(cache.gc(&[key("a")]).unwrap(), 1);
        assert!(fresh.exists());
        assert!(!abandoned.exists());
        assert!(cache.contains(&key("a")));

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(fresh.exists());
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    #[test]
    fn gc_on_missing_root_is_noop() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        assert_eq!(cache.gc(&[]).unwrap(), 0);
    }

    #[test]
    fn large_payload() {
        let (_dir, cache) = make_cache(CacheAccess::READ_WRITE);
        let data: Vec<u8> = (0..100_000).map(|i| (i % 251) as u8).collect();
        write_entry(&cache, &key("big"), &data).unwrap();
        assert_eq!(read_entry(&cache, &key("big")).unwrap().unwrap(), data);
    }
}
