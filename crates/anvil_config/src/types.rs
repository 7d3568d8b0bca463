//! Configuration types deserialized from `anvil.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The top-level engine configuration parsed from `anvil.toml`.
///
/// Every section is optional; an empty file yields a single-tier local
/// cache, a build-state file under `.anvil/`, and one worker per core.
#[derive(Debug, Default, Deserialize)]
pub struct EngineConfig {
    /// Build session settings.
    #[serde(default)]
    pub build: BuildSection,
    /// Location of the persistent build-state store.
    #[serde(default)]
    pub state: StateSection,
    /// Content cache tiers.
    #[serde(default)]
    pub cache: CacheSection,
}

/// Which dependency collector a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorMode {
    /// Single-threaded depth-first walk with deterministic order.
    Incremental,
    /// Work-queue walk on the worker pool.
    #[default]
    Parallel,
}

/// Build session settings.
#[derive(Debug, Deserialize)]
pub struct BuildSection {
    /// Number of worker threads. `0` means one per available core.
    #[serde(default)]
    pub parallelism: usize,
    /// Skip the up-to-date check for every node.
    #[serde(default)]
    pub force_rebuild: bool,
    /// Dependency collector variant.
    #[serde(default)]
    pub collector: CollectorMode,
    /// Build configuration name (e.g. `"debug"`, `"release"`).
    #[serde(default = "default_configuration")]
    pub configuration: String,
    /// Free-form build options; all of them salt every fingerprint.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            parallelism: 0,
            force_rebuild: false,
            collector: CollectorMode::default(),
            configuration: default_configuration(),
            options: BTreeMap::new(),
        }
    }
}

impl BuildSection {
    /// Resolves `parallelism = 0` to the number of available cores.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

fn default_configuration() -> String {
    "default".to_string()
}

/// Location of the persistent build-state store.
#[derive(Debug, Deserialize)]
pub struct StateSection {
    /// Path of the state file, relative to the project directory.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".anvil/state.bin")
}

/// Content cache tiers, consulted local first, then remotes in order.
#[derive(Debug, Deserialize)]
pub struct CacheSection {
    /// The local filesystem cache. Set `enabled = false` to disable it.
    #[serde(default = "default_local")]
    pub local: Option<LocalCacheConfig>,
    /// Network caches in priority order.
    #[serde(default)]
    pub remote: Vec<RemoteCacheConfig>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            local: default_local(),
            remote: Vec::new(),
        }
    }
}

fn default_local() -> Option<LocalCacheConfig> {
    Some(LocalCacheConfig::default())
}

/// Settings for the local filesystem cache.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalCacheConfig {
    /// Whether the tier is used at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cache root directory, relative to the project directory.
    #[serde(default = "default_local_path")]
    pub path: PathBuf,
    /// Allow reading entries.
    #[serde(default = "default_true")]
    pub read: bool,
    /// Allow writing entries.
    #[serde(default = "default_true")]
    pub write: bool,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_local_path(),
            read: true,
            write: true,
        }
    }
}

fn default_local_path() -> PathBuf {
    PathBuf::from(".anvil/cache")
}

/// Settings for one network cache.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCacheConfig {
    /// `host:port` of the cache server.
    pub address: String,
    /// Allow reading entries.
    #[serde(default = "default_true")]
    pub read: bool,
    /// Allow writing entries. Typically only build servers write.
    #[serde(default)]
    pub write: bool,
    /// Connect and I/O timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5_000
}
