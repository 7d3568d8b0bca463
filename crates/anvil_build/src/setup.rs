//! Session setup from an [`EngineConfig`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anvil_cache::{BuildStateStore, CacheAccess, CacheChain, LocalCache, RemoteCache};
use anvil_common::Identity;
use anvil_config::{CacheSection, CollectorMode, EngineConfig};

use crate::asset::BuildParams;
use crate::collector::{collect_incremental, collect_parallel, CollectorEnv};
use crate::dependency_set::DependencySet;
use crate::error::BuildError;
use crate::instance_cache::InstanceCache;
use crate::orchestrator::BuildEnvironment;
use crate::pool::WorkerPool;
use crate::store::{OutputStore, SourceStore};
use crate::transform::TransformRegistry;

/// Builds the cache chain in priority order: local tier, then remotes.
///
/// Relative local paths resolve against `project_dir`.
pub fn cache_chain_from_config(cache: &CacheSection, project_dir: &Path) -> CacheChain {
    let mut chain = CacheChain::new();
    if let Some(local) = cache.local.as_ref().filter(|l| l.enabled) {
        let path = project_dir.join(&local.path);
        tracing::debug!(
            path = %path.display(),
            read = local.read,
            write = local.write,
            "local cache tier"
        );
        chain.push(Arc::new(LocalCache::new(
            path,
            CacheAccess {
                read: local.read,
                write: local.write,
            },
        )));
    }
    for remote in &cache.remote {
        tracing::debug!(
            address = remote.address.as_str(),
            read = remote.read,
            write = remote.write,
            "remote cache tier"
        );
        chain.push(Arc::new(RemoteCache::new(
            remote.address.clone(),
            CacheAccess {
                read: remote.read,
                write: remote.write,
            },
            Duration::from_millis(remote.timeout_ms),
        )));
    }
    chain
}

/// Opens the build-state store named by `[state]`, relative to `project_dir`.
pub fn open_state_store(
    config: &EngineConfig,
    project_dir: &Path,
) -> Result<BuildStateStore, BuildError> {
    Ok(BuildStateStore::open(project_dir.join(&config.state.path))?)
}

/// Wires a complete [`BuildEnvironment`] from configuration and stores.
pub fn environment_from_config(
    config: &EngineConfig,
    project_dir: &Path,
    source: Arc<dyn SourceStore>,
    output: Arc<dyn OutputStore>,
    registry: Arc<TransformRegistry>,
) -> Result<BuildEnvironment, BuildError> {
    let pool = WorkerPool::new(config.build.effective_parallelism())?;
    Ok(BuildEnvironment {
        instances: Arc::new(InstanceCache::new(source)),
        registry,
        output,
        state: Arc::new(open_state_store(config, project_dir)?),
        cache: cache_chain_from_config(&config.cache, project_dir),
        pool: Arc::new(pool),
        params: BuildParams::from_config(&config.build),
    })
}

/// Collects `roots` with the collector the configuration selects.
pub fn collect(
    mode: CollectorMode,
    env: &BuildEnvironment,
    roots: &[Identity],
) -> Result<DependencySet, BuildError> {
    let collector_env = CollectorEnv::new(Arc::clone(&env.instances), Arc::clone(&env.registry));
    tracing::info!(roots = roots.len(), ?mode, "collecting dependencies");
    match mode {
        CollectorMode::Incremental => collect_incremental(collector_env, roots),
        CollectorMode::Parallel => collect_parallel(collector_env, Arc::clone(&env.pool), roots),
    }
}
