//! Dependency collection: populating a [`DependencySet`] from root identities.
//!
//! Both collectors resolve each identity through the [`InstanceCache`], look
//! its transform up in the registry, and ask the transform for its
//! dependencies. A node that fails to resolve or to enumerate is marked
//! failed and the walk continues with its siblings.

mod incremental;
mod parallel;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anvil_common::Identity;

use crate::dependency::DependencyFlags;
use crate::dependency_set::{DependencySet, NewDependency};
use crate::error::{BuildError, ErrorKind};
use crate::instance_cache::InstanceCache;
use crate::pool::WorkerPool;
use crate::transform::{CollectContext, DeclaredDependency, TransformRegistry};

pub use incremental::IncrementalCollector;
pub use parallel::ParallelCollector;

/// What a collector reads from.
#[derive(Clone)]
pub struct CollectorEnv {
    /// Source assets.
    pub instances: Arc<InstanceCache>,
    /// Transforms by asset type.
    pub registry: Arc<TransformRegistry>,
}

impl CollectorEnv {
    /// Creates a collector environment.
    pub fn new(instances: Arc<InstanceCache>, registry: Arc<TransformRegistry>) -> Self {
        Self {
            instances,
            registry,
        }
    }

    /// Resolves `identity` into a node ready for insertion.
    ///
    /// Resolution failures are carried on the node rather than returned.
    pub(crate) fn resolve(&self, identity: Identity, flags: DependencyFlags) -> NewDependency {
        let node = NewDependency::new(identity, flags);
        let asset = match self.instances.get_object_read_only(&identity) {
            Ok(Some(asset)) => asset,
            Ok(None) => {
                return node.failed(ErrorKind::NotFound, format!("asset {identity} not found"));
            }
            Err(e) => return node.failed(ErrorKind::NotFound, e.to_string()),
        };
        let Some(transform) = self.registry.find_for_asset(&asset) else {
            let message = format!("no transform registered for asset type '{}'", asset.asset_type);
            return node.with_asset(asset).failed(ErrorKind::TransformMissing, message);
        };
        let path = transform.output_path(&identity, &asset);
        node.with_transform(transform.kind(), path).with_asset(asset)
    }

    /// Asks the node's transform for its dependencies.
    pub(crate) fn discover(&self, node: &NewDependency) -> Result<Vec<DeclaredDependency>, String> {
        let (Some(asset), Some(kind)) = (&node.asset, &node.transform_kind) else {
            return Ok(Vec::new());
        };
        let Some(transform) = self.registry.get(kind) else {
            return Ok(Vec::new());
        };
        let cx = CollectContext::new(&self.instances);
        match panic::catch_unwind(AssertUnwindSafe(|| {
            transform.collect_dependencies(&cx, &node.identity, asset)
        })) {
            Ok(Ok(children)) => Ok(children),
            Ok(Err(e)) => Err(e.message),
            Err(_) => Err("dependency collection panicked".to_string()),
        }
    }
}

/// Whether `node` resolved well enough to have its dependencies enumerated.
pub(crate) fn expandable(node: &NewDependency) -> bool {
    node.failure.is_none() && node.transform_kind.is_some()
}

/// Collects `roots` depth-first on the calling thread.
pub fn collect_incremental(
    env: CollectorEnv,
    roots: &[Identity],
) -> Result<DependencySet, BuildError> {
    let mut collector = IncrementalCollector::new(env);
    for root in roots {
        collector.add_root(*root);
    }
    collector.finish()
}

/// Collects `roots` on the worker pool.
pub fn collect_parallel(
    env: CollectorEnv,
    pool: Arc<WorkerPool>,
    roots: &[Identity],
) -> Result<DependencySet, BuildError> {
    let collector = ParallelCollector::new(env, pool);
    for root in roots {
        collector.add_root(*root);
    }
    collector.finish()
}

#[cfg(test)]
pub(crate) mod testing {
    //! A tiny asset language for collector tests: an asset's data is a
    //! whitespace-separated list of `+name` (build) and `~name` (use) children.

    use super::*;
    use crate::asset::{BuildParams, Product, SourceAsset, TransformKind};
    use crate::error::TransformError;
    use crate::orchestrator::BuildContext;
    use crate::store::MemoryStore;
    use crate::transform::Transform;

    pub(crate) struct ListTransform;

    impl Transform for ListTransform {
        fn kind(&self) -> TransformKind {
            TransformKind::new("list")
        }

        fn version(&self) -> u32 {
            1
        }

        fn collect_dependencies(
            &self,
            _cx: &CollectContext<'_>,
            _identity: &Identity,
            asset: &SourceAsset,
        ) -> Result<Vec<DeclaredDependency>, TransformError> {
            let text = std::str::from_utf8(&asset.data)
                .map_err(|e| TransformError::new(e.to_string()))?;
            text.split_whitespace()
                .map(|token| match token.split_at(1) {
                    ("+", name) => Ok(DeclaredDependency::build(Identity::from_name(name))),
                    ("~", name) => Ok(DeclaredDependency::uses(Identity::from_name(name))),
                    _ => Err(TransformError::new(format!("bad token '{token}'"))),
                })
                .collect()
        }

        fn build_output(
            &self,
            _cx: &BuildContext<'_>,
            _identity: &Identity,
            asset: &SourceAsset,
            _params: &BuildParams,
        ) -> Result<Product, TransformError> {
            Ok(Product::new(asset.data.clone()))
        }
    }

    pub(crate) fn env_with(assets: &[(&str, &str)]) -> CollectorEnv {
        let store = MemoryStore::new();
        for (name, data) in assets {
            store.set_source(
                Identity::from_name(name),
                SourceAsset::new("list", data.as_bytes().to_vec()),
            );
        }
        let registry = TransformRegistry::new().with("list", Arc::new(ListTransform));
        CollectorEnv::new(Arc::new(InstanceCache::new(Arc::new(store))), Arc::new(registry))
    }

    pub(crate) fn id(name: &str) -> Identity {
        Identity::from_name(name)
    }
}
