//! The transform capability and its registry.

use std::collections::HashMap;
use std::sync::Arc;

use anvil_common::Identity;

use crate::asset::{BuildParams, Product, SourceAsset, TransformKind};
use crate::dependency::{DependencyFlags, EdgeKind};
use crate::error::TransformError;
use crate::instance_cache::InstanceCache;
use crate::orchestrator::BuildContext;

/// A dependency reported by [`Transform::collect_dependencies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredDependency {
    /// The child identity.
    pub identity: Identity,
    /// Flags the child is needed with.
    pub flags: DependencyFlags,
    /// Edge kind from the declaring asset.
    pub edge: EdgeKind,
}

impl DeclaredDependency {
    /// A child whose output this asset is built from.
    pub fn build(identity: Identity) -> Self {
        Self {
            identity,
            flags: DependencyFlags::BUILD,
            edge: EdgeKind::Build,
        }
    }

    /// A child this asset only refers to.
    pub fn uses(identity: Identity) -> Self {
        Self {
            identity,
            flags: DependencyFlags::USE,
            edge: EdgeKind::Use,
        }
    }

    /// Adds [`DependencyFlags::RESOURCE`].
    pub fn resource(mut self) -> Self {
        self.flags |= DependencyFlags::RESOURCE;
        self
    }
}

/// Read access available to a transform while it enumerates dependencies.
pub struct CollectContext<'a> {
    instances: &'a InstanceCache,
}

impl<'a> CollectContext<'a> {
    pub(crate) fn new(instances: &'a InstanceCache) -> Self {
        Self { instances }
    }

    /// Reads another source asset through the instance cache.
    pub fn get_object_read_only(
        &self,
        identity: &Identity,
    ) -> Result<Option<Arc<SourceAsset>>, TransformError> {
        self.instances
            .get_object_read_only(identity)
            .map_err(|e| TransformError::new(e.to_string()))
    }
}

/// A type-specific build step.
///
/// A transform is the only authority on what its asset type depends on and
/// how it is built. Its [`version`](Self::version) salts every fingerprint it
/// contributes to, so bumping it invalidates its cached products.
pub trait Transform: Send + Sync {
    /// The kind tag of this transform.
    fn kind(&self) -> TransformKind;

    /// Version mixed into fingerprints and cache keys.
    fn version(&self) -> u32;

    /// Whether the order of declared children is significant.
    fn ordered_children(&self) -> bool {
        true
    }

    /// Logical output path for `identity`.
    fn output_path(&self, identity: &Identity, _asset: &SourceAsset) -> String {
        format!("{}/{}", self.kind(), identity)
    }

    /// Reports what `asset` depends on.
    fn collect_dependencies(
        &self,
        cx: &CollectContext<'_>,
        identity: &Identity,
        asset: &SourceAsset,
    ) -> Result<Vec<DeclaredDependency>, TransformError>;

    /// Produces the output for `asset`.
    fn build_output(
        &self,
        cx: &BuildContext<'_>,
        identity: &Identity,
        asset: &SourceAsset,
        params: &BuildParams,
    ) -> Result<Product, TransformError>;
}

/// Maps declared asset types to transforms.
#[derive(Default)]
pub struct TransformRegistry {
    by_type: HashMap<String, Arc<dyn Transform>>,
    by_kind: HashMap<TransformKind, Arc<dyn Transform>>,
}

impl TransformRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transform` for assets of `asset_type`, replacing any previous one.
    pub fn register(&mut self, asset_type: impl Into<String>, transform: Arc<dyn Transform>) {
        self.by_kind.insert(transform.kind(), Arc::clone(&transform));
        self.by_type.insert(asset_type.into(), transform);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, asset_type: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        self.register(asset_type, transform);
        self
    }

    /// Returns the kind handling `asset_type`.
    pub fn find_transform_kind(&self, asset_type: &str) -> Option<TransformKind> {
        self.by_type.get(asset_type).map(|t| t.kind())
    }

    /// Returns the transform for `asset`.
    pub fn find_for_asset(&self, asset: &SourceAsset) -> Option<&Arc<dyn Transform>> {
        self.by_type.get(&asset.asset_type)
    }

    /// Returns the transform registered under `kind`.
    pub fn get(&self, kind: &TransformKind) -> Option<&Arc<dyn Transform>> {
        self.by_kind.get(kind)
    }

    /// Number of registered asset types.
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
