//! Fingerprint computation over the dependency graph.
//!
//! A node's fingerprint mixes, in order: its asset's content hash, its
//! transform kind and version, the build parameters, and one entry per
//! outgoing edge. A build edge contributes the child's fingerprint; a use edge
//! contributes only the child's identity. Edge entries are sorted first when
//! the transform declares child order insignificant.

use anvil_common::{Fingerprint, FingerprintBuilder};

use crate::asset::{BuildParams, SourceAsset};
use crate::dependency::{DependencyId, EdgeKind};
use crate::dependency_set::DependencySet;
use crate::error::BuildError;
use crate::transform::{Transform, TransformRegistry};

const NODE_DOMAIN: &str = "anvil.node.v1";
const CONTENT_DOMAIN: &str = "anvil.content.v1";

/// Returns the fingerprint of `id`, computing and memoizing it on first use.
///
/// Every child must already have a fingerprint.
pub fn compute(
    set: &DependencySet,
    id: DependencyId,
    registry: &TransformRegistry,
    params: &BuildParams,
) -> Result<Fingerprint, BuildError> {
    let node = &set[id];
    if let Some(fp) = node.fingerprint() {
        return Ok(fp);
    }

    let mut builder = FingerprintBuilder::new(NODE_DOMAIN);
    match node.content_hash() {
        Some(hash) => builder.push_hash(hash.as_bytes()),
        None => builder.push_hash(node.identity().as_bytes()),
    };
    let transform = node.transform_kind().and_then(|kind| registry.get(kind));
    match transform {
        Some(t) => {
            builder.push_str(t.kind().as_str()).push_u64(u64::from(t.version()));
        }
        None => {
            builder.push_str("");
        }
    }
    params.salt(&mut builder);

    let mut entries = Vec::with_capacity(node.children().len());
    for edge in node.children() {
        let child = &set[edge.child];
        let entry = match edge.kind {
            EdgeKind::Build => {
                let fp = child.fingerprint().ok_or(BuildError::FingerprintUnavailable {
                    identity: node.identity(),
                    dependency: child.identity(),
                })?;
                (0u8, *fp.as_bytes())
            }
            EdgeKind::Use => (1u8, *child.identity().as_bytes()),
        };
        entries.push(entry);
    }
    if !transform.is_some_and(|t| t.ordered_children()) {
        entries.sort_unstable();
    }
    builder.push_u64(entries.len() as u64);
    for (tag, bytes) in &entries {
        builder.push_u64(u64::from(*tag)).push_hash(bytes);
    }

    let fp = builder.finish();
    // A racing computation produced the same value; keep whichever landed.
    Ok(*node.fingerprint.get_or_init(|| fp))
}

/// Computes every fingerprint in the set, children first.
///
/// Nodes that collection marked failed, and their ancestors, are skipped.
/// Returns the number of fingerprints now known.
pub fn compute_all(
    set: &DependencySet,
    registry: &TransformRegistry,
    params: &BuildParams,
) -> usize {
    let mut known = 0;
    for id in set.topological_order() {
        if set[id].is_failed() {
            continue;
        }
        if compute(set, id, registry, params).is_ok() {
            known += 1;
        }
    }
    known
}

/// Fingerprint of an asset's own content under a transform and parameters,
/// ignoring any dependencies. Keys session de-duplication and ad-hoc builds.
pub fn content_fingerprint(
    asset: &SourceAsset,
    transform: &dyn Transform,
    params: &BuildParams,
) -> Fingerprint {
    let mut builder = FingerprintBuilder::new(CONTENT_DOMAIN);
    builder
        .push_hash(asset.content_hash().as_bytes())
        .push_str(transform.kind().as_str())
        .push_u64(u64::from(transform.version()));
    params.salt(&mut builder);
    builder.finish()
}
