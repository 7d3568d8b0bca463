//! Nodes of the dependency graph.

use std::sync::{Arc, OnceLock};

use anvil_common::{ContentHash, Fingerprint, Identity};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::asset::{SourceAsset, TransformKind};
use crate::error::ErrorKind;

/// Opaque, copyable index of a node within its [`DependencySet`](crate::DependencySet).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct DependencyId(u32);

impl DependencyId {
    /// Creates an ID from a raw `u32` index.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw `u32` index.
    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// What a node is needed for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DependencyFlags: u32 {
        /// The node must produce output.
        const BUILD = 1 << 0;
        /// The node is referenced but not itself built.
        const USE = 1 << 1;
        /// The node contributes to resource bundling metadata.
        const RESOURCE = 1 << 2;
    }
}

/// How a parent relates to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    /// The parent's output is built from the child's output.
    Build,
    /// The parent only refers to the child.
    Use,
}

/// An outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// The child node.
    pub child: DependencyId,
    /// The edge kind.
    pub kind: EdgeKind,
}

/// A node recorded by collection as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeFailure {
    pub(crate) kind: ErrorKind,
    pub(crate) message: String,
}

/// One dependency: an identity, its source asset, and its outgoing edges.
#[derive(Debug)]
pub struct Dependency {
    pub(crate) identity: Identity,
    pub(crate) asset: Option<Arc<SourceAsset>>,
    pub(crate) content_hash: Option<ContentHash>,
    pub(crate) transform_kind: Option<TransformKind>,
    pub(crate) flags: DependencyFlags,
    pub(crate) output_path: String,
    pub(crate) children: Vec<Edge>,
    pub(crate) parents: Vec<DependencyId>,
    pub(crate) fingerprint: OnceLock<Fingerprint>,
    pub(crate) failure: Option<NodeFailure>,
}

impl Dependency {
    /// The node's identity.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// The source asset, or `None` for unresolved and synthetic nodes.
    pub fn asset(&self) -> Option<&Arc<SourceAsset>> {
        self.asset.as_ref()
    }

    /// Content hash of the source asset.
    pub fn content_hash(&self) -> Option<ContentHash> {
        self.content_hash
    }

    /// The transform handling this node.
    pub fn transform_kind(&self) -> Option<&TransformKind> {
        self.transform_kind.as_ref()
    }

    /// Union of the flags of every discovery of this node.
    pub fn flags(&self) -> DependencyFlags {
        self.flags
    }

    /// Logical path of the produced output.
    pub fn output_path(&self) -> &str {
        &self.output_path
    }

    /// Outgoing edges in declaration order.
    pub fn children(&self) -> &[Edge] {
        &self.children
    }

    /// Nodes with an edge to this one.
    pub fn parents(&self) -> &[DependencyId] {
        &self.parents
    }

    /// The memoized fingerprint, once computed.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint.get().copied()
    }

    /// Why collection failed for this node, if it did.
    pub fn failure(&self) -> Option<(ErrorKind, &str)> {
        self.failure
            .as_ref()
            .map(|f| (f.kind, f.message.as_str()))
    }

    /// Returns `true` if collection marked this node failed.
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub(crate) fn has_child(&self, child: DependencyId) -> Option<usize> {
        self.children.iter().position(|e| e.child == child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_union() {
        let mut flags = DependencyFlags::USE;
        flags |= DependencyFlags::BUILD;
        assert!(flags.contains(DependencyFlags::BUILD | DependencyFlags::USE));
        assert!(!flags.contains(DependencyFlags::RESOURCE));
    }

    #[test]
    fn id_round_trip() {
        let id = DependencyId::from_raw(7);
        assert_eq!(id.as_raw(), 7);
        assert_eq!(id.index(), 7);
    }

    #[test]
    fn flags_serialize() {
        let flags = DependencyFlags::BUILD | DependencyFlags::RESOURCE;
        let json = serde_json::to_string(&flags).unwrap();
        let back: DependencyFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }
}
