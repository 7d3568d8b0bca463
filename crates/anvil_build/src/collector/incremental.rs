//! Single-threaded depth-first collector.

use anvil_common::Identity;

use crate::dependency::{DependencyFlags, DependencyId, EdgeKind};
use crate::dependency_set::{DependencySet, NewDependency};
use crate::error::{BuildError, ErrorKind};

use super::{expandable, CollectorEnv};

/// Walks the graph depth-first in declaration order. Deterministic.
///
/// An edge that would close a cycle is not inserted; the nodes on the cycle
/// are marked failed and the walk continues.
pub struct IncrementalCollector {
    env: CollectorEnv,
    set: DependencySet,
    path: Vec<Identity>,
}

impl IncrementalCollector {
    /// Creates a collector with an empty set.
    pub fn new(env: CollectorEnv) -> Self {
        Self {
            env,
            set: DependencySet::new(),
            path: Vec::new(),
        }
    }

    /// Adds a root with the build flag and collects everything below it.
    pub fn add_root(&mut self, identity: Identity) -> DependencyId {
        if let Some(id) = self.set.get_id(&identity) {
            self.set.merge_flags(id, DependencyFlags::BUILD);
            self.set.mark_root(id);
            return id;
        }
        tracing::debug!(%identity, "collecting root");
        let node = self.env.resolve(identity, DependencyFlags::BUILD);
        let (id, _) = self.set.insert(node.clone(), None, EdgeKind::Build);
        self.set.mark_root(id);
        self.visit(id, &node);
        id
    }

    fn visit(&mut self, id: DependencyId, node: &NewDependency) {
        if !expandable(node) {
            return;
        }
        let children = match self.env.discover(node) {
            Ok(children) => children,
            Err(message) => {
                tracing::warn!(
                    identity = %node.identity,
                    message = message.as_str(),
                    "dependency collection failed"
                );
                self.set.mark_failed(id, ErrorKind::CollectionFailed, message);
                return;
            }
        };

        self.path.push(node.identity);
        for declared in children {
            if let Some(pos) = self.path.iter().position(|p| *p == declared.identity) {
                let cycle = self.path[pos..].to_vec();
                if let Some(child) = self.set.get_id(&declared.identity) {
                    self.set.merge_flags(child, declared.flags);
                }
                self.set.record_cycle(cycle);
                continue;
            }
            if let Some(child) = self.set.get_id(&declared.identity) {
                self.set.link(id, child, declared.flags, declared.edge);
                continue;
            }
            let child_node = self.env.resolve(declared.identity, declared.flags);
            let (child, _) = self
                .set
                .insert(child_node.clone(), Some(node.identity), declared.edge);
            self.visit(child, &child_node);
        }
        self.path.pop();
    }

    /// The set collected so far.
    pub fn set(&self) -> &DependencySet {
        &self.set
    }

    /// Returns the set, ignoring any cycles found. Cycle nodes stay marked failed.
    pub fn into_set(self) -> DependencySet {
        self.set
    }

    /// Returns the set, or [`BuildError::CyclicDependency`] if a cycle was found.
    pub fn finish(self) -> Result<DependencySet, BuildError> {
        self.set.check_acyclic()?;
        tracing::debug!(nodes = self.set.len(), "collection finished");
        Ok(self.set)
    }
}
