//! The dependency graph of one build session.

use std::collections::HashMap;
use std::ops::Index;
use std::sync::{Arc, OnceLock};

use anvil_common::Identity;

use crate::asset::{SourceAsset, TransformKind};
use crate::dependency::{Dependency, DependencyFlags, DependencyId, Edge, EdgeKind, NodeFailure};
use crate::error::{BuildError, BuildFailure, ErrorKind};

/// Everything known about a node at the moment it is first discovered.
#[derive(Debug, Clone)]
pub struct NewDependency {
    /// The node's identity.
    pub identity: Identity,
    /// Its source asset, if it resolved.
    pub asset: Option<Arc<SourceAsset>>,
    /// The transform handling it, if one is registered.
    pub transform_kind: Option<TransformKind>,
    /// Logical output path.
    pub output_path: String,
    /// Flags of this discovery.
    pub flags: DependencyFlags,
    pub(crate) failure: Option<NodeFailure>,
}

impl NewDependency {
    /// A node with no asset or transform yet.
    pub fn new(identity: Identity, flags: DependencyFlags) -> Self {
        Self {
            identity,
            asset: None,
            transform_kind: None,
            output_path: String::new(),
            flags,
            failure: None,
        }
    }

    /// Attaches the resolved source asset.
    pub fn with_asset(mut self, asset: Arc<SourceAsset>) -> Self {
        self.asset = Some(asset);
        self
    }

    /// Attaches the transform and the output path it chose.
    pub fn with_transform(mut self, kind: TransformKind, output_path: impl Into<String>) -> Self {
        self.transform_kind = Some(kind);
        self.output_path = output_path.into();
        self
    }

    /// Marks the node failed from the start.
    pub fn failed(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.failure = Some(NodeFailure {
            kind,
            message: message.into(),
        });
        self
    }
}

/// Dependencies keyed by identity, iterated in discovery order.
///
/// Nodes are never removed. Re-inserting a known identity unions its flags
/// and records the extra incoming edge; it never replaces the node.
#[derive(Debug, Default)]
pub struct DependencySet {
    nodes: Vec<Dependency>,
    index: HashMap<Identity, DependencyId>,
    roots: Vec<DependencyId>,
    cycles: Vec<Vec<Identity>>,
}

impl DependencySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node, or merges into the existing node with the same identity.
    ///
    /// When `parent` names a node already in the set, an edge of kind `edge`
    /// is recorded from it. Returns the node's index and whether this call
    /// created it.
    pub fn insert(
        &mut self,
        node: NewDependency,
        parent: Option<Identity>,
        edge: EdgeKind,
    ) -> (DependencyId, bool) {
        let (id, is_new) = match self.index.get(&node.identity) {
            Some(&id) => {
                self.nodes[id.index()].flags |= node.flags;
                (id, false)
            }
            None => {
                let id = DependencyId::from_raw(self.nodes.len() as u32);
                let content_hash = node.asset.as_ref().map(|a| a.content_hash());
                self.nodes.push(Dependency {
                    identity: node.identity,
                    asset: node.asset,
                    content_hash,
                    transform_kind: node.transform_kind,
                    flags: node.flags,
                    output_path: node.output_path,
                    children: Vec::new(),
                    parents: Vec::new(),
                    fingerprint: OnceLock::new(),
                    failure: node.failure,
                });
                self.index.insert(node.identity, id);
                (id, true)
            }
        };
        if let Some(parent) = parent.and_then(|p| self.get_id(&p)) {
            self.add_edge(parent, id, edge);
        }
        (id, is_new)
    }

    /// Records an edge between two existing nodes and unions `flags` into the child.
    pub fn link(
        &mut self,
        parent: DependencyId,
        child: DependencyId,
        flags: DependencyFlags,
        edge: EdgeKind,
    ) {
        self.nodes[child.index()].flags |= flags;
        self.add_edge(parent, child, edge);
    }

    pub(crate) fn merge_flags(&mut self, id: DependencyId, flags: DependencyFlags) {
        self.nodes[id.index()].flags |= flags;
    }

    fn add_edge(&mut self, parent: DependencyId, child: DependencyId, edge: EdgeKind) {
        let node = &mut self.nodes[parent.index()];
        match node.has_child(child) {
            // A build edge subsumes a use edge to the same child.
            Some(pos) => {
                if edge == EdgeKind::Build {
                    node.children[pos].kind = EdgeKind::Build;
                }
            }
            None => {
                node.children.push(Edge { child, kind: edge });
                self.nodes[child.index()].parents.push(parent);
            }
        }
    }

    fn remove_edge(&mut self, parent: DependencyId, child: DependencyId) {
        self.nodes[parent.index()].children.retain(|e| e.child != child);
        self.nodes[child.index()].parents.retain(|p| *p != parent);
    }

    /// Marks `id` as a root of the walk.
    pub fn mark_root(&mut self, id: DependencyId) {
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    /// Roots in the order they were added.
    pub fn roots(&self) -> &[DependencyId] {
        &self.roots
    }

    /// Records a failure against `id`. The first failure wins.
    pub fn mark_failed(
        &mut self,
        id: DependencyId,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> bool {
        let node = &mut self.nodes[id.index()];
        if node.failure.is_some() {
            return false;
        }
        node.failure = Some(NodeFailure {
            kind,
            message: message.into(),
        });
        true
    }

    pub(crate) fn record_cycle(&mut self, cycle: Vec<Identity>) {
        let path: Vec<String> = cycle.iter().map(Identity::to_string).collect();
        tracing::warn!(cycle = %path.join(" -> "), "dependency cycle rejected");
        for identity in &cycle {
            if let Some(id) = self.get_id(identity) {
                self.mark_failed(
                    id,
                    ErrorKind::CyclicDependency,
                    "node lies on a dependency cycle",
                );
            }
        }
        self.cycles.push(cycle);
    }

    /// Cycles found during collection, in detection order.
    pub fn cycles(&self) -> &[Vec<Identity>] {
        &self.cycles
    }

    /// Fails with [`BuildError::CyclicDependency`] naming the first cycle found.
    pub fn check_acyclic(&self) -> Result<(), BuildError> {
        match self.cycles.first() {
            Some(cycle) => Err(BuildError::CyclicDependency {
                cycle: cycle.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Looks a node up by identity.
    pub fn get(&self, identity: &Identity) -> Option<&Dependency> {
        self.get_id(identity).map(|id| &self.nodes[id.index()])
    }

    /// Returns the index of `identity`.
    pub fn get_id(&self, identity: &Identity) -> Option<DependencyId> {
        self.index.get(identity).copied()
    }

    /// Looks a node up by index.
    pub fn node(&self, id: DependencyId) -> Option<&Dependency> {
        self.nodes.get(id.index())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the set has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (DependencyId, &Dependency)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (DependencyId::from_raw(i as u32), node))
    }

    /// Every edge as `(parent, child, kind)`, in insertion order.
    pub fn edges(&self) -> Vec<(Identity, Identity, EdgeKind)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.children
                    .iter()
                    .map(move |e| (node.identity, self.nodes[e.child.index()].identity, e.kind))
            })
            .collect()
    }

    /// [`edges`](Self::edges) sorted, for comparing sets built in different orders.
    pub fn canonical_edges(&self) -> Vec<(Identity, Identity, EdgeKind)> {
        let mut edges = self.edges();
        edges.sort();
        edges
    }

    /// Failures recorded during collection.
    pub fn failures(&self) -> Vec<BuildFailure> {
        self.nodes
            .iter()
            .filter_map(|node| {
                node.failure.as_ref().map(|f| BuildFailure {
                    identity: node.identity,
                    kind: f.kind,
                    message: f.message.clone(),
                })
            })
            .collect()
    }

    /// Nodes ordered so that every child precedes its parents.
    pub fn topological_order(&self) -> Vec<DependencyId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        for start in 0..self.nodes.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut stack = vec![(DependencyId::from_raw(start as u32), 0usize)];
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                match self.nodes[node.index()].children.get(top.1) {
                    Some(edge) => {
                        top.1 += 1;
                        let child = edge.child;
                        if !visited[child.index()] {
                            visited[child.index()] = true;
                            stack.push((child, 0));
                        }
                    }
                    None => {
                        order.push(node);
                        stack.pop();
                    }
                }
            }
        }
        order
    }

    /// Finds every cycle reachable from the roots, removes each closing edge,
    /// and marks the nodes on it failed. Returns the number of cycles found.
    ///
    /// The walk visits roots in order and children in declaration order, so
    /// it rejects the same edges a depth-first collection would have.
    pub(crate) fn strip_cycles(&mut self) -> usize {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnPath,
            Done,
        }

        let count = self.nodes.len();
        let mut marks = vec![Mark::Unvisited; count];
        let mut back_edges = Vec::new();
        let starts: Vec<DependencyId> = self
            .roots
            .iter()
            .copied()
            .chain((0..count).map(|i| DependencyId::from_raw(i as u32)))
            .collect();

        for start in starts {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }
            marks[start.index()] = Mark::OnPath;
            let mut stack = vec![(start, 0usize)];
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let Some(edge) = self.nodes[node.index()].children.get(top.1).copied() else {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    continue;
                };
                top.1 += 1;
                match marks[edge.child.index()] {
                    Mark::Unvisited => {
                        marks[edge.child.index()] = Mark::OnPath;
                        stack.push((edge.child, 0));
                    }
                    Mark::OnPath => {
                        let from = stack
                            .iter()
                            .position(|(id, _)| *id == edge.child)
                            .unwrap_or(0);
                        let cycle: Vec<Identity> = stack[from..]
                            .iter()
                            .map(|(id, _)| self.nodes[id.index()].identity)
                            .collect();
                        back_edges.push((node, edge.child, cycle));
                    }
                    Mark::Done => {}
                }
            }
        }

        let found = back_edges.len();
        for (parent, child, cycle) in back_edges {
            self.remove_edge(parent, child);
            self.record_cycle(cycle);
        }
        found
    }
}

impl Index<DependencyId> for DependencySet {
    type Output = Dependency;

    fn index(&self, id: DependencyId) -> &Dependency {
        &self.nodes[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::from_name(name)
    }

    fn node(name: &str, flags: DependencyFlags) -> NewDependency {
        NewDependency::new(id(name), flags)
    }

    #[test]
    fn first_discovery_wins_and_flags_merge() {
        let mut set = DependencySet::new();
        let asset = Arc::new(SourceAsset::new("mesh", b"first".to_vec()));
        let (a, new_a) = set.insert(
            node("a", DependencyFlags::USE).with_asset(asset),
            None,
            EdgeKind::Build,
        );
        let (again, new_again) = set.insert(
            node("a", DependencyFlags::BUILD)
                .with_asset(Arc::new(SourceAsset::new("mesh", b"second".to_vec()))),
            None,
            EdgeKind::Build,
        );
        assert!(new_a);
        assert!(!new_again);
        assert_eq!(a, again);
        assert_eq!(set.len(), 1);
        assert_eq!(set[a].flags(), DependencyFlags::USE | DependencyFlags::BUILD);
        assert_eq!(set[a].asset().unwrap().data, b"first");
    }

    #[test]
    fn edges_follow_insertion_order_and_dedupe() {
        let mut set = DependencySet::new();
        set.insert(node("scene", DependencyFlags::BUILD), None, EdgeKind::Build);
        set.insert(node("mesh", DependencyFlags::BUILD), Some(id("scene")), EdgeKind::Build);
        set.insert(node("light", DependencyFlags::USE), Some(id("scene")), EdgeKind::Use);
        set.insert(node("mesh", DependencyFlags::BUILD), Some(id("scene")), EdgeKind::Build);

        assert_eq!(
            set.edges(),
            vec![
                (id("scene"), id("mesh"), EdgeKind::Build),
                (id("scene"), id("light"), EdgeKind::Use),
            ]
        );
        let mesh = set.get(&id("mesh")).unwrap();
        assert_eq!(mesh.parents().len(), 1);
    }

    #[test]
    fn build_edge_upgrades_use_edge() {
        let mut set = DependencySet::new();
        set.insert(node("a", DependencyFlags::BUILD), None, EdgeKind::Build);
        set.insert(node("b", DependencyFlags::USE), Some(id("a")), EdgeKind::Use);
        set.insert(node("b", DependencyFlags::BUILD), Some(id("a")), EdgeKind::Build);
        assert_eq!(set.edges(), vec![(id("a"), id("b"), EdgeKind::Build)]);
    }

    #[test]
    fn unknown_identity_fails_lookup() {
        let set = DependencySet::new();
        assert!(set.get(&id("nope")).is_none());
        assert!(set.node(DependencyId::from_raw(3)).is_none());
    }

    #[test]
    fn first_failure_wins() {
        let mut set = DependencySet::new();
        let (a, _) = set.insert(node("a", DependencyFlags::BUILD), None, EdgeKind::Build);
        assert!(set.mark_failed(a, ErrorKind::NotFound, "missing"));
        assert!(!set.mark_failed(a, ErrorKind::BuildFailed, "later"));
        assert_eq!(set.failures()[0].kind, ErrorKind::NotFound);
    }

    #[test]
    fn topological_order_puts_children_first() {
        let mut set = DependencySet::new();
        set.insert(node("scene", DependencyFlags::BUILD), None, EdgeKind::Build);
        set.insert(node("mesh", DependencyFlags::BUILD), Some(id("scene")), EdgeKind::Build);
        set.insert(node("tex", DependencyFlags::BUILD), Some(id("mesh")), EdgeKind::Build);
        let order: Vec<Identity> = set
            .topological_order()
            .into_iter()
            .map(|i| set[i].identity())
            .collect();
        assert_eq!(order, vec![id("tex"), id("mesh"), id("scene")]);
    }

    #[test]
    fn strip_cycles_removes_closing_edge() {
        let mut set = DependencySet::new();
        let (a, _) = set.insert(node("a", DependencyFlags::BUILD), None, EdgeKind::Build);
        set.mark_root(a);
        set.insert(node("b", DependencyFlags::BUILD), Some(id("a")), EdgeKind::Build);
        set.insert(node("a", DependencyFlags::BUILD), Some(id("b")), EdgeKind::Build);
        set.insert(node("c", DependencyFlags::BUILD), Some(id("a")), EdgeKind::Build);

        assert_eq!(set.strip_cycles(), 1);
        assert_eq!(set.cycles(), &[vec![id("a"), id("b")]]);
        assert_eq!(
            set.edges(),
            vec![
                (id("a"), id("b"), EdgeKind::Build),
                (id("a"), id("c"), EdgeKind::Build),
            ]
        );
        assert!(set.get(&id("a")).unwrap().is_failed());
        assert!(set.get(&id("b")).unwrap().is_failed());
        assert!(!set.get(&id("c")).unwrap().is_failed());
        assert!(matches!(
            set.check_acyclic(),
            Err(BuildError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn acyclic_set_passes_check() {
        let mut set = DependencySet::new();
        set.insert(node("a", DependencyFlags::BUILD), None, EdgeKind::Build);
        set.insert(node("b", DependencyFlags::BUILD), Some(id("a")), EdgeKind::Build);
        assert_eq!(set.strip_cycles(), 0);
        assert!(set.check_acyclic().is_ok());
    }
}
