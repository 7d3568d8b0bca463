//! Collector that discovers dependencies on the worker pool.

use std::sync::{Arc, Mutex, MutexGuard};

use anvil_common::Identity;

use crate::dependency::{DependencyFlags, DependencyId, EdgeKind};
use crate::dependency_set::{DependencySet, NewDependency};
use crate::error::{BuildError, ErrorKind};
use crate::pool::{TaskGroup, WorkerPool};

use super::{expandable, CollectorEnv};

struct Shared {
    env: CollectorEnv,
    set: Mutex<DependencySet>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DependencySet> {
        self.set.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs one "discover dependencies of X" task per new node on the pool.
///
/// Resolution and the transform callback run outside the set lock; the lock
/// is held only for each insertion. The resulting nodes and edges equal the
/// incremental collector's, but insertion order depends on scheduling.
/// Cycles are found in a deterministic pass after the work drains.
pub struct ParallelCollector {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    group: Arc<TaskGroup>,
}

impl ParallelCollector {
    /// Creates a collector with an empty set.
    pub fn new(env: CollectorEnv, pool: Arc<WorkerPool>) -> Self {
        Self {
            shared: Arc::new(Shared {
                env,
                set: Mutex::new(DependencySet::new()),
            }),
            pool,
            group: TaskGroup::new(),
        }
    }

    /// Adds a root with the build flag and queues its collection.
    pub fn add_root(&self, identity: Identity) -> DependencyId {
        let existing = self.shared.lock().get_id(&identity);
        if let Some(id) = existing {
            let mut set = self.shared.lock();
            set.merge_flags(id, DependencyFlags::BUILD);
            set.mark_root(id);
            return id;
        }
        tracing::debug!(%identity, "collecting root");
        let node = self.shared.env.resolve(identity, DependencyFlags::BUILD);
        let (id, is_new) = {
            let mut set = self.shared.lock();
            let (id, is_new) = set.insert(node.clone(), None, EdgeKind::Build);
            set.mark_root(id);
            (id, is_new)
        };
        if is_new {
            spawn_discovery(&self.shared, &self.pool, &self.group, id, node);
        }
        id
    }

    /// Blocks until every queued and running task has finished.
    pub fn wait_until_finished(&self) {
        self.group.wait_until_finished();
    }

    /// Waits for the walk, strips cycles, and returns the set.
    pub fn into_set(self) -> DependencySet {
        self.wait_until_finished();
        let mut set = std::mem::take(&mut *self.shared.lock());
        set.strip_cycles();
        tracing::debug!(nodes = set.len(), "collection finished");
        set
    }

    /// Like [`into_set`](Self::into_set), but fails if a cycle was found.
    pub fn finish(self) -> Result<DependencySet, BuildError> {
        let set = self.into_set();
        set.check_acyclic()?;
        Ok(set)
    }
}

fn spawn_discovery(
    shared: &Arc<Shared>,
    pool: &Arc<WorkerPool>,
    group: &Arc<TaskGroup>,
    id: DependencyId,
    node: NewDependency,
) {
    if !expandable(&node) {
        return;
    }
    let (task_shared, task_pool, task_group) =
        (Arc::clone(shared), Arc::clone(pool), Arc::clone(group));
    pool.spawn_in(group, move || {
        discover(&task_shared, &task_pool, &task_group, id, &node);
    });
}

fn discover(
    shared: &Arc<Shared>,
    pool: &Arc<WorkerPool>,
    group: &Arc<TaskGroup>,
    id: DependencyId,
    node: &NewDependency,
) {
    let children = match shared.env.discover(node) {
        Ok(children) => children,
        Err(message) => {
            tracing::warn!(
                identity = %node.identity,
                message = message.as_str(),
                "dependency collection failed"
            );
            shared.lock().mark_failed(id, ErrorKind::CollectionFailed, message);
            return;
        }
    };

    for declared in children {
        let existing = shared.lock().get_id(&declared.identity);
        if let Some(child) = existing {
            shared.lock().link(id, child, declared.flags, declared.edge);
            continue;
        }
        let child_node = shared.env.resolve(declared.identity, declared.flags);
        // Another task may have inserted the same identity meanwhile; insert
        // merges in that case and only the creator expands the node.
        let (child, is_new) = shared
            .lock()
            .insert(child_node.clone(), Some(node.identity), declared.edge);
        if is_new {
            spawn_discovery(shared, pool, group, child, child_node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{env_with, id};
    use super::super::IncrementalCollector;
    use super::*;

    fn wide_graph() -> Vec<(String, String)> {
        let root = (0..16).map(|i| format!("+m{i} ")).collect::<String>();
        let mut assets = vec![("root".to_string(), root)];
        for i in 0..16 {
            assets.push((format!("m{i}"), format!("+mat{} ~shared", i % 3)));
        }
        for i in 0..3 {
            assets.push((format!("mat{i}"), "+tex".to_string()));
        }
        assets.push(("tex".to_string(), String::new()));
        assets.push(("shared".to_string(), String::new()));
        assets
    }

    fn env_from(assets: &[(String, String)]) -> CollectorEnv {
        let borrowed: Vec<(&str, &str)> = assets
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        env_with(&borrowed)
    }

    #[test]
    fn matches_incremental_content() {
        let assets = wide_graph();
        let mut incremental = IncrementalCollector::new(env_from(&assets));
        incremental.add_root(id("root"));
        let expected = incremental.finish().unwrap();

        let pool = Arc::new(WorkerPool::new(4).unwrap());
        for _ in 0..5 {
            let collector = ParallelCollector::new(env_from(&assets), pool.clone());
            collector.add_root(id("root"));
            let set = collector.finish().unwrap();
            assert_eq!(set.len(), expected.len());
            assert_eq!(set.canonical_edges(), expected.canonical_edges());
            for (_, node) in expected.iter() {
                assert_eq!(set.get(&node.identity()).unwrap().flags(), node.flags());
            }
        }
    }

    #[test]
    fn failures_do_not_stop_the_walk() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let collector = ParallelCollector::new(
            env_with(&[("a", "+missing +bad +ok"), ("bad", "!"), ("ok", "+leaf"), ("leaf", "")]),
            pool,
        );
        collector.add_root(id("a"));
        let set = collector.finish().unwrap();
        assert_eq!(set.len(), 5);
        let kinds: Vec<_> = set.failures().into_iter().map(|f| (f.identity, f.kind)).collect();
        assert!(kinds.contains(&(id("missing"), ErrorKind::NotFound)));
        assert!(kinds.contains(&(id("bad"), ErrorKind::CollectionFailed)));
        assert!(set.get(&id("leaf")).is_some());
    }

    #[test]
    fn cycle_matches_incremental() {
        let assets = [("a", "+b +c"), ("b", "+c"), ("c", "+a")];
        let mut incremental = IncrementalCollector::new(env_with(&assets));
        incremental.add_root(id("a"));
        let expected = incremental.into_set();

        let pool = Arc::new(WorkerPool::new(3).unwrap());
        let collector = ParallelCollector::new(env_with(&assets), pool);
        collector.add_root(id("a"));
        let set = collector.into_set();
        assert_eq!(set.cycles(), expected.cycles());
        assert_eq!(set.canonical_edges(), expected.canonical_edges());
        assert_eq!(set.cycles()[0], vec![id("a"), id("b"), id("c")]);
    }

    #[test]
    fn cycle_fails_finish() {
        let collector = ParallelCollector::new(
            env_with(&[("a", "+b"), ("b", "+a")]),
            Arc::new(WorkerPool::new(2).unwrap()),
        );
        collector.add_root(id("a"));
        assert!(matches!(
            collector.finish(),
            Err(BuildError::CyclicDependency { .. })
        ));
    }
}
