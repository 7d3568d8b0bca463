//! Bounded worker pool and completion barrier.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::BuildError;

/// A fixed-size pool of worker threads shared by collection and build.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// Starts a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self, BuildError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("anvil-worker-{i}"))
            .panic_handler(|_| tracing::error!("worker task panicked"))
            .build()
            .map_err(|e| BuildError::Pool {
                reason: e.to_string(),
            })?;
        Ok(Self { pool, threads })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Index of the calling worker, or `None` off the pool.
    pub fn current_worker(&self) -> Option<usize> {
        self.pool.current_thread_index()
    }

    /// Queues `task`, counted against `group` until it finishes.
    pub fn spawn_in(&self, group: &Arc<TaskGroup>, task: impl FnOnce() + Send + 'static) {
        let guard = group.enter();
        self.pool.spawn(move || {
            let _guard = guard;
            task();
        });
    }

    /// Runs `op` on the calling thread with a scope whose spawned tasks run
    /// on the pool and may borrow from the caller. Returns after every spawned
    /// task has finished.
    pub fn in_place_scope<'scope, R>(&self, op: impl FnOnce(&rayon::Scope<'scope>) -> R) -> R {
        self.pool.in_place_scope(op)
    }
}

/// Counts outstanding tasks so a caller can wait for all of them.
#[derive(Default)]
pub struct TaskGroup {
    pending: Mutex<usize>,
    drained: Condvar,
}

impl TaskGroup {
    /// Creates an empty group.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(self: &Arc<Self>) -> TaskGuard {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        TaskGuard {
            group: Arc::clone(self),
        }
    }

    fn leave(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending -= 1;
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Number of tasks queued or running.
    pub fn pending(&self) -> usize {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until no task is queued or running.
    ///
    /// Tasks spawned by running tasks are counted before their parent
    /// finishes, so the count only reaches zero once the work has drained.
    pub fn wait_until_finished(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        while *pending > 0 {
            pending = self
                .drained
                .wait(pending)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Decrements the group on drop, including when the task panics.
struct TaskGuard {
    group: Arc<TaskGroup>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.group.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_threads_means_one() {
        assert_eq!(WorkerPool::new(0).unwrap().threads(), 1);
    }

    #[test]
    fn wait_covers_tasks_spawned_by_tasks() {
        let pool = Arc::new(WorkerPool::new(3).unwrap());
        let group = TaskGroup::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let (p, g, d) = (pool.clone(), group.clone(), done.clone());
            pool.spawn_in(&group, move || {
                for _ in 0..5 {
                    let d = d.clone();
                    p.spawn_in(&g, move || {
                        d.fetch_add(1, Ordering::SeqCst);
                    });
                }
                d.fetch_add(1, Ordering::SeqCst);
            });
        }
        group.wait_until_finished();
        assert_eq!(done.load(Ordering::SeqCst), 24);
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn panicking_task_still_leaves_the_group() {
        let pool = WorkerPool::new(1).unwrap();
        let group = TaskGroup::new();
        pool.spawn_in(&group, || panic!("boom"));
        group.wait_until_finished();
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn scoped_tasks_borrow_and_report_worker_index() {
        let pool = WorkerPool::new(2).unwrap();
        let seen = Mutex::new(Vec::new());
        pool.in_place_scope(|scope| {
            for _ in 0..4 {
                let seen = &seen;
                let pool = &pool;
                scope.spawn(move |_| {
                    seen.lock().unwrap().push(pool.current_worker());
                });
            }
        });
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|w| matches!(w, Some(i) if *i < 2)));
        assert_eq!(pool.current_worker(), None);
    }
}
