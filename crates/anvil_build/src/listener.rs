//! Observational progress hooks.

use crate::dependency::Dependency;
use crate::orchestrator::NodeOutcome;

/// Receives per-node progress from a build. Purely observational.
pub trait ProgressListener: Send + Sync {
    /// A worker started processing `dependency`, the `position`-th of `total`.
    fn begin_node(&self, worker: usize, position: usize, total: usize, dependency: &Dependency) {
        let _ = (worker, position, total, dependency);
    }

    /// A worker finished processing `dependency`.
    fn end_node(
        &self,
        worker: usize,
        position: usize,
        total: usize,
        dependency: &Dependency,
        outcome: &NodeOutcome,
    ) {
        let _ = (worker, position, total, dependency, outcome);
    }
}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl ProgressListener for LoggingListener {
    fn begin_node(&self, worker: usize, position: usize, total: usize, dependency: &Dependency) {
        tracing::debug!(
            worker,
            position,
            total,
            identity = %dependency.identity(),
            path = dependency.output_path(),
            "node started"
        );
    }

    fn end_node(
        &self,
        worker: usize,
        position: usize,
        total: usize,
        dependency: &Dependency,
        outcome: &NodeOutcome,
    ) {
        match outcome {
            NodeOutcome::Failed { kind, message } => tracing::warn!(
                worker,
                position,
                total,
                identity = %dependency.identity(),
                %kind,
                message = message.as_str(),
                "node failed"
            ),
            other => tracing::info!(
                worker,
                position,
                total,
                identity = %dependency.identity(),
                outcome = %other,
                "node finished"
            ),
        }
    }
}
