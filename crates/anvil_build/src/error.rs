//! Error types and per-node failure reporting for the build engine.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anvil_cache::CacheError;
use anvil_common::Identity;

use crate::store::StoreError;

/// Classification of why a node failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The identity could not be resolved in the source store.
    NotFound,
    /// The node lies on a dependency cycle.
    CyclicDependency,
    /// No transform is registered for the asset's type.
    TransformMissing,
    /// The transform failed to enumerate dependencies.
    CollectionFailed,
    /// The transform failed to produce output.
    BuildFailed,
    /// A cache tier failed. Logged and treated as a miss.
    CacheUnavailable,
    /// The output store rejected the product.
    StoreWriteFailed,
    /// The session was cancelled before the node was dispatched.
    Cancelled,
}

impl ErrorKind {
    /// Returns a short, stable name for the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::CyclicDependency => "cyclic_dependency",
            Self::TransformMissing => "transform_missing",
            Self::CollectionFailed => "collection_failed",
            Self::BuildFailed => "build_failed",
            Self::CacheUnavailable => "cache_unavailable",
            Self::StoreWriteFailed => "store_write_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the build engine's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// An identity could not be resolved in the source store.
    #[error("asset {identity} not found")]
    NotFound {
        /// The unresolvable identity.
        identity: Identity,
    },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency: {}", format_cycle(cycle))]
    CyclicDependency {
        /// The identities on the cycle, starting at the re-entered node.
        cycle: Vec<Identity>,
    },

    /// No transform is registered for an asset type.
    #[error("no transform registered for asset type '{asset_type}'")]
    TransformMissing {
        /// The unhandled asset type.
        asset_type: String,
    },

    /// A fingerprint was requested before those of its dependencies.
    #[error("fingerprint of {identity} needs dependency {dependency} first")]
    FingerprintUnavailable {
        /// The node whose fingerprint was requested.
        identity: Identity,
        /// The dependency without a fingerprint.
        dependency: Identity,
    },

    /// The worker pool could not be created.
    #[error("failed to start worker pool: {reason}")]
    Pool {
        /// Why the pool failed to start.
        reason: String,
    },

    /// An output store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A cache or build-state operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl BuildError {
    /// Returns the node-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Self::TransformMissing { .. } => ErrorKind::TransformMissing,
            Self::FingerprintUnavailable { .. } | Self::Pool { .. } => ErrorKind::BuildFailed,
            Self::Store(_) => ErrorKind::StoreWriteFailed,
            Self::Cache(_) => ErrorKind::CacheUnavailable,
        }
    }
}

fn format_cycle(cycle: &[Identity]) -> String {
    let mut out = String::new();
    for identity in cycle {
        out.push_str(&identity.to_string());
        out.push_str(" -> ");
    }
    match cycle.first() {
        Some(first) => out.push_str(&first.to_string()),
        None => out.push_str("(empty)"),
    }
    out
}

/// An error reported by a transform callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransformError {
    /// Description of the failure.
    pub message: String,
}

impl TransformError {
    /// Creates a transform error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for TransformError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for TransformError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// One failed node: `(identity, kind, message)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    /// The failed identity.
    pub identity: Identity,
    /// Why it failed.
    pub kind: ErrorKind,
    /// Human-readable diagnostic.
    pub message: String,
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.identity, self.kind, self.message)
    }
}

/// A thread-safe accumulator for failures reported by concurrent workers.
///
/// The count is tracked atomically so `has_failures` never takes the lock.
pub struct FailureSink {
    failures: Mutex<Vec<BuildFailure>>,
    count: AtomicUsize,
}

impl FailureSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Records a failure.
    pub fn emit(&self, failure: BuildFailure) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(failure);
    }

    /// Returns `true` if any failure was recorded.
    pub fn has_failures(&self) -> bool {
        self.count() > 0
    }

    /// Returns the number of failures recorded so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Takes every recorded failure, leaving the sink empty.
    pub fn take_all(&self) -> Vec<BuildFailure> {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        self.count.store(0, Ordering::Relaxed);
        std::mem::take(&mut *failures)
    }

    /// Returns a snapshot of the recorded failures.
    pub fn failures(&self) -> Vec<BuildFailure> {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for FailureSink {
    fn default() -> Self {
        Self::new()
    }
}
