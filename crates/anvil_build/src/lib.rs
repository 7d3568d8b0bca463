//! Incremental, content-addressed asset build engine.
//!
//! Starting from root asset identities, a collector asks each asset's
//! [`Transform`] what it depends on and records the answers in a
//! [`DependencySet`]. The [`Orchestrator`] then builds the set bottom-up:
//! every node gets a [`Fingerprint`](anvil_common::Fingerprint) over its
//! source content and its dependencies, and is skipped when the build-state
//! store shows the same fingerprint already produced its output, copied from
//! the content cache when a product for that fingerprint exists, shared when
//! the same source content was already built this session, and otherwise
//! built by invoking the transform.

#![warn(missing_docs)]

pub mod asset;
pub mod collector;
pub mod dependency;
pub mod dependency_set;
pub mod error;
pub mod fingerprint;
pub mod instance_cache;
pub mod listener;
pub mod orchestrator;
pub mod pool;
mod products;
pub mod setup;
pub mod store;
pub mod transform;

pub use asset::{BuildParams, Product, ProductRef, SourceAsset, TransformKind};
pub use collector::{
    collect_incremental, collect_parallel, CollectorEnv, IncrementalCollector, ParallelCollector,
};
pub use dependency::{Dependency, DependencyFlags, DependencyId, Edge, EdgeKind};
pub use dependency_set::{DependencySet, NewDependency};
pub use error::{BuildError, BuildFailure, ErrorKind, FailureSink, TransformError};
pub use instance_cache::InstanceCache;
pub use listener::{LoggingListener, ProgressListener};
pub use orchestrator::{
    BuildContext, BuildEnvironment, BuildReport, BuildSource, CancellationToken, NodeOutcome,
    Orchestrator,
};
pub use pool::{TaskGroup, WorkerPool};
pub use store::{MemoryStore, OutputInstance, OutputStore, SourceStore, StoreError};
pub use transform::{CollectContext, DeclaredDependency, Transform, TransformRegistry};
