//! Executes dependency sets and ad-hoc builds.
//!
//! Graph builds run on the worker pool in dependency order: a node is
//! dispatched only once every child has reached a terminal outcome. For each
//! node the orchestrator tries, in order, the build-state fast path, the
//! content cache, the session product table, and finally the transform.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anvil_cache::{BuildStateStore, CacheChain, CacheKey};
use anvil_common::{Fingerprint, Identity};

use crate::asset::{BuildParams, Product, ProductRef, SourceAsset};
use crate::dependency::{DependencyFlags, DependencyId};
use crate::dependency_set::DependencySet;
use crate::error::{BuildError, BuildFailure, ErrorKind, FailureSink, TransformError};
use crate::fingerprint;
use crate::instance_cache::InstanceCache;
use crate::listener::ProgressListener;
use crate::pool::WorkerPool;
use crate::products::{BuiltProductTable, Claim};
use crate::store::{OutputInstance, OutputStore};
use crate::transform::{Transform, TransformRegistry};

/// The collaborators a session works against.
pub struct BuildEnvironment {
    /// Source assets, read-only.
    pub instances: Arc<InstanceCache>,
    /// Transforms by asset type.
    pub registry: Arc<TransformRegistry>,
    /// Where products are committed.
    pub output: Arc<dyn OutputStore>,
    /// Last fingerprint per built identity.
    pub state: Arc<BuildStateStore>,
    /// Content cache tiers. Empty disables caching.
    pub cache: CacheChain,
    /// Workers for node execution.
    pub pool: Arc<WorkerPool>,
    /// Parameters passed to transforms and mixed into fingerprints.
    pub params: BuildParams,
}

/// Session-wide cancellation flag, checked between node dispatches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. In-flight nodes finish; nothing new is dispatched.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Where a built product came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSource {
    /// The transform ran.
    Transform,
    /// A content cache tier had it.
    ContentCache,
    /// Content-identical source was already built this session.
    Session,
}

/// Terminal state of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Output already up to date; nothing ran and nothing was written.
    Cached,
    /// Output written.
    Built(BuildSource),
    /// Referenced only; fingerprinted but not built.
    Referenced,
    /// The node failed.
    Failed {
        /// Failure classification.
        kind: ErrorKind,
        /// Diagnostic message.
        message: String,
    },
}

impl NodeOutcome {
    fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` for [`NodeOutcome::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => f.write_str("cached"),
            Self::Built(BuildSource::Transform) => f.write_str("built"),
            Self::Built(BuildSource::ContentCache) => f.write_str("built (cache hit)"),
            Self::Built(BuildSource::Session) => f.write_str("built (deduplicated)"),
            Self::Referenced => f.write_str("referenced"),
            Self::Failed { kind, message } => write!(f, "failed [{kind}]: {message}"),
        }
    }
}

/// Result of [`Orchestrator::build`].
#[derive(Debug)]
pub struct BuildReport {
    /// Every node's outcome, in set order.
    pub outcomes: Vec<(Identity, NodeOutcome)>,
    /// Failed nodes plus ad-hoc failures raised during the build.
    pub failures: Vec<BuildFailure>,
    /// Transform invocations during this build.
    pub invocations: usize,
    /// Whether the session was cancelled.
    pub cancelled: bool,
    /// Set when the build-state transaction could not be committed.
    pub state_error: Option<String>,
    /// Wall time of the build.
    pub elapsed: Duration,
}

impl BuildReport {
    /// Returns `true` if no node failed, the build was not cancelled, and
    /// build state was committed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled && self.state_error.is_none()
    }

    /// Outcome of `identity`.
    pub fn outcome(&self, identity: &Identity) -> Option<&NodeOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, outcome)| outcome)
    }

    /// Number of nodes whose outcome matches `predicate`.
    pub fn count(&self, predicate: impl Fn(&NodeOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }
}

struct Schedule {
    ready: VecDeque<DependencyId>,
    waiting_on: Vec<usize>,
    outcomes: Vec<Option<NodeOutcome>>,
    in_flight: usize,
    finished: usize,
    dispatched: usize,
}

impl Schedule {
    fn failed_child(&self, set: &DependencySet, id: DependencyId) -> Option<(Identity, ErrorKind)> {
        set[id].children().iter().find_map(|edge| {
            match &self.outcomes[edge.child.as_raw() as usize] {
                Some(NodeOutcome::Failed { kind, .. }) => Some((set[edge.child].identity(), *kind)),
                _ => None,
            }
        })
    }
}

/// Scheduler state for one graph build.
struct GraphRun {
    schedule: Mutex<Schedule>,
    progress: Condvar,
}

impl GraphRun {
    fn new(set: &DependencySet) -> Self {
        let waiting_on: Vec<usize> = set.iter().map(|(_, node)| node.children().len()).collect();
        let ready = set
            .iter()
            .filter(|(id, _)| waiting_on[id.as_raw() as usize] == 0)
            .map(|(id, _)| id)
            .collect();
        Self {
            schedule: Mutex::new(Schedule {
                ready,
                outcomes: vec![None; set.len()],
                waiting_on,
                in_flight: 0,
                finished: 0,
                dispatched: 0,
            }),
            progress: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'g>(&self, guard: MutexGuard<'g, Schedule>) -> MutexGuard<'g, Schedule> {
        self.progress.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    fn complete(&self, set: &DependencySet, id: DependencyId, outcome: NodeOutcome) {
        let mut schedule = self.lock();
        schedule.outcomes[id.as_raw() as usize] = Some(outcome);
        schedule.finished += 1;
        schedule.in_flight -= 1;
        for &parent in set[id].parents() {
            let waiting = &mut schedule.waiting_on[parent.as_raw() as usize];
            *waiting -= 1;
            if *waiting == 0 {
                schedule.ready.push_back(parent);
            }
        }
        self.progress.notify_all();
    }
}

/// Runs builds over one environment.
///
/// Each [`build`](Orchestrator::build) call is a session. The de-duplication
/// table is emptied when a build starts: within it, nodes or ad-hoc requests
/// with content-identical source assets share a single transform invocation.
/// Calls to `build` on one orchestrator must not overlap.
pub struct Orchestrator {
    env: BuildEnvironment,
    listener: Option<Arc<dyn ProgressListener>>,
    cancel: CancellationToken,
    products: BuiltProductTable,
    by_identity: Mutex<HashMap<Identity, ProductRef>>,
    adhoc_failures: FailureSink,
    invocations: AtomicUsize,
}

impl Orchestrator {
    /// Creates an orchestrator over `env`.
    pub fn new(env: BuildEnvironment) -> Self {
        Self {
            env,
            listener: None,
            cancel: CancellationToken::new(),
            products: BuiltProductTable::default(),
            by_identity: Mutex::new(HashMap::new()),
            adhoc_failures: FailureSink::new(),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Attaches a progress listener.
    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Uses `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The session's cancellation token.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The session's collaborators.
    pub fn environment(&self) -> &BuildEnvironment {
        &self.env
    }

    /// Transform invocations so far this session.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Number of distinct contents built this session.
    pub fn session_products(&self) -> usize {
        self.products.len()
    }

    /// Takes the failures of ad-hoc requests made outside [`build`](Self::build).
    pub fn take_failures(&self) -> Vec<BuildFailure> {
        self.adhoc_failures.take_all()
    }

    /// Builds every node of `set` in dependency order.
    ///
    /// With `force_rebuild`, the build-state fast path is skipped for every
    /// node; the content cache and session de-duplication still apply.
    /// Products from earlier builds are never reused through the session
    /// table, since a node's own bytes say nothing about its children.
    pub fn build(&self, set: &DependencySet, force_rebuild: bool) -> BuildReport {
        let started = Instant::now();
        let total = set.len();
        let invocations_before = self.invocations();
        self.products.clear();
        self.by_identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::info!(
            nodes = total,
            force_rebuild,
            workers = self.env.pool.threads(),
            "build started"
        );

        let owns_transaction = match self.env.state.begin_transaction() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "build state already in a transaction, joining it");
                false
            }
        };

        let run = GraphRun::new(set);
        self.env.pool.in_place_scope(|scope| {
            let mut schedule = run.lock();
            loop {
                if schedule.finished == total {
                    break;
                }
                if self.cancel.is_cancelled() {
                    if schedule.in_flight == 0 {
                        break;
                    }
                } else if let Some(id) = schedule.ready.pop_front() {
                    let failed_child = schedule.failed_child(set, id);
                    schedule.in_flight += 1;
                    schedule.dispatched += 1;
                    let position = schedule.dispatched;
                    let run = &run;
                    scope.spawn(move |_| {
                        let outcome = self.run_node(
                            set,
                            id,
                            failed_child,
                            position,
                            total,
                            force_rebuild,
                        );
                        run.complete(set, id, outcome);
                    });
                    continue;
                } else if schedule.in_flight == 0 {
                    // Everything left waits on a node that can never finish.
                    break;
                }
                schedule = run.wait(schedule);
            }
        });

        let cancelled = self.cancel.is_cancelled();
        let schedule = run.lock();
        let mut outcomes = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (id, node) in set.iter() {
            let outcome = match &schedule.outcomes[id.as_raw() as usize] {
                Some(outcome) => outcome.clone(),
                None if cancelled => {
                    NodeOutcome::failed(ErrorKind::Cancelled, "build cancelled before dispatch")
                }
                None => {
                    NodeOutcome::failed(ErrorKind::CyclicDependency, "waits on a dependency cycle")
                }
            };
            if let NodeOutcome::Failed { kind, message } = &outcome {
                failures.push(BuildFailure {
                    identity: node.identity(),
                    kind: *kind,
                    message: message.clone(),
                });
            }
            outcomes.push((node.identity(), outcome));
        }
        drop(schedule);
        failures.extend(self.adhoc_failures.take_all());

        let state_error = if owns_transaction {
            match self.env.state.end_transaction() {
                Ok(records) => {
                    tracing::debug!(records, "build state committed");
                    None
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to commit build state");
                    Some(e.to_string())
                }
            }
        } else {
            None
        };

        let report = BuildReport {
            outcomes,
            failures,
            invocations: self.invocations() - invocations_before,
            cancelled,
            state_error,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            nodes = total,
            cached = report.count(|o| *o == NodeOutcome::Cached),
            built = report.count(|o| matches!(o, NodeOutcome::Built(_))),
            failed = report.count(NodeOutcome::is_failed),
            invocations = report.invocations,
            cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "build finished"
        );
        report
    }

    fn run_node(
        &self,
        set: &DependencySet,
        id: DependencyId,
        failed_child: Option<(Identity, ErrorKind)>,
        position: usize,
        total: usize,
        force_rebuild: bool,
    ) -> NodeOutcome {
        let node = &set[id];
        let worker = self.env.pool.current_worker().unwrap_or(0);
        if let Some(listener) = &self.listener {
            listener.begin_node(worker, position, total, node);
        }
        let outcome = self.decide(set, id, failed_child, force_rebuild);
        if let NodeOutcome::Failed { kind, message } = &outcome {
            tracing::debug!(
                identity = %node.identity(),
                %kind,
                message = message.as_str(),
                "node failed"
            );
        }
        if let Some(listener) = &self.listener {
            listener.end_node(worker, position, total, node, &outcome);
        }
        outcome
    }

    fn decide(
        &self,
        set: &DependencySet,
        id: DependencyId,
        failed_child: Option<(Identity, ErrorKind)>,
        force_rebuild: bool,
    ) -> NodeOutcome {
        let node = &set[id];
        let identity = node.identity();
        if let Some((kind, message)) = node.failure() {
            return NodeOutcome::failed(kind, message);
        }
        if let Some((child, kind)) = failed_child {
            return NodeOutcome::failed(kind, format!("dependency {child} failed"));
        }

        let computed = fingerprint::compute(set, id, &self.env.registry, &self.env.params);
        let fingerprint = match computed {
            Ok(fp) => fp,
            Err(e) => return NodeOutcome::failed(e.kind(), e.to_string()),
        };
        if !node.flags().contains(DependencyFlags::BUILD) {
            return NodeOutcome::Referenced;
        }
        let Some(asset) = node.asset() else {
            return NodeOutcome::failed(ErrorKind::NotFound, format!("asset {identity} not found"));
        };
        let transform = node
            .transform_kind()
            .and_then(|kind| self.env.registry.get(kind));
        let Some(transform) = transform else {
            return NodeOutcome::failed(
                ErrorKind::TransformMissing,
                format!("no transform registered for asset type '{}'", asset.asset_type),
            );
        };

        if !force_rebuild
            && self.env.state.get(&identity) == Some(fingerprint)
            && self.env.output.contains(&identity)
        {
            tracing::debug!(%identity, %fingerprint, "cached");
            return NodeOutcome::Cached;
        }

        let key = CacheKey::new(identity, fingerprint, transform.version());
        let content_key =
            fingerprint::content_fingerprint(asset, transform.as_ref(), &self.env.params);
        if let Some(bytes) = self.env.cache.fetch(&key) {
            let product = Arc::new(Product::new(bytes));
            if let Err(e) = self.write_output(node.output_path(), identity, &product) {
                return NodeOutcome::failed(ErrorKind::StoreWriteFailed, e.to_string());
            }
            tracing::debug!(%identity, %fingerprint, "cache hit");
            self.products.record(content_key, asset, &product);
            self.record_success(identity, fingerprint, product);
            return NodeOutcome::Built(BuildSource::ContentCache);
        }

        let produced = self.produce(identity, asset, transform, &self.env.params, content_key);
        let (product, source) = match produced {
            Ok(produced) => produced,
            Err(message) => return NodeOutcome::failed(ErrorKind::BuildFailed, message),
        };
        if let Err(e) = self.write_output(node.output_path(), identity, &product) {
            return NodeOutcome::failed(ErrorKind::StoreWriteFailed, e.to_string());
        }
        self.env.cache.store(&key, product.bytes());
        tracing::debug!(%identity, %fingerprint, bytes = product.len(), "built");
        self.record_success(identity, fingerprint, product);
        NodeOutcome::Built(source)
    }

    fn record_success(&self, identity: Identity, fingerprint: Fingerprint, product: ProductRef) {
        if let Err(e) = self.env.state.put(identity, fingerprint) {
            tracing::warn!(%identity, error = %e, "failed to record build state");
        }
        self.by_identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity, product);
    }

    /// Returns the session product for `asset`, building it if no worker has.
    fn produce(
        &self,
        identity: Identity,
        asset: &Arc<SourceAsset>,
        transform: &Arc<dyn Transform>,
        params: &BuildParams,
        content_key: Fingerprint,
    ) -> Result<(ProductRef, BuildSource), String> {
        match self.products.claim(content_key, asset) {
            Claim::Ready(product) => {
                tracing::debug!(%identity, "deduplicated");
                Ok((product, BuildSource::Session))
            }
            Claim::Owner(guard) => {
                let product = Arc::new(self.invoke(identity, asset, transform, params)?);
                guard.fulfil(Arc::clone(&product));
                Ok((product, BuildSource::Transform))
            }
        }
    }

    fn invoke(
        &self,
        identity: Identity,
        asset: &SourceAsset,
        transform: &Arc<dyn Transform>,
        params: &BuildParams,
    ) -> Result<Product, String> {
        let cx = BuildContext {
            orchestrator: self,
            identity,
        };
        self.invocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%identity, transform = %transform.kind(), "invoking transform");
        match panic::catch_unwind(AssertUnwindSafe(|| {
            transform.build_output(&cx, &identity, asset, params)
        })) {
            Ok(Ok(product)) => Ok(product),
            Ok(Err(e)) => Err(e.message),
            Err(payload) => Err(format!(
                "transform panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }

    fn write_output(
        &self,
        path: &str,
        identity: Identity,
        product: &Product,
    ) -> Result<u64, BuildError> {
        let mut instance = self.create_output_instance(path, identity)?;
        instance.set_object(product.bytes().to_vec());
        Ok(instance.commit()?)
    }

    fn report(&self, identity: Identity, kind: ErrorKind, message: String) {
        tracing::warn!(%identity, %kind, message = message.as_str(), "ad-hoc build failed");
        self.adhoc_failures.emit(BuildFailure {
            identity,
            kind,
            message,
        });
    }

    /// Builds `asset` outside any dependency set and returns the product
    /// without writing it. Always recomputes unless the same content was
    /// already built this session.
    pub fn build_product(
        &self,
        identity: Identity,
        asset: &Arc<SourceAsset>,
        params: &BuildParams,
    ) -> Option<ProductRef> {
        let Some(transform) = self.env.registry.find_for_asset(asset) else {
            self.report(
                identity,
                ErrorKind::TransformMissing,
                format!("no transform registered for asset type '{}'", asset.asset_type),
            );
            return None;
        };
        let content_key = fingerprint::content_fingerprint(asset, transform.as_ref(), params);
        match self.produce(identity, asset, transform, params, content_key) {
            Ok((product, _)) => Some(product),
            Err(message) => {
                self.report(identity, ErrorKind::BuildFailed, message);
                None
            }
        }
    }

    /// Builds `asset` outside any dependency set and commits the product
    /// under `output_identity`. Build state is not consulted or updated.
    pub fn build_ad_hoc_output(
        &self,
        asset: &Arc<SourceAsset>,
        output_identity: Identity,
        params: &BuildParams,
    ) -> bool {
        let Some(product) = self.build_product(output_identity, asset, params) else {
            return false;
        };
        let path = self
            .env
            .registry
            .find_for_asset(asset)
            .map(|t| t.output_path(&output_identity, asset))
            .unwrap_or_else(|| output_identity.to_string());
        match self.write_output(&path, output_identity, &product) {
            Ok(version) => {
                tracing::debug!(
                    identity = %output_identity,
                    path = path.as_str(),
                    version,
                    "ad-hoc output written"
                );
                self.by_identity
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(output_identity, product);
                true
            }
            Err(e) => {
                self.report(output_identity, ErrorKind::StoreWriteFailed, e.to_string());
                false
            }
        }
    }

    /// Returns the product already built this session for `asset`'s content
    /// under `params`. Products are keyed by the parameters they were built
    /// with, so pass the same `params` given to [`build_product`](Self::build_product).
    pub fn get_build_product(
        &self,
        asset: &SourceAsset,
        params: &BuildParams,
    ) -> Option<ProductRef> {
        let transform = self.env.registry.find_for_asset(asset)?;
        let content_key = fingerprint::content_fingerprint(asset, transform.as_ref(), params);
        self.products.lookup(content_key, asset)
    }

    /// Opens an output slot for `identity` at `path`.
    ///
    /// An existing instance of the same identity at another path is removed
    /// first: identity is the durable key, the path is cosmetic.
    pub fn create_output_instance(
        &self,
        path: &str,
        identity: Identity,
    ) -> Result<Box<dyn OutputInstance>, BuildError> {
        if let Some(existing) = self.env.output.locate(&identity) {
            if existing != path {
                self.env.output.remove(&identity)?;
                tracing::debug!(%identity, from = existing.as_str(), to = path, "output relocated");
            }
        }
        Ok(self.env.output.create_instance(path, identity)?)
    }

    /// Product of `identity` from this session, or read back from the
    /// output store when it was up to date.
    pub fn dependency_product(&self, identity: &Identity) -> Option<ProductRef> {
        if let Some(product) = self
            .by_identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
        {
            return Some(Arc::clone(product));
        }
        let bytes = match self.env.output.read(identity) {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::warn!(%identity, error = %e, "failed to read dependency output");
                return None;
            }
        };
        let product = Arc::new(Product::new(bytes));
        self.by_identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*identity, Arc::clone(&product));
        Some(product)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// What a transform can reach while building.
pub struct BuildContext<'a> {
    orchestrator: &'a Orchestrator,
    identity: Identity,
}

impl BuildContext<'_> {
    /// The identity being built.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// The session's build parameters.
    pub fn params(&self) -> &BuildParams {
        &self.orchestrator.env.params
    }

    /// Reads a source asset through the instance cache.
    pub fn get_object_read_only(
        &self,
        identity: &Identity,
    ) -> Result<Option<Arc<SourceAsset>>, TransformError> {
        self.orchestrator
            .env
            .instances
            .get_object_read_only(identity)
            .map_err(|e| TransformError::new(e.to_string()))
    }

    /// Product of a dependency that finished earlier.
    pub fn dependency_product(&self, identity: &Identity) -> Option<ProductRef> {
        self.orchestrator.dependency_product(identity)
    }

    /// Builds a sub-asset in memory with the session parameters.
    pub fn build_product(
        &self,
        identity: Identity,
        asset: &Arc<SourceAsset>,
    ) -> Option<ProductRef> {
        self.orchestrator
            .build_product(identity, asset, &self.orchestrator.env.params)
    }

    /// Builds a sub-asset and commits it under `output_identity`.
    pub fn build_ad_hoc_output(&self, asset: &Arc<SourceAsset>, output_identity: Identity) -> bool {
        self.orchestrator
            .build_ad_hoc_output(asset, output_identity, &self.orchestrator.env.params)
    }

    /// Looks up a product already built this session with the session
    /// parameters.
    pub fn get_build_product(&self, asset: &SourceAsset) -> Option<ProductRef> {
        self.orchestrator
            .get_build_product(asset, &self.orchestrator.env.params)
    }

    /// Opens an output slot.
    pub fn create_output_instance(
        &self,
        path: &str,
        identity: Identity,
    ) -> Result<Box<dyn OutputInstance>, BuildError> {
        self.orchestrator.create_output_instance(path, identity)
    }
}
