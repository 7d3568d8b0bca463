#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anvil_build::{
    collect_incremental, BuildContext, BuildEnvironment, BuildParams, BuildReport, CollectContext,
    CollectorEnv, DeclaredDependency, DependencySet, InstanceCache, MemoryStore, Orchestrator,
    Product, SourceAsset, Transform, TransformError, TransformKind, TransformRegistry, WorkerPool,
};
use anvil_cache::{BuildStateStore, CacheAccess, CacheChain, LocalCache, RemoteCache};
use anvil_common::Identity;

pub fn id(name: &str) -> Identity {
    Identity::from_name(name)
}

/// Counts and orders transform invocations across every transform.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Identity>>,
    count: AtomicUsize,
}

impl Recorder {
    pub fn record(&self, identity: Identity) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(identity);
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Identity> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.calls.lock().unwrap().clear();
    }
}

/// Asset data is `<payload> [+child | ~child]...`.
///
/// The product is `<kind>:<payload>` followed by `[<child product>]` for every
/// build child. Payload `fail` makes the build fail; `panic` makes it panic.
pub struct NodeTransform {
    pub kind: &'static str,
    pub version: u32,
    pub recorder: Arc<Recorder>,
}

fn tokens(asset: &SourceAsset) -> Vec<String> {
    String::from_utf8_lossy(&asset.data)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

impl Transform for NodeTransform {
    fn kind(&self) -> TransformKind {
        TransformKind::new(self.kind)
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn collect_dependencies(
        &self,
        _cx: &CollectContext<'_>,
        _identity: &Identity,
        asset: &SourceAsset,
    ) -> Result<Vec<DeclaredDependency>, TransformError> {
        tokens(asset)
            .iter()
            .skip(1)
            .map(|token| {
                if let Some(name) = token.strip_prefix('+') {
                    Ok(DeclaredDependency::build(id(name)))
                } else if let Some(name) = token.strip_prefix('~') {
                    Ok(DeclaredDependency::uses(id(name)))
                } else {
                    Err(TransformError::new(format!("bad token '{token}'")))
                }
            })
            .collect()
    }

    fn build_output(
        &self,
        cx: &BuildContext<'_>,
        identity: &Identity,
        asset: &SourceAsset,
        _params: &BuildParams,
    ) -> Result<Product, TransformError> {
        self.recorder.record(*identity);
        let tokens = tokens(asset);
        let payload = tokens.first().map(String::as_str).unwrap_or("");
        match payload {
            "fail" => return Err(TransformError::new("converter rejected the input")),
            "panic" => panic!("converter crashed"),
            _ => {}
        }
        let mut out = format!("{}:{}", self.kind, payload).into_bytes();
        for token in tokens.iter().skip(1) {
            if let Some(name) = token.strip_prefix('+') {
                let child = cx
                    .dependency_product(&id(name))
                    .ok_or_else(|| TransformError::new(format!("missing product of {name}")))?;
                out.push(b'[');
                out.extend_from_slice(child.bytes());
                out.push(b']');
            }
        }
        Ok(Product::new(out))
    }
}

pub const ASSET_TYPES: [&str; 5] = ["scene", "mesh", "texture", "material", "light"];

/// A project directory with persistent build state, a local cache, and
/// in-memory source and output stores that outlive individual sessions.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub sources: MemoryStore,
    pub outputs: MemoryStore,
    pub recorder: Arc<Recorder>,
    pub local_cache: bool,
    pub remote: Option<String>,
    pub parallelism: usize,
    pub params: BuildParams,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            sources: MemoryStore::new(),
            outputs: MemoryStore::new(),
            recorder: Arc::new(Recorder::default()),
            local_cache: true,
            remote: None,
            parallelism: 4,
            params: BuildParams::default(),
        }
    }

    pub fn asset(&self, name: &str, asset_type: &str, data: &str) {
        self.sources
            .set_source(id(name), SourceAsset::new(asset_type, data.as_bytes().to_vec()));
    }

    pub fn registry(&self) -> Arc<TransformRegistry> {
        let mut registry = TransformRegistry::new();
        for kind in ASSET_TYPES {
            registry.register(
                kind,
                Arc::new(NodeTransform {
                    kind,
                    version: 1,
                    recorder: self.recorder.clone(),
                }),
            );
        }
        Arc::new(registry)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join("state.bin")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn env(&self) -> BuildEnvironment {
        let mut cache = CacheChain::new();
        if self.local_cache {
            cache.push(Arc::new(LocalCache::new(self.cache_dir(), CacheAccess::READ_WRITE)));
        }
        if let Some(address) = &self.remote {
            cache.push(Arc::new(RemoteCache::new(
                address.clone(),
                CacheAccess::READ_WRITE,
                std::time::Duration::from_secs(5),
            )));
        }
        BuildEnvironment {
            instances: Arc::new(InstanceCache::new(Arc::new(self.sources.clone()))),
            registry: self.registry(),
            output: Arc::new(self.outputs.clone()),
            state: Arc::new(BuildStateStore::open(self.state_path()).unwrap()),
            cache,
            pool: Arc::new(WorkerPool::new(self.parallelism).unwrap()),
            params: self.params.clone(),
        }
    }

    pub fn collect(env: &BuildEnvironment, roots: &[&str]) -> DependencySet {
        let roots: Vec<Identity> = roots.iter().map(|r| id(r)).collect();
        collect_incremental(
            CollectorEnv::new(env.instances.clone(), env.registry.clone()),
            &roots,
        )
        .unwrap()
    }

    /// One full session: collect, build, return the report.
    pub fn run(&self, roots: &[&str], force_rebuild: bool) -> BuildReport {
        let env = self.env();
        let set = Self::collect(&env, roots);
        Orchestrator::new(env).build(&set, force_rebuild)
    }

    pub fn output(&self, name: &str) -> Option<String> {
        self.outputs
            .read_output(&id(name))
            .map(|bytes| String::from_utf8(bytes).unwrap())
    }
}

/// Convenience over the `OutputStore` trait for tests.
pub trait ReadOutput {
    fn read_output(&self, identity: &Identity) -> Option<Vec<u8>>;
}

impl ReadOutput for MemoryStore {
    fn read_output(&self, identity: &Identity) -> Option<Vec<u8>> {
        anvil_build::OutputStore::read(self, identity).unwrap()
    }
}
