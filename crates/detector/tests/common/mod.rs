//! Fake collaborators and probes shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use detector::{
    CheckError, CheckRegistry, CheckScheduler, ClusterCheck, Collaborators, ConfigSource,
    ConnectionParams, Credentials, InMemoryMetrics, ManagedRef, Node, NodeCheck, NodeInventory,
    PlatformConfig, Properties, RemoteError, RemoteSession, ResultCollector, RunContext,
    SchedulerConfig, SessionConnector, VirtualMachine,
};
use serde_json::json;

pub const SERVER: &str = "vcenter.example.com";

/// Tracks how many operations run at the same time
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn track<T>(&self, operation: impl std::future::Future<Output = T>) -> T {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let output = operation.await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        output
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub fn uuid_for(index: usize) -> String {
    format!("4237f5a2-8c1e-4bd1-9d2a-{:012}", index)
}

pub fn node(index: usize) -> Node {
    Node::new(format!("worker-{}", index), format!("vsphere://{}", uuid_for(index).to_uppercase()))
}

#[derive(Default)]
pub struct FakeSession {
    vms: HashMap<String, ManagedRef>,
    broken: HashSet<String>,
    lookup_delay: Duration,
    tracker: Option<Arc<ConcurrencyTracker>>,
    pub logouts: AtomicUsize,
}

impl FakeSession {
    /// Session knowing the VMs of nodes `0..nodes`
    pub fn with_nodes(nodes: usize) -> Self {
        let mut session = Self::default();
        for index in 0..nodes {
            session.vms.insert(uuid_for(index), ManagedRef::virtual_machine(format!("vm-{}", index)));
        }
        session
    }

    /// Forget the VM of a node so that finding it returns nothing
    pub fn without_vm(mut self, index: usize) -> Self {
        self.vms.remove(&uuid_for(index));
        self
    }

    /// Make finding the VM of a node fail with an API error
    pub fn broken_vm(mut self, index: usize) -> Self {
        self.broken.insert(uuid_for(index));
        self
    }

    pub fn lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    pub fn tracked(mut self, tracker: Arc<ConcurrencyTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    async fn remote_call<T>(&self, call: impl std::future::Future<Output = T>) -> T {
        match &self.tracker {
            Some(tracker) => tracker.track(call).await,
            None => call.await,
        }
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn user_name(&self) -> &str {
        "administrator@vsphere.local"
    }

    async fn find_by_uuid(
        &self,
        uuid: &str,
        _timeout: Duration,
    ) -> Result<Option<ManagedRef>, RemoteError> {
        self.remote_call(async {
            tokio::time::sleep(self.lookup_delay).await;
            if self.broken.contains(uuid) {
                return Err(RemoteError::api("connection reset by peer"));
            }
            Ok(self.vms.get(uuid).cloned())
        })
        .await
    }

    async fn fetch_properties(
        &self,
        reference: &ManagedRef,
        _names: &[String],
        _timeout: Duration,
    ) -> Result<Properties, RemoteError> {
        self.remote_call(async {
            let properties = json!({
                "config.version": "vmx-15",
                "config.extraConfig": { "disk.EnableUUID": "TRUE" },
                "runtime.host": { "type": "HostSystem", "value": format!("host-{}", reference.value) }
            });
            Ok(properties.as_object().cloned().unwrap_or_default())
        })
        .await
    }

    async fn logout(&self, _timeout: Duration) -> Result<(), RemoteError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    pub session: Arc<FakeSession>,
    pub reject: bool,
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn login(
        &self,
        params: &ConnectionParams,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        assert_eq!(params.server, SERVER);
        if self.reject {
            return Err(RemoteError::api("Cannot complete login due to an incorrect user name or password"));
        }
        Ok(self.session.clone())
    }
}

pub struct FakeConfigSource;

#[async_trait]
impl ConfigSource for FakeConfigSource {
    async fn platform_config(&self) -> Result<PlatformConfig, RemoteError> {
        let mut config = PlatformConfig::default();
        config.workspace.server = SERVER.to_string();
        config.workspace.datacenter = "DC0".to_string();
        config.workspace.default_datastore = "LocalDS_0".to_string();
        Ok(config)
    }

    fn secret_name(&self) -> &str {
        "vsphere-creds"
    }

    async fn secret(&self) -> Result<HashMap<String, String>, RemoteError> {
        let mut secret = HashMap::new();
        secret.insert(format!("{}.username", SERVER), "administrator@vsphere.local".to_string());
        secret.insert(format!("{}.password", SERVER), "password".to_string());
        Ok(secret)
    }
}

pub struct FakeInventory {
    pub nodes: Result<Vec<Node>, RemoteError>,
    pub delay: Duration,
}

#[async_trait]
impl NodeInventory for FakeInventory {
    async fn list_nodes(&self) -> Result<Vec<Node>, RemoteError> {
        tokio::time::sleep(self.delay).await;
        self.nodes.clone()
    }
}

/// Cluster check with a fixed outcome and an optional delay
pub struct StaticClusterCheck {
    pub name: String,
    pub fail: bool,
    pub delay: Duration,
    pub tracker: Option<Arc<ConcurrencyTracker>>,
}

impl StaticClusterCheck {
    pub fn passing(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), fail: false, delay: Duration::ZERO, tracker: None })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), fail: true, delay: Duration::ZERO, tracker: None })
    }

    pub fn slow(name: &str, delay: Duration, tracker: Option<Arc<ConcurrencyTracker>>) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), fail: false, delay, tracker })
    }
}

#[async_trait]
impl ClusterCheck for StaticClusterCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &RunContext) -> Result<(), CheckError> {
        let work = async {
            ctx.call(async {
                tokio::time::sleep(self.delay).await;
                Ok(())
            })
            .await?;
            if self.fail {
                return Err(CheckError::failed(format!("{} detected a problem", self.name)));
            }
            Ok::<(), CheckError>(())
        };
        match &self.tracker {
            Some(tracker) => tracker.track(work).await,
            None => work.await,
        }
    }
}

/// Cluster check that panics
pub struct PanickingClusterCheck;

#[async_trait]
impl ClusterCheck for PanickingClusterCheck {
    fn name(&self) -> &str {
        "CheckThatPanics"
    }

    async fn check(&self, _ctx: &RunContext) -> Result<(), CheckError> {
        panic!("unexpected property layout")
    }
}

/// Node check recording its lifecycle calls
pub struct RecordingNodeCheck {
    pub name: String,
    pub fail: bool,
    pub tracker: Option<Arc<ConcurrencyTracker>>,
    pub starts: AtomicUsize,
    pub finishes: AtomicUsize,
    pub checked: Mutex<Vec<String>>,
    /// Collector whose sequence is captured when `finish_check` runs
    pub observed_collector: Option<Arc<ResultCollector>>,
    pub sequence_at_finish: Mutex<Option<u64>>,
}

impl RecordingNodeCheck {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            tracker: None,
            starts: AtomicUsize::new(0),
            finishes: AtomicUsize::new(0),
            checked: Mutex::new(Vec::new()),
            observed_collector: None,
            sequence_at_finish: Mutex::new(None),
        }
    }

    pub fn passing(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self { fail: true, ..Self::new(name) })
    }

    pub fn checked_nodes(&self) -> Vec<String> {
        let mut nodes = self.checked.lock().unwrap().clone();
        nodes.sort();
        nodes
    }
}

#[async_trait]
impl NodeCheck for RecordingNodeCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_check(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.checked.lock().unwrap().clear();
    }

    async fn check_node(
        &self,
        ctx: &RunContext,
        node: &Node,
        vm: &VirtualMachine,
    ) -> Result<(), CheckError> {
        let work = async {
            // Shared through the run cache by every check looking at this VM
            let properties = ctx.properties(&vm.reference, &["config.version"]).await?;
            assert!(properties.contains_key("config.version"));
            self.checked.lock().unwrap().push(node.name.clone());
            if self.fail {
                return Err(CheckError::failed(format!("{} failed on {}", self.name, node.name)));
            }
            Ok::<(), CheckError>(())
        };
        match &self.tracker {
            Some(tracker) => tracker.track(work).await,
            None => work.await,
        }
    }

    async fn finish_check(&self, _ctx: &RunContext) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        if let Some(collector) = &self.observed_collector {
            *self.sequence_at_finish.lock().unwrap() = Some(collector.sequence());
        }
    }
}

pub struct Harness {
    pub session: Arc<FakeSession>,
    pub metrics: Arc<InMemoryMetrics>,
    pub scheduler: CheckScheduler,
}

pub fn config(parallel_calls: usize) -> SchedulerConfig {
    SchedulerConfig { parallel_calls, queue_capacity: 4, ..SchedulerConfig::default() }
}

pub fn harness(
    registry: CheckRegistry,
    session: FakeSession,
    nodes: Result<Vec<Node>, RemoteError>,
    config: SchedulerConfig,
) -> Harness {
    build_harness(registry, session, FakeInventory { nodes, delay: Duration::ZERO }, config, false)
}

/// Harness whose node listing only answers after `delay`
pub fn slow_inventory_harness(
    registry: CheckRegistry,
    nodes: Result<Vec<Node>, RemoteError>,
    delay: Duration,
    config: SchedulerConfig,
) -> Harness {
    build_harness(registry, FakeSession::default(), FakeInventory { nodes, delay }, config, false)
}

pub fn rejecting_harness(registry: CheckRegistry) -> Harness {
    let inventory = FakeInventory { nodes: Ok(vec![]), delay: Duration::ZERO };
    build_harness(registry, FakeSession::default(), inventory, config(2), true)
}

fn build_harness(
    registry: CheckRegistry,
    session: FakeSession,
    inventory: FakeInventory,
    config: SchedulerConfig,
    reject: bool,
) -> Harness {
    let session = Arc::new(session);
    let metrics = Arc::new(InMemoryMetrics::new());
    let collaborators = Collaborators {
        config_source: Arc::new(FakeConfigSource),
        connector: Arc::new(FakeConnector { session: session.clone(), reject }),
        inventory: Arc::new(inventory),
        metrics: metrics.clone(),
    };
    let scheduler = CheckScheduler::new(Arc::new(registry), collaborators, config);
    Harness { session, metrics, scheduler }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}
