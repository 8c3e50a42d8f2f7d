use std::{fmt, future::Future, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    DEFAULT_CALL_TIMEOUT_SECS,
    cache::Cache,
    error::{CheckError, RemoteError},
    metrics::MetricsRecorder,
    remote::{ManagedRef, Properties, RemoteSession},
    topology::{ClusterInfo, PlatformConfig, PlatformTopology},
};

/// Key of a cached property fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRequest {
    pub reference: ManagedRef,
    pub names: Vec<String>,
}

/// Run a remote call bounded by `timeout` and by the cancellation token,
/// whichever fires first.
pub(crate) async fn timed<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    call: F,
) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RemoteError::Cancelled),
        outcome = tokio::time::timeout(timeout, call) => {
            outcome.unwrap_or_else(|_| Err(RemoteError::Timeout(timeout)))
        }
    }
}

/// Everything a check needs during one run.
///
/// Built once per run and never mutated afterwards; checks running in
/// parallel only ever read it. The cache is the one part with interior
/// mutability.
pub struct RunContext {
    run_id: Uuid,
    cancel: CancellationToken,
    call_timeout: Duration,
    session: Arc<dyn RemoteSession>,
    cluster: ClusterInfo,
    config: PlatformConfig,
    topology: PlatformTopology,
    cache: Cache<PropertyRequest, Properties>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl RunContext {
    pub fn builder(
        session: Arc<dyn RemoteSession>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> RunContextBuilder {
        RunContextBuilder {
            run_id: None,
            cancel: None,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            session,
            cluster: ClusterInfo::default(),
            config: PlatformConfig::default(),
            metrics,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn session(&self) -> &Arc<dyn RemoteSession> {
        &self.session
    }

    /// Fully qualified name of the user the run is connected as
    pub fn user_name(&self) -> &str {
        self.session.user_name()
    }

    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn topology(&self) -> &PlatformTopology {
        &self.topology
    }

    pub fn cache(&self) -> &Cache<PropertyRequest, Properties> {
        &self.cache
    }

    pub fn metrics(&self) -> &dyn MetricsRecorder {
        self.metrics.as_ref()
    }

    /// Bound a remote call by the per-call timeout and the run's cancellation
    pub async fn call<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        timed(&self.cancel, self.call_timeout, call).await
    }

    /// Fetch properties of a managed object through the run cache. Concurrent
    /// checks asking for the same object and property set share one remote
    /// call.
    pub async fn properties(
        &self,
        reference: &ManagedRef,
        names: &[&str],
    ) -> Result<Properties, CheckError> {
        let request = PropertyRequest {
            reference: reference.clone(),
            names: names.iter().map(|name| name.to_string()).collect(),
        };

        let session = self.session.clone();
        let cancel = self.cancel.clone();
        let timeout = self.call_timeout;
        let key = request.clone();

        self.cache
            .get(key, move || async move {
                timed(
                    &cancel,
                    timeout,
                    session.fetch_properties(&request.reference, &request.names, timeout),
                )
                .await
                .map_err(CheckError::from)
            })
            .await
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("user", &self.session.user_name())
            .field("call_timeout", &self.call_timeout)
            .field("cluster", &self.cluster.name)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Builder for RunContext
pub struct RunContextBuilder {
    run_id: Option<Uuid>,
    cancel: Option<CancellationToken>,
    call_timeout: Duration,
    session: Arc<dyn RemoteSession>,
    cluster: ClusterInfo,
    config: PlatformConfig,
    metrics: Arc<dyn MetricsRecorder>,
}

impl RunContextBuilder {
    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn cluster(mut self, cluster: ClusterInfo) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn config(mut self, config: PlatformConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the context. The platform topology is resolved here, once.
    pub fn build(self) -> RunContext {
        let topology = PlatformTopology::resolve(self.cluster.platform_spec.as_ref(), &self.config);
        RunContext {
            run_id: self.run_id.unwrap_or_else(Uuid::new_v4),
            cancel: self.cancel.unwrap_or_default(),
            call_timeout: self.call_timeout,
            session: self.session,
            cluster: self.cluster,
            config: self.config,
            topology,
            cache: Cache::new(),
            metrics: self.metrics,
        }
    }
}
