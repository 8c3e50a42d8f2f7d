//! The check scheduler, which runs one complete check run.
//!
//! A run connects to the remote platform, dispatches every cluster check and
//! one unit per node onto a bounded [`CheckPool`], waits for the pool and then
//! finalizes the node checks. Failures of single checks and single nodes are
//! folded into results; only connection, node listing and pool failures abort
//! the run.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    checks::{CheckRegistry, ClusterCheck, NodeCheck},
    collector::{CheckResult, ResultCollector},
    config::SchedulerConfig,
    connect::connect,
    context::RunContext,
    error::{CheckError, PoolError, RunError},
    metrics::MetricsRecorder,
    node::{Node, resolve_vm},
    pool::{CheckPool, panic_message},
    remote::{ConfigSource, NodeInventory, RemoteSession, SessionConnector, VirtualMachine},
    topology::ClusterInfo,
};

/// External collaborators a scheduler works with
#[derive(Clone)]
pub struct Collaborators {
    pub config_source: Arc<dyn ConfigSource>,
    pub connector: Arc<dyn SessionConnector>,
    pub inventory: Arc<dyn NodeInventory>,
    pub metrics: Arc<dyn MetricsRecorder>,
}

/// Outcome of one run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Every result recorded before the run completed or aborted
    pub results: Vec<CheckResult>,

    /// The fatal error that aborted the run, if any
    pub error: Option<RunError>,
}

impl RunReport {
    /// Whether the run completed without a fatal error
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|result| result.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|result| !result.passed())
    }
}

pub struct CheckScheduler {
    registry: Arc<CheckRegistry>,
    collaborators: Collaborators,
    config: SchedulerConfig,
}

impl CheckScheduler {
    pub fn new(
        registry: Arc<CheckRegistry>,
        collaborators: Collaborators,
        config: SchedulerConfig,
    ) -> Self {
        Self { registry, collaborators, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Run every registered check once and report the results.
    ///
    /// `cancel` aborts the run; results recorded up to that point are still
    /// part of the report.
    pub async fn run_checks(&self, cluster: &ClusterInfo, cancel: &CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let collector = Arc::new(ResultCollector::new());

        let outcome = self
            .run_checks_into(run_id, cluster, cancel, collector.clone())
            .instrument(info_span!("run", %run_id))
            .await;

        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            results: collector.snapshot(),
            error: outcome.err(),
        }
    }

    /// Run every registered check, recording into `collector`.
    ///
    /// The collector is sealed before this returns, whatever the outcome.
    pub async fn run_checks_into(
        &self,
        run_id: Uuid,
        cluster: &ClusterInfo,
        cancel: &CancellationToken,
        collector: Arc<ResultCollector>,
    ) -> Result<(), RunError> {
        let metrics = &self.collaborators.metrics;
        metrics.start_collection();

        // The run gets its own token so that aborting it never cancels the caller
        let run_cancel = cancel.child_token();
        let outcome = self.connect_and_dispatch(run_id, cluster, &run_cancel, &collector).await;
        run_cancel.cancel();
        collector.seal();

        match &outcome {
            Ok(()) => info!(
                "Finished running all checks in the cluster: {} results",
                collector.len()
            ),
            Err(err) => error!("Run aborted with {} results: {}", collector.len(), err),
        }
        metrics.finish_collection();
        outcome
    }

    async fn connect_and_dispatch(
        &self,
        run_id: Uuid,
        cluster: &ClusterInfo,
        cancel: &CancellationToken,
        collector: &Arc<ResultCollector>,
    ) -> Result<(), RunError> {
        let connection = connect(
            self.collaborators.config_source.as_ref(),
            self.collaborators.connector.as_ref(),
            self.collaborators.metrics.as_ref(),
            cancel,
            self.config.call_timeout(),
        )
        .await?;
        let session = connection.session.clone();

        let ctx = Arc::new(
            RunContext::builder(connection.session, self.collaborators.metrics.clone())
                .run_id(run_id)
                .cancellation(cancel.clone())
                .call_timeout(self.config.call_timeout())
                .cluster(cluster.clone())
                .config(connection.config)
                .build(),
        );

        let outcome = self.dispatch(&ctx, collector).await;
        logout(session.as_ref(), self.config.call_timeout()).await;
        outcome
    }

    async fn dispatch(
        &self,
        ctx: &Arc<RunContext>,
        collector: &Arc<ResultCollector>,
    ) -> Result<(), RunError> {
        let deadline = Instant::now() + self.config.run_timeout();
        let mut pool = CheckPool::new(
            self.config.parallel_calls,
            self.config.queue_capacity,
            ctx.cancellation().clone(),
        )
        .with_deadline(deadline);

        if let Err(err) = self.enqueue_all(ctx, &mut pool, collector).await {
            pool.shutdown().await;
            return Err(err);
        }

        debug!("Waiting for all checks");
        pool.join(deadline).await?;
        let stats = pool.stats();
        debug!(
            "Check pool finished: {} units, {} panicked, peak parallelism {}",
            stats.submitted, stats.panicked, stats.peak_active
        );

        self.finish_node_checks(ctx).await;
        Ok(())
    }

    async fn enqueue_all(
        &self,
        ctx: &Arc<RunContext>,
        pool: &mut CheckPool,
        collector: &Arc<ResultCollector>,
    ) -> Result<(), RunError> {
        self.enqueue_cluster_checks(ctx, pool, collector).await?;

        for check in self.registry.node_checks() {
            check.start_check();
        }

        let nodes = ctx
            .call(self.collaborators.inventory.list_nodes())
            .await
            .map_err(RunError::Inventory)?;
        debug!("Listed {} nodes", nodes.len());

        for node in nodes {
            self.enqueue_single_node_checks(ctx, pool, collector, node).await?;
        }
        Ok(())
    }

    async fn enqueue_cluster_checks(
        &self,
        ctx: &Arc<RunContext>,
        pool: &mut CheckPool,
        collector: &Arc<ResultCollector>,
    ) -> Result<(), RunError> {
        for check in self.registry.cluster_checks() {
            let ctx = ctx.clone();
            let check = check.clone();
            let collector = collector.clone();
            pool.submit(async move {
                run_single_cluster_check(&ctx, check.as_ref(), &collector).await;
            })
            .await
            .map_err(submission_error)?;
        }
        Ok(())
    }

    /// Submit one unit that resolves the node's VM and then runs every node
    /// check against it in registration order. Running the checks inside the
    /// same unit keeps pool occupancy at one slot per node.
    async fn enqueue_single_node_checks(
        &self,
        ctx: &Arc<RunContext>,
        pool: &mut CheckPool,
        collector: &Arc<ResultCollector>,
        node: Node,
    ) -> Result<(), RunError> {
        let ctx = ctx.clone();
        let registry = self.registry.clone();
        let collector = collector.clone();

        pool.submit(async move {
            let vm = match resolve_vm(&ctx, &node).await {
                Ok(vm) => vm,
                Err(err) => {
                    warn!("Failed to get VM of node {}: {}", node.name, err);
                    // Mark all checks as failed so the node does not silently disappear
                    for check in registry.node_checks() {
                        ctx.metrics().record_check_outcome(check.name(), Some(&node.name), false);
                        collector.add(
                            CheckResult::new(check.name(), Some(&node.name))
                                .failure(err.clone().into()),
                        );
                    }
                    return;
                }
            };

            for check in registry.node_checks() {
                debug!("Running node check {}:{}", node.name, check.name());
                run_single_node_check(&ctx, check.as_ref(), &node, &vm, &collector).await;
            }
        })
        .await
        .map_err(submission_error)
    }

    async fn finish_node_checks(&self, ctx: &RunContext) {
        for check in self.registry.node_checks() {
            check.finish_check(ctx).await;
        }
    }
}

async fn run_single_cluster_check(
    ctx: &RunContext,
    check: &dyn ClusterCheck,
    collector: &ResultCollector,
) {
    let name = check.name();
    debug!("{} starting", name);

    let outcome = guarded(check.check(ctx)).await;
    match &outcome {
        Ok(()) => debug!("{} passed", name),
        Err(err) => info!("{} failed: {}", name, err),
    }

    ctx.metrics().record_check_outcome(name, None, outcome.is_ok());
    ctx.metrics().increment_invocation_count(name, None);
    collector.add(CheckResult::new(name, None).with_outcome(outcome));
}

async fn run_single_node_check(
    ctx: &RunContext,
    check: &dyn NodeCheck,
    node: &Node,
    vm: &VirtualMachine,
    collector: &ResultCollector,
) {
    let name = check.name();
    debug!("{}:{} starting", name, node.name);

    let outcome = guarded(check.check_node(ctx, node, vm)).await;
    match &outcome {
        Ok(()) => debug!("{}:{} passed", name, node.name),
        Err(err) => info!("{}:{} failed: {}", name, node.name, err),
    }

    ctx.metrics().record_check_outcome(name, Some(&node.name), outcome.is_ok());
    ctx.metrics().increment_invocation_count(name, Some(&node.name));
    collector.add(CheckResult::new(name, Some(&node.name)).with_outcome(outcome));
}

/// A deadline hit while submitting fails the run like a join past the deadline
fn submission_error(err: PoolError) -> RunError {
    match err {
        PoolError::Cancelled => RunError::Cancelled,
        err => RunError::PoolWait(err),
    }
}

/// Turn a panicking check into a failed result
async fn guarded<F>(check: F) -> Result<(), CheckError>
where
    F: Future<Output = Result<(), CheckError>>,
{
    AssertUnwindSafe(check).catch_unwind().await.unwrap_or_else(|panic| {
        Err(CheckError::failed(format!("check panicked: {}", panic_message(panic.as_ref()))))
    })
}

async fn logout(session: &dyn RemoteSession, timeout: Duration) {
    match tokio::time::timeout(timeout, session.logout(timeout)).await {
        Ok(Ok(())) => debug!("Logged out of {}", session.user_name()),
        Ok(Err(err)) => error!("Failed to logout: {}", err),
        Err(_) => error!("Failed to logout: timed out after {:?}", timeout),
    }
}
