use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    scheduler::{CheckScheduler, RunReport},
    topology::ClusterInfo,
};

/// Runs the scheduler on a fixed interval and publishes every report
pub struct PeriodicRunner {
    scheduler: Arc<CheckScheduler>,
    cluster: ClusterInfo,
    interval: Duration,
    report_tx: mpsc::Sender<RunReport>,
}

impl PeriodicRunner {
    pub fn new(
        scheduler: Arc<CheckScheduler>,
        cluster: ClusterInfo,
        interval: Duration,
        report_tx: mpsc::Sender<RunReport>,
    ) -> Self {
        Self { scheduler, cluster, interval: interval.max(Duration::from_millis(1)), report_tx }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until `cancel` fires or the report receiver is dropped. The first
    /// run starts immediately and runs never overlap.
    pub async fn run(self, cancel: CancellationToken) {
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let report = self.scheduler.run_checks(&self.cluster, &cancel).await;
            if let Err(e) = self.report_tx.send(report).await {
                error!("Failed to send run report: {}", e);
                break;
            }
        }
        info!("Periodic check runner stopped");
    }
}
