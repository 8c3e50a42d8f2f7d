use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use detector::{CheckScheduler, Collaborators, InMemoryMetrics, PeriodicRunner};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod checks;
mod config;
mod fixture;
mod report;

use config::Config;
use fixture::{Fixture, FixtureBackend};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Config file, created with defaults if missing. Defaults to
    /// $XDG_CONFIG_HOME/problem-detector/config.toml
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Run all checks once and exit; the exit code reports the cluster's health
    #[clap(long)]
    once: bool,

    /// Print the effective configuration and exit
    #[clap(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = Config::from_config(args.config.as_ref()).context("Failed to load config")?;
    logger::init_tracing_with_level(config.log_level()?);

    if args.print_config {
        println!("{config}");
        return Ok(ExitCode::SUCCESS);
    }
    debug!("{}", config);

    let fixture = Fixture::load_or_create(&config.fixture.path)
        .with_context(|| format!("Failed to load fixture {}", config.fixture.path.display()))?;
    let backend = Arc::new(FixtureBackend::new(fixture));
    let metrics = Arc::new(InMemoryMetrics::new());

    let registry = checks::builtin_checks().context("Failed to register checks")?;
    info!("Registered {} checks", registry.len());

    let collaborators = Collaborators {
        config_source: backend.clone(),
        connector: backend.clone(),
        inventory: backend,
        metrics: metrics.clone(),
    };
    let scheduler =
        Arc::new(CheckScheduler::new(Arc::new(registry), collaborators, config.scheduler));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutting down");
        shutdown.cancel();
    });

    if args.once {
        let report = scheduler.run_checks(&config.cluster, &cancel).await;
        report::log_report(&report, &metrics);
        for label in report::failing_checks(&report) {
            println!("{label}");
        }
        let code = if report::is_healthy(&report) { ExitCode::SUCCESS } else { ExitCode::FAILURE };
        return Ok(code);
    }

    let (report_tx, mut report_rx) = mpsc::channel(1);
    let runner = PeriodicRunner::new(
        scheduler,
        config.cluster.clone(),
        config.scheduler.interval(),
        report_tx,
    )
    .spawn(cancel.clone());
    info!("Checking cluster {} every {:?}", config.cluster.name, config.scheduler.interval());

    while let Some(report) = report_rx.recv().await {
        report::log_report(&report, &metrics);
    }
    runner.await.context("Check runner failed")?;

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use detector::{ClusterInfo, SchedulerConfig};

    #[tokio::test]
    async fn test_builtin_checks_against_sample_fixture() {
        let backend = Arc::new(FixtureBackend::new(Fixture { latency_ms: 0, ..Fixture::sample() }));
        let metrics = Arc::new(InMemoryMetrics::new());
        let collaborators = Collaborators {
            config_source: backend.clone(),
            connector: backend.clone(),
            inventory: backend,
            metrics: metrics.clone(),
        };
        let scheduler = CheckScheduler::new(
            Arc::new(checks::builtin_checks().unwrap()),
            collaborators,
            SchedulerConfig::default(),
        );

        let cluster = ClusterInfo { name: "local".into(), ..ClusterInfo::default() };
        let report = scheduler.run_checks(&cluster, &CancellationToken::new()).await;

        assert!(report.is_complete(), "{:?}", report.error);
        // 2 cluster checks, 3 node checks on 4 nodes
        assert_eq!(report.results.len(), 2 + 4 * 3);
        assert_eq!(
            report::failing_checks(&report),
            vec![
                "CheckNodeDiskUUID:worker-2",
                "CheckNodeDiskUUID:worker-3",
                "CheckNodeEsxiVersion:worker-3",
                "CollectNodeHWVersion:worker-2",
                "CollectNodeHWVersion:worker-3",
            ]
        );
        assert!(!report::is_healthy(&report));
        assert_eq!(metrics.failing().len(), 5);
    }
}
