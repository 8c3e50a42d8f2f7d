use detector::{CheckResult, InMemoryMetrics, RunReport};
use tracing::{error, info, warn};

fn label(result: &CheckResult) -> String {
    match &result.node {
        Some(node) => format!("{}:{}", result.name, node),
        None => result.name.clone(),
    }
}

/// Labels of all failed checks, sorted
pub fn failing_checks(report: &RunReport) -> Vec<String> {
    let mut failing: Vec<String> = report.failures().map(label).collect();
    failing.sort();
    failing
}

pub fn log_report(report: &RunReport, metrics: &InMemoryMetrics) {
    let elapsed = report.finished_at - report.started_at;
    info!(
        run_id = %report.run_id,
        "Run finished in {} ms: {} passed, {} failed",
        elapsed.num_milliseconds(),
        report.passed(),
        report.failed()
    );

    for result in report.failures() {
        if let Some(err) = result.error() {
            warn!("{} failed: {}", label(result), err);
        }
    }

    if let Some(err) = &report.error {
        error!("Run {} did not complete: {}", report.run_id, err);
    }

    let (started, finished) = metrics.collections();
    info!(
        "{} checks failing after {} of {} collections",
        metrics.failing().len(),
        finished,
        started
    );
}

/// A complete run without failed checks
pub fn is_healthy(report: &RunReport) -> bool {
    report.is_complete() && report.failed() == 0
}
