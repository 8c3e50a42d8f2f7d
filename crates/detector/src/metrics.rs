//! Metrics recording capability injected into the scheduler.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// Sink for check metrics. Called from inside running units, so
/// implementations must be cheap and safe to call concurrently.
pub trait MetricsRecorder: Send + Sync {
    fn start_collection(&self);

    fn finish_collection(&self);

    /// Set the pass/fail gauge of a check, per node for node checks
    fn record_check_outcome(&self, name: &str, node: Option<&str>, passed: bool);

    fn increment_invocation_count(&self, name: &str, node: Option<&str>);

    /// Set a connection problem gauge such as `InvalidCredentials`
    fn record_sync_error(&self, reason: &str, active: bool);
}

/// Recorder that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn start_collection(&self) {}

    fn finish_collection(&self) {}

    fn record_check_outcome(&self, _name: &str, _node: Option<&str>, _passed: bool) {}

    fn increment_invocation_count(&self, _name: &str, _node: Option<&str>) {}

    fn record_sync_error(&self, _reason: &str, _active: bool) {}
}

type MetricKey = (String, Option<String>);

fn key(name: &str, node: Option<&str>) -> MetricKey {
    (name.to_string(), node.map(str::to_string))
}

#[derive(Debug, Default)]
struct MetricsState {
    collections_started: u64,
    collections_finished: u64,
    outcomes: HashMap<MetricKey, bool>,
    invocations: HashMap<MetricKey, u64>,
    sync_errors: HashMap<String, bool>,
}

/// Recorder keeping the latest gauge values in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    state: Mutex<MetricsState>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded outcome of a check
    pub fn outcome(&self, name: &str, node: Option<&str>) -> Option<bool> {
        self.lock().outcomes.get(&key(name, node)).copied()
    }

    pub fn invocations(&self, name: &str, node: Option<&str>) -> u64 {
        self.lock().invocations.get(&key(name, node)).copied().unwrap_or(0)
    }

    pub fn sync_error(&self, reason: &str) -> Option<bool> {
        self.lock().sync_errors.get(reason).copied()
    }

    /// Checks whose last outcome was a failure
    pub fn failing(&self) -> Vec<(String, Option<String>)> {
        let mut failing: Vec<MetricKey> = self
            .lock()
            .outcomes
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(key, _)| key.clone())
            .collect();
        failing.sort();
        failing
    }

    /// Number of started and finished collections
    pub fn collections(&self) -> (u64, u64) {
        let state = self.lock();
        (state.collections_started, state.collections_finished)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn start_collection(&self) {
        self.lock().collections_started += 1;
    }

    fn finish_collection(&self) {
        self.lock().collections_finished += 1;
    }

    fn record_check_outcome(&self, name: &str, node: Option<&str>, passed: bool) {
        self.lock().outcomes.insert(key(name, node), passed);
    }

    fn increment_invocation_count(&self, name: &str, node: Option<&str>) {
        *self.lock().invocations.entry(key(name, node)).or_insert(0) += 1;
    }

    fn record_sync_error(&self, reason: &str, active: bool) {
        self.lock().sync_errors.insert(reason.to_string(), active);
    }
}
