//! Detector - check orchestration engine for virtualization platform problem detection
//!
//! This library runs cluster-level and node-level probes against a remote
//! virtualization platform with a fixed upper bound on concurrent remote calls,
//! isolates the failure of every single probe and node, and collects one
//! pass/fail result per probe execution.

pub mod cache;
pub mod checks;
pub mod collector;
pub mod config;
pub mod connect;
pub mod context;
pub mod error;
pub mod metrics;
pub mod node;
pub mod pool;
pub mod remote;
pub mod runner;
pub mod scheduler;
pub mod topology;

#[cfg(test)]
mod testing;

// Re-export main types
pub use cache::Cache;
pub use checks::{CheckRegistry, ClusterCheck, NodeCheck};
pub use collector::{CheckOutcome, CheckResult, ResultCollector};
pub use config::SchedulerConfig;
pub use connect::{ConnectionParams, Credentials};
pub use context::RunContext;
pub use error::{
    CheckError, ConnectError, CredentialError, LookupError, PoolError, RegistryError, RemoteError,
    RunError,
};
pub use metrics::{InMemoryMetrics, MetricsRecorder, NoopMetrics};
pub use node::Node;
pub use pool::{CheckPool, PoolStats};
pub use remote::{
    ConfigSource, ManagedRef, NodeInventory, Properties, RemoteSession, SessionConnector,
    VirtualMachine,
};
pub use runner::PeriodicRunner;
pub use scheduler::{CheckScheduler, Collaborators, RunReport};
pub use topology::{ClusterInfo, PlatformConfig, PlatformTopology};

/// Default number of remote calls allowed in flight at once
pub const DEFAULT_PARALLEL_CALLS: usize = 8;

/// Default number of units that may wait for an execution slot
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default bound for a single remote call, in seconds
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

/// User agent reported to the remote platform on login
pub const USER_AGENT: &str = concat!("problem-detector/", env!("CARGO_PKG_VERSION"));
