//! Probe contracts and the registry holding them.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;

use crate::{
    context::RunContext,
    error::{CheckError, RegistryError},
    node::Node,
    remote::VirtualMachine,
};

/// A probe executed once per run, independent of any node
#[async_trait]
pub trait ClusterCheck: Send + Sync {
    /// Unique name, used as the result key
    fn name(&self) -> &str;

    async fn check(&self, ctx: &RunContext) -> Result<(), CheckError>;
}

/// A probe executed once per reachable node.
///
/// The scheduler drives the lifecycle: `start_check` once before any node is
/// processed, `check_node` concurrently for every node, `finish_check` once
/// after every node unit finished. Cross-node state lives behind interior
/// mutability because `check_node` runs in parallel for different nodes.
#[async_trait]
pub trait NodeCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Reset state aggregated across nodes in a previous run
    fn start_check(&self) {}

    async fn check_node(
        &self,
        ctx: &RunContext,
        node: &Node,
        vm: &VirtualMachine,
    ) -> Result<(), CheckError>;

    /// Report findings aggregated over all nodes
    async fn finish_check(&self, _ctx: &RunContext) {}
}

/// Ordered collections of the probes registered at startup
#[derive(Clone, Default)]
pub struct CheckRegistry {
    cluster_checks: Vec<Arc<dyn ClusterCheck>>,
    node_checks: Vec<Arc<dyn NodeCheck>>,
    names: HashSet<String>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_cluster_check(
        &mut self,
        check: Arc<dyn ClusterCheck>,
    ) -> Result<&mut Self, RegistryError> {
        self.claim(check.name())?;
        self.cluster_checks.push(check);
        Ok(self)
    }

    pub fn register_node_check(
        &mut self,
        check: Arc<dyn NodeCheck>,
    ) -> Result<&mut Self, RegistryError> {
        self.claim(check.name())?;
        self.node_checks.push(check);
        Ok(self)
    }

    pub fn cluster_checks(&self) -> &[Arc<dyn ClusterCheck>] {
        &self.cluster_checks
    }

    pub fn node_checks(&self) -> &[Arc<dyn NodeCheck>] {
        &self.node_checks
    }

    pub fn len(&self) -> usize {
        self.cluster_checks.len() + self.node_checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.names.insert(name.to_string()) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("cluster_checks", &self.cluster_checks.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("node_checks", &self.node_checks.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}
