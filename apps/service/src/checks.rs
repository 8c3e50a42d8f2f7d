//! Built-in probes of the detector service.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use detector::{
    CheckError, CheckRegistry, ClusterCheck, ManagedRef, Node, NodeCheck, RegistryError,
    RunContext, VirtualMachine,
};
use serde_json::Value;
use tracing::{info, warn};

/// Oldest virtual hardware version supporting disk UUID based volume attach
pub const MIN_HW_VERSION: u32 = 15;

/// Oldest supported ESXi release, as (major, minor)
pub const MIN_ESXI_VERSION: (u32, u32) = (7, 0);

/// Every built-in probe, in the order they report
pub fn builtin_checks() -> Result<CheckRegistry, RegistryError> {
    let mut registry = CheckRegistry::new();
    registry
        .register_cluster_check(Arc::new(DefaultDatastoreCheck))?
        .register_cluster_check(Arc::new(TopologyCheck))?
        .register_node_check(Arc::new(DiskUuidCheck))?
        .register_node_check(Arc::new(HardwareVersionCheck::default()))?
        .register_node_check(Arc::new(EsxiVersionCheck))?;
    Ok(registry)
}

/// The legacy workspace must name a default datastore
pub struct DefaultDatastoreCheck;

#[async_trait]
impl ClusterCheck for DefaultDatastoreCheck {
    fn name(&self) -> &str {
        "CheckDefaultDatastore"
    }

    async fn check(&self, ctx: &RunContext) -> Result<(), CheckError> {
        let workspace = &ctx.config().workspace;
        if workspace.default_datastore.trim().is_empty() {
            return Err(CheckError::failed("no default datastore is configured"));
        }
        Ok(())
    }
}

/// Every failure domain must point at a known vCenter and carry a full
/// topology
pub struct TopologyCheck;

#[async_trait]
impl ClusterCheck for TopologyCheck {
    fn name(&self) -> &str {
        "CheckFailureDomains"
    }

    async fn check(&self, ctx: &RunContext) -> Result<(), CheckError> {
        let topology = ctx.topology();
        if topology.vcenters.is_empty() {
            return Err(CheckError::failed("no vCenter is configured"));
        }

        let mut problems = Vec::new();
        for domain in &topology.failure_domains {
            let label =
                if domain.name.is_empty() { domain.server.as_str() } else { domain.name.as_str() };
            if !topology.vcenters.iter().any(|vcenter| vcenter.server == domain.server) {
                problems.push(format!("{}: unknown vCenter {}", label, domain.server));
            }
            if domain.topology.datacenter.is_empty() {
                problems.push(format!("{}: datacenter is not set", label));
            }
            if domain.topology.datastore.is_empty() {
                problems.push(format!("{}: datastore is not set", label));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CheckError::failed(problems.join(", ")))
        }
    }
}

/// Volumes can only be attached to VMs exposing disk UUIDs
pub struct DiskUuidCheck;

#[async_trait]
impl NodeCheck for DiskUuidCheck {
    fn name(&self) -> &str {
        "CheckNodeDiskUUID"
    }

    async fn check_node(
        &self,
        _ctx: &RunContext,
        _node: &Node,
        vm: &VirtualMachine,
    ) -> Result<(), CheckError> {
        let enabled = vm
            .property("config.extraConfig")
            .and_then(|extra_config| extra_config_value(extra_config, "disk.EnableUUID"))
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));

        if !enabled {
            return Err(CheckError::failed(
                "the node's VM does not have disk.EnableUUID set to TRUE",
            ));
        }
        Ok(())
    }
}

/// Look up an advanced setting, either from a key/value object or from a
/// list of `{key, value}` option values
fn extra_config_value<'a>(extra_config: &'a Value, key: &str) -> Option<&'a str> {
    match extra_config {
        Value::Object(map) => map.get(key)?.as_str(),
        Value::Array(options) => options
            .iter()
            .find(|option| option.get("key").and_then(Value::as_str) == Some(key))?
            .get("value")?
            .as_str(),
        _ => None,
    }
}

/// Collects the hardware versions of all node VMs and fails nodes below
/// [`MIN_HW_VERSION`]
#[derive(Default)]
pub struct HardwareVersionCheck {
    versions: Mutex<BTreeMap<String, usize>>,
}

impl HardwareVersionCheck {
    fn versions(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, usize>> {
        self.versions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count of node VMs per hardware version seen in the current run
    #[cfg(test)]
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.versions().clone()
    }
}

fn parse_hw_version(version: &str) -> Option<u32> {
    version.strip_prefix("vmx-")?.parse().ok()
}

#[async_trait]
impl NodeCheck for HardwareVersionCheck {
    fn name(&self) -> &str {
        "CollectNodeHWVersion"
    }

    fn start_check(&self) {
        self.versions().clear();
    }

    async fn check_node(
        &self,
        _ctx: &RunContext,
        _node: &Node,
        vm: &VirtualMachine,
    ) -> Result<(), CheckError> {
        let version = vm
            .property("config.version")
            .and_then(Value::as_str)
            .ok_or_else(|| CheckError::failed("the node's VM reports no hardware version"))?;
        *self.versions().entry(version.to_string()).or_default() += 1;

        match parse_hw_version(version) {
            Some(number) if number >= MIN_HW_VERSION => Ok(()),
            Some(_) => Err(CheckError::failed(format!(
                "hardware version {} is older than vmx-{}",
                version, MIN_HW_VERSION
            ))),
            None => Err(CheckError::failed(format!("unknown hardware version {:?}", version))),
        }
    }

    async fn finish_check(&self, _ctx: &RunContext) {
        let versions = self.versions();
        let summary: Vec<String> =
            versions.iter().map(|(version, count)| format!("{}: {}", version, count)).collect();
        info!("Node hardware versions: {}", summary.join(", "));
    }
}

/// The host running the node's VM must run a supported ESXi release. Hosts
/// are shared by many nodes, so their properties come from the run cache.
pub struct EsxiVersionCheck;

fn parse_esxi_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

#[async_trait]
impl NodeCheck for EsxiVersionCheck {
    fn name(&self) -> &str {
        "CheckNodeEsxiVersion"
    }

    async fn check_node(
        &self,
        ctx: &RunContext,
        node: &Node,
        vm: &VirtualMachine,
    ) -> Result<(), CheckError> {
        let host: ManagedRef = vm
            .property("runtime.host")
            .and_then(|host| serde_json::from_value(host.clone()).ok())
            .ok_or_else(|| CheckError::failed("the node's VM reports no host"))?;

        let properties = ctx.properties(&host, &["config.product.version"]).await?;
        let version = properties
            .get("config.product.version")
            .and_then(Value::as_str)
            .ok_or_else(|| CheckError::failed(format!("host {} reports no version", host)))?;

        match parse_esxi_version(version) {
            Some(release) if release >= MIN_ESXI_VERSION => Ok(()),
            Some(_) => {
                warn!("Node {} runs on outdated host {} ({})", node.name, host.value, version);
                Err(CheckError::failed(format!(
                    "host {} runs ESXi {}, {}.{} or newer is required",
                    host.value, version, MIN_ESXI_VERSION.0, MIN_ESXI_VERSION.1
                )))
            }
            None => Err(CheckError::failed(format!("unknown ESXi version {:?}", version))),
        }
    }
}
