//! Cluster metadata and the platform topology derived from it.
//!
//! The topology is the single view of vCenters and failure domains the checks
//! work from. Clusters installed with the legacy configuration only describe
//! their vCenter in the workspace section, so that entry is merged in when the
//! platform spec does not list it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Connection configuration read from the cluster's cloud provider config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub global: GlobalConfig,
    pub workspace: WorkspaceConfig,

    /// Virtual center entries keyed by server address
    pub virtual_center: BTreeMap<String, VirtualCenterConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Skip TLS verification of the vCenter endpoint
    pub insecure_flag: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub server: String,
    pub datacenter: String,
    pub folder: String,
    pub default_datastore: String,
    pub resource_pool_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualCenterConfig {
    /// Comma separated datacenter names
    pub datacenters: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VCenter {
    pub server: String,
    pub datacenters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub datacenter: String,
    pub folder: String,
    pub resource_pool: String,
    pub datastore: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDomain {
    pub name: String,
    pub region: String,
    pub zone: String,
    pub server: String,
    pub topology: Topology,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformTopology {
    pub vcenters: Vec<VCenter>,
    pub failure_domains: Vec<FailureDomain>,
}

impl PlatformTopology {
    /// Build the topology from the cluster's platform spec, adding the legacy
    /// workspace vCenter when the spec does not know about it.
    pub fn resolve(spec: Option<&PlatformTopology>, config: &PlatformConfig) -> Self {
        let mut topology = spec.cloned().unwrap_or_default();

        let server = &config.workspace.server;
        if !topology.vcenters.iter().any(|vcenter| &vcenter.server == server) {
            topology.merge_legacy(config);
        }
        topology
    }

    fn merge_legacy(&mut self, config: &PlatformConfig) {
        let workspace = &config.workspace;
        let Some(virtual_center) = config.virtual_center.get(&workspace.server) else {
            return;
        };

        let datacenters =
            virtual_center.datacenters.split(',').map(|dc| dc.trim().to_string()).collect();
        self.vcenters.push(VCenter { server: workspace.server.clone(), datacenters });

        self.failure_domains.push(FailureDomain {
            name: String::new(),
            region: String::new(),
            zone: String::new(),
            server: workspace.server.clone(),
            topology: Topology {
                datacenter: workspace.datacenter.clone(),
                folder: workspace.folder.clone(),
                resource_pool: workspace.resource_pool_path.clone(),
                datastore: workspace.default_datastore.clone(),
            },
        });
    }
}

/// Cluster metadata handed to every run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterInfo {
    pub name: String,
    pub version: String,

    /// Topology declared by the cluster's infrastructure object, if any
    pub platform_spec: Option<PlatformTopology>,
}
