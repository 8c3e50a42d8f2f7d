//! Offline backend serving a virtualization platform from an inventory file.
//!
//! The file describes the platform config, the credentials secret, the
//! accounts the platform accepts, the cluster nodes and the managed objects
//! with their properties. Every remote call is delayed by `latency_ms`.

use std::{
    collections::{BTreeMap, HashMap},
    fs, io, path,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use detector::{
    ConfigSource, ConnectionParams, Credentials, ManagedRef, Node, NodeInventory, PlatformConfig,
    Properties, RemoteError, RemoteSession, SessionConnector,
    topology::{VirtualCenterConfig, WorkspaceConfig},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

const INCORRECT_LOGIN: &str = "Cannot complete login due to an incorrect user name or password";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read fixture {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to write fixture {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to parse fixture {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },

    #[error("failed to serialize fixture: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Delay of every remote call, in milliseconds
    pub latency_ms: u64,
    pub platform: PlatformConfig,
    pub secret_name: String,
    pub secret: BTreeMap<String, String>,

    /// User name to password of the accounts the platform accepts
    pub accounts: BTreeMap<String, String>,
    pub nodes: Vec<Node>,
    pub objects: Vec<ManagedObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub kind: String,
    pub value: String,

    /// BIOS UUID, only set for virtual machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl ManagedObject {
    fn reference(&self) -> ManagedRef {
        ManagedRef::new(&self.kind, &self.value)
    }
}

impl Fixture {
    /// Load a fixture, writing the sample fixture first if none exists
    pub fn load_or_create(path: &path::Path) -> Result<Self, Error> {
        if !path.exists() {
            info!("Writing sample fixture to {}", path.display());
            let fixture = Self::sample();
            fixture.write(path)?;
            return Ok(fixture);
        }

        let raw = fs::read_to_string(path)
            .map_err(|source| Error::ReadFailed { path: path.to_path_buf(), source })?;
        toml::from_str(&raw).map_err(|source| Error::ParseFailed { path: path.to_path_buf(), source })
    }

    pub fn write(&self, path: &path::Path) -> Result<(), Error> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }
        fs::write(path, raw).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Four worker nodes, three of them on two hosts. worker-2 runs without
    /// disk UUIDs on an old hardware version, and the VM of worker-3 is gone.
    pub fn sample() -> Self {
        let server = "vcenter.example.com";
        let user = "administrator@vsphere.local";
        let password = "changeme";

        let mut platform = PlatformConfig {
            workspace: WorkspaceConfig {
                server: server.into(),
                datacenter: "DC0".into(),
                folder: "/DC0/vm/local".into(),
                default_datastore: "LocalDS_0".into(),
                resource_pool_path: "/DC0/host/DC0_C0/Resources".into(),
            },
            ..PlatformConfig::default()
        };
        platform
            .virtual_center
            .insert(server.into(), VirtualCenterConfig { datacenters: "DC0".into() });

        let secret = BTreeMap::from([
            (format!("{server}.username"), user.to_string()),
            (format!("{server}.password"), password.to_string()),
        ]);
        let accounts = BTreeMap::from([(user.to_string(), password.to_string())]);

        let vm = |index: usize, host: &str, version: &str, disk_uuid: &str| ManagedObject {
            kind: "VirtualMachine".into(),
            value: format!("vm-{}", 100 + index),
            uuid: Some(sample_uuid(index)),
            properties: object(json!({
                "config.version": version,
                "config.extraConfig": { "disk.EnableUUID": disk_uuid },
                "config.flags": { "enableLogging": true },
                "runtime.host": { "kind": "HostSystem", "value": host },
            })),
        };
        let host = |value: &str, version: &str| ManagedObject {
            kind: "HostSystem".into(),
            value: value.into(),
            uuid: None,
            properties: object(json!({ "config.product.version": version })),
        };

        Self {
            latency_ms: 20,
            platform,
            secret_name: "vsphere-creds".into(),
            secret,
            accounts,
            nodes: (0..4)
                .map(|index| {
                    Node::new(format!("worker-{index}"), format!("vsphere://{}", sample_uuid(index)))
                })
                .collect(),
            objects: vec![
                vm(0, "host-1", "vmx-19", "TRUE"),
                vm(1, "host-1", "vmx-19", "TRUE"),
                vm(2, "host-2", "vmx-13", "FALSE"),
                host("host-1", "8.0.2"),
                host("host-2", "7.0.3"),
            ],
        }
    }

    fn find_vm(&self, uuid: &str) -> Option<&ManagedObject> {
        self.objects.iter().find(|object| {
            object.kind == "VirtualMachine"
                && object.uuid.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(uuid))
        })
    }

    fn find_object(&self, reference: &ManagedRef) -> Option<&ManagedObject> {
        self.objects
            .iter()
            .find(|object| object.kind == reference.kind && object.value == reference.value)
    }
}

fn sample_uuid(index: usize) -> String {
    format!("4237F5A2-8C1E-4BD1-9D2A-{:012X}", 0x1C7E4A3F0B00 + index)
}

fn object(value: serde_json::Value) -> Properties {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Properties::new(),
    }
}

/// Serves every collaborator of the scheduler from one fixture
#[derive(Debug, Clone)]
pub struct FixtureBackend {
    fixture: Arc<Fixture>,
}

impl FixtureBackend {
    pub fn new(fixture: Fixture) -> Self {
        Self { fixture: Arc::new(fixture) }
    }

    async fn simulate_latency(&self) {
        tokio::time::sleep(Duration::from_millis(self.fixture.latency_ms)).await;
    }
}

#[async_trait]
impl ConfigSource for FixtureBackend {
    async fn platform_config(&self) -> Result<PlatformConfig, RemoteError> {
        Ok(self.fixture.platform.clone())
    }

    fn secret_name(&self) -> &str {
        &self.fixture.secret_name
    }

    async fn secret(&self) -> Result<HashMap<String, String>, RemoteError> {
        Ok(self.fixture.secret.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[async_trait]
impl SessionConnector for FixtureBackend {
    async fn login(
        &self,
        params: &ConnectionParams,
        credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        self.simulate_latency().await;

        if params.server != self.fixture.platform.workspace.server {
            return Err(RemoteError::api(format!("no such host: {}", params.server)));
        }
        match self.fixture.accounts.get(&credentials.username) {
            Some(password) if password == credentials.password() => {}
            _ => return Err(RemoteError::api(INCORRECT_LOGIN)),
        }

        debug!("Fixture session opened for {} by {}", credentials.username, params.user_agent);
        Ok(Arc::new(FixtureSession {
            backend: self.clone(),
            user_name: credentials.username.clone(),
        }))
    }
}

#[async_trait]
impl NodeInventory for FixtureBackend {
    async fn list_nodes(&self) -> Result<Vec<Node>, RemoteError> {
        self.simulate_latency().await;
        Ok(self.fixture.nodes.clone())
    }
}

pub struct FixtureSession {
    backend: FixtureBackend,
    user_name: String,
}

#[async_trait]
impl RemoteSession for FixtureSession {
    fn user_name(&self) -> &str {
        &self.user_name
    }

    async fn find_by_uuid(
        &self,
        uuid: &str,
        _timeout: Duration,
    ) -> Result<Option<ManagedRef>, RemoteError> {
        self.backend.simulate_latency().await;
        Ok(self.backend.fixture.find_vm(uuid).map(ManagedObject::reference))
    }

    async fn fetch_properties(
        &self,
        reference: &ManagedRef,
        names: &[String],
        _timeout: Duration,
    ) -> Result<Properties, RemoteError> {
        self.backend.simulate_latency().await;
        let object = self
            .backend
            .fixture
            .find_object(reference)
            .ok_or_else(|| RemoteError::api(format!("managed object {} not found", reference)))?;

        Ok(object
            .properties
            .iter()
            .filter(|(name, _)| names.is_empty() || names.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    async fn logout(&self, _timeout: Duration) -> Result<(), RemoteError> {
        self.backend.simulate_latency().await;
        debug!("Fixture session of {} closed", self.user_name);
        Ok(())
    }
}
