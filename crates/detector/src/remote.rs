//! Interfaces of the remote platform and the other collaborators the
//! scheduler depends on.
//!
//! Everything behind these traits (SOAP sessions, inventory services, secret
//! stores) lives outside this crate.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    connect::{ConnectionParams, Credentials},
    error::RemoteError,
    node::Node,
    topology::PlatformConfig,
};

/// Property bag returned by the remote platform
pub type Properties = serde_json::Map<String, Value>;

/// Properties loaded for every node's virtual machine
pub const NODE_PROPERTIES: &[&str] =
    &["config.extraConfig", "config.flags", "config.version", "runtime.host"];

/// Reference to an object managed by the remote platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedRef {
    pub kind: String,
    pub value: String,
}

impl ManagedRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: kind.into(), value: value.into() }
    }

    pub fn virtual_machine(value: impl Into<String>) -> Self {
        Self::new("VirtualMachine", value)
    }
}

impl fmt::Display for ManagedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// The remote platform's view of a node
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachine {
    pub reference: ManagedRef,
    pub uuid: String,
    pub properties: Properties,
}

impl VirtualMachine {
    /// Look up a property. Names are tried verbatim first, so both flat keys
    /// such as `config.version` and nested objects resolve.
    pub fn property(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.properties.get(path) {
            return Some(value);
        }

        let mut parts = path.split('.');
        let mut current = self.properties.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }
}

/// An authenticated session against the remote platform
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Fully qualified name of the logged in user
    fn user_name(&self) -> &str;

    /// Find a virtual machine by its BIOS UUID
    async fn find_by_uuid(
        &self,
        uuid: &str,
        timeout: Duration,
    ) -> Result<Option<ManagedRef>, RemoteError>;

    /// Load the named properties of a managed object
    async fn fetch_properties(
        &self,
        reference: &ManagedRef,
        names: &[String],
        timeout: Duration,
    ) -> Result<Properties, RemoteError>;

    async fn logout(&self, timeout: Duration) -> Result<(), RemoteError>;
}

/// Opens sessions against the remote platform
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn login(
        &self,
        params: &ConnectionParams,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>, RemoteError>;
}

/// Lists the cluster nodes that should be checked
#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, RemoteError>;
}

/// Supplies connection parameters and credentials
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn platform_config(&self) -> Result<PlatformConfig, RemoteError>;

    /// Name of the secret the credentials are read from, used in errors
    fn secret_name(&self) -> &str;

    /// Raw key/value content of the credentials secret
    async fn secret(&self) -> Result<HashMap<String, String>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vm(properties: Value) -> VirtualMachine {
        VirtualMachine {
            reference: ManagedRef::virtual_machine("vm-42"),
            uuid: "4237f5a2-8c1e-4bd1-9d2a-1c7e4a3f0b11".to_string(),
            properties: properties.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_property_lookup_flat_and_nested() {
        let vm = vm(json!({
            "config.version": "vmx-15",
            "config": { "flags": { "enableLogging": true } }
        }));

        assert_eq!(vm.property("config.version"), Some(&json!("vmx-15")));
        assert_eq!(vm.property("config.flags.enableLogging"), Some(&json!(true)));
        assert_eq!(vm.property("config.flags.missing"), None);
        assert_eq!(vm.property("runtime.host"), None);
    }

    #[test]
    fn test_managed_ref_display() {
        assert_eq!(ManagedRef::virtual_machine("vm-7").to_string(), "VirtualMachine:vm-7");
    }
}
