use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    context::RunContext,
    error::LookupError,
    remote::{NODE_PROPERTIES, VirtualMachine},
};

const PROVIDER_ID_PREFIX: &str = "vsphere://";

/// A cluster node as reported by the node inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,

    /// Provider assigned ID, `vsphere://<vm uuid>`
    #[serde(default)]
    pub provider_id: String,
}

impl Node {
    pub fn new(name: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self { name: name.into(), provider_id: provider_id.into() }
    }

    /// UUID of the node's virtual machine, normalized for lookup
    pub fn vm_uuid(&self) -> String {
        let id = self.provider_id.strip_prefix(PROVIDER_ID_PREFIX).unwrap_or(&self.provider_id);
        id.trim().to_lowercase()
    }
}

/// Resolve the virtual machine backing `node`: find it by UUID, then load its
/// properties. Each remote call is bounded by the run's per-call timeout.
pub async fn resolve_vm(ctx: &RunContext, node: &Node) -> Result<VirtualMachine, LookupError> {
    let uuid = node.vm_uuid();
    if uuid.is_empty() {
        return Err(LookupError::MissingProviderId { node: node.name.clone() });
    }

    let session = ctx.session();
    let timeout = ctx.call_timeout();

    let reference = ctx
        .call(session.find_by_uuid(&uuid, timeout))
        .await
        .map_err(|source| LookupError::Find { uuid: uuid.clone(), source })?
        .ok_or_else(|| LookupError::NotFound { uuid: uuid.clone() })?;
    debug!("Found VM {} for node {}", reference, node.name);

    let names: Vec<String> = NODE_PROPERTIES.iter().map(|name| name.to_string()).collect();
    let properties = ctx
        .call(session.fetch_properties(&reference, &names, timeout))
        .await
        .map_err(|source| LookupError::Load { node: node.name.clone(), source })?;

    Ok(VirtualMachine { reference, uuid, properties })
}
