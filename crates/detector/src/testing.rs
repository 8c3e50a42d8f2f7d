//! In-crate fakes for unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    connect::{ConnectionParams, Credentials},
    error::RemoteError,
    remote::{ConfigSource, ManagedRef, Properties, RemoteSession, SessionConnector},
    topology::PlatformConfig,
};

#[derive(Default)]
pub struct MockSession {
    vms: HashMap<String, (ManagedRef, Properties)>,
    pub fetches: AtomicUsize,
    pub logouts: AtomicUsize,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vm(mut self, uuid: &str, moref: &str, properties: Value) -> Self {
        self.vms.insert(
            uuid.to_string(),
            (
                ManagedRef::virtual_machine(moref),
                properties.as_object().cloned().unwrap_or_default(),
            ),
        );
        self
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    fn user_name(&self) -> &str {
        "administrator@vsphere.local"
    }

    async fn find_by_uuid(
        &self,
        uuid: &str,
        _timeout: Duration,
    ) -> Result<Option<ManagedRef>, RemoteError> {
        Ok(self.vms.get(uuid).map(|(reference, _)| reference.clone()))
    }

    async fn fetch_properties(
        &self,
        reference: &ManagedRef,
        _names: &[String],
        _timeout: Duration,
    ) -> Result<Properties, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.vms
            .values()
            .find(|(candidate, _)| candidate == reference)
            .map(|(_, properties)| properties.clone())
            .ok_or_else(|| RemoteError::api(format!("{} does not exist", reference)))
    }

    async fn logout(&self, _timeout: Duration) -> Result<(), RemoteError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockConnector {
    pub session: Arc<MockSession>,
    pub reject: bool,
    pub logins: AtomicUsize,
}

impl MockConnector {
    pub fn new(session: Arc<MockSession>) -> Self {
        Self { session, reject: false, logins: AtomicUsize::new(0) }
    }

    pub fn rejecting() -> Self {
        Self { reject: true, ..Self::new(Arc::new(MockSession::new())) }
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn login(
        &self,
        _params: &ConnectionParams,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(RemoteError::api("ServerFaultCode: Cannot complete login"));
        }
        Ok(self.session.clone())
    }
}

pub struct MockConfigSource {
    pub config: PlatformConfig,
    pub secret: HashMap<String, String>,
}

impl MockConfigSource {
    pub fn new(server: &str, username: &str, password: &str) -> Self {
        let mut config = PlatformConfig::default();
        config.workspace.server = server.to_string();

        let mut secret = HashMap::new();
        secret.insert(format!("{}.username", server), username.to_string());
        secret.insert(format!("{}.password", server), password.to_string());
        Self { config, secret }
    }
}

#[async_trait]
impl ConfigSource for MockConfigSource {
    async fn platform_config(&self) -> Result<PlatformConfig, RemoteError> {
        Ok(self.config.clone())
    }

    fn secret_name(&self) -> &str {
        "vsphere-creds"
    }

    async fn secret(&self) -> Result<HashMap<String, String>, RemoteError> {
        Ok(self.secret.clone())
    }
}
