//! Connecting to the remote platform before a run.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    USER_AGENT,
    context::timed,
    error::{ConnectError, CredentialError},
    metrics::MetricsRecorder,
    remote::{ConfigSource, RemoteSession, SessionConnector},
    topology::PlatformConfig,
};

pub const USERNAME_WITH_NEW_LINE: &str = "UsernameWithNewLine";
pub const PASSWORD_WITH_NEW_LINE: &str = "PasswordWithNewLine";
pub const INVALID_CREDENTIALS: &str = "InvalidCredentials";

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub server: String,
    pub insecure: bool,
    pub user_agent: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Read the credentials of `server` from a secret holding
    /// `<server>.username` and `<server>.password` keys
    pub fn from_secret(
        secret_name: &str,
        data: &HashMap<String, String>,
        server: &str,
    ) -> Result<Self, CredentialError> {
        let lookup = |suffix: &str| {
            let key = format!("{}.{}", server, suffix);
            data.get(&key).cloned().ok_or_else(|| CredentialError::MissingKey {
                secret: secret_name.to_string(),
                key,
            })
        };

        Ok(Self { username: lookup("username")?, password: lookup("password")? })
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An established session together with the configuration it was opened with
pub struct Connection {
    pub session: Arc<dyn RemoteSession>,
    pub config: PlatformConfig,
}

/// Read the configuration and credentials, then log in.
///
/// Login failures are classified so that credentials broken by a trailing
/// new line are reported as such, and the matching sync error gauges are set.
pub async fn connect(
    source: &dyn ConfigSource,
    connector: &dyn SessionConnector,
    metrics: &dyn MetricsRecorder,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<Connection, ConnectError> {
    let config = source.platform_config().await.map_err(ConnectError::Config)?;
    let server = config.workspace.server.clone();

    let secret = source.secret().await.map_err(|source_err| ConnectError::Secret {
        name: source.secret_name().to_string(),
        source: source_err,
    })?;
    let credentials = Credentials::from_secret(source.secret_name(), &secret, &server)?;

    let params = ConnectionParams {
        server: server.clone(),
        insecure: config.global.insecure_flag,
        user_agent: USER_AGENT.to_string(),
    };
    debug!("Connecting to {} as {}, insecure {}", server, credentials.username, params.insecure);

    let session = match timed(cancel, timeout, connector.login(&params, &credentials, timeout)).await
    {
        Ok(session) => session,
        Err(source) => {
            let username_new_line = credentials.username.contains('\n');
            metrics.record_sync_error(USERNAME_WITH_NEW_LINE, username_new_line);
            if username_new_line {
                return Err(ConnectError::UsernameWithNewLine { server });
            }

            let password_new_line = credentials.password.contains('\n');
            metrics.record_sync_error(PASSWORD_WITH_NEW_LINE, password_new_line);
            if password_new_line {
                return Err(ConnectError::PasswordWithNewLine { server });
            }

            metrics.record_sync_error(INVALID_CREDENTIALS, true);
            return Err(ConnectError::Login { server, source });
        }
    };
    metrics.record_sync_error(INVALID_CREDENTIALS, false);

    if !credentials.username.contains('@') {
        warn!(
            "vCenter username for {} is without domain, please consider using username with full \
             domain name",
            server
        );
    }
    info!("Connected to {} as {}", server, credentials.username);

    Ok(Connection { session, config })
}
