use std::time::Duration;

use thiserror::Error;

/// Failure reported by a remote collaborator call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Api(String),
}

impl RemoteError {
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api(message.into())
    }
}

/// Resolution of a node's virtual machine failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("node {node} has no provider ID")]
    MissingProviderId { node: String },

    #[error("failed to find VM by UUID {uuid}: not found")]
    NotFound { uuid: String },

    #[error("failed to find VM by UUID {uuid}: {source}")]
    Find { uuid: String, source: RemoteError },

    #[error("failed to load VM {node}: {source}")]
    Load { node: String, source: RemoteError },
}

/// Failure of a single probe.
///
/// Cloneable so that one cached outcome can be handed to every caller
/// waiting on the same cache key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl CheckError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether the probe stopped because the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Cancelled))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("error parsing secret {secret:?}: key {key:?} not found")]
    MissingKey { secret: String, key: String },
}

/// Connecting to the remote platform failed before any check could run
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to get cluster config: {0}")]
    Config(RemoteError),

    #[error("failed to read credentials secret {name:?}: {source}")]
    Secret { name: String, source: RemoteError },

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("failed to connect to {server}: username in credentials contains new line")]
    UsernameWithNewLine { server: String },

    #[error("failed to connect to {server}: password in credentials contains new line")]
    PasswordWithNewLine { server: String },

    #[error("failed to connect to {server}: {source}")]
    Login { server: String, source: RemoteError },
}

/// Pool level failure, never caused by a single unit
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// Fatal error that aborted a run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Connection(#[from] ConnectError),

    #[error("failed to list nodes: {0}")]
    Inventory(RemoteError),

    #[error("error waiting for checks to finish: {0}")]
    PoolWait(#[from] PoolError),

    #[error("run cancelled while submitting checks")]
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("check {0:?} is already registered")]
    DuplicateName(String),
}
