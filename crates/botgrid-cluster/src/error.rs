//! Cluster error types.

use thiserror::Error;

/// Result type alias for raw control-plane calls.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Result type alias for provisioner operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors reported by a control-plane backend.
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    /// The object already exists (HTTP 409).
    #[error("{kind} {name} already exists")]
    Conflict { kind: String, name: String },

    /// The object does not exist (HTTP 404).
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Any other rejection by the API server.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("client configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors surfaced by the provisioner.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A provisioning step failed for a reason other than "already exists".
    #[error("{operation} failed in namespace {namespace}: {source}")]
    Failure {
        operation: &'static str,
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("pod {pod} not found in namespace {namespace}")]
    PodNotFound { namespace: String, pod: String },

    /// A deleted pod was still terminating after every existence check.
    #[error("pod {pod} in namespace {namespace} still terminating after {checks} checks")]
    TerminationTimeout {
        namespace: String,
        pod: String,
        checks: u32,
    },
}
