//! Orchestrator error types.

use thiserror::Error;

use botgrid_build::BuildError;
use botgrid_cluster::ProvisionError;
use botgrid_core::ConfigError;
use botgrid_registry::RegistryError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The bot configuration could not be built (unsupported broker,
    /// invalid identifiers).
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("source unavailable for {url}: {reason}")]
    SourceUnavailable { url: String, reason: String },

    #[error("build failed for bot {bot_id}: {source}")]
    Build {
        bot_id: String,
        #[source]
        source: BuildError,
    },

    #[error("provisioning failed for bot {bot_id}: {source}")]
    Provisioning {
        bot_id: String,
        #[source]
        source: ProvisionError,
    },

    #[error("bot {0} not found")]
    NotFound(String),

    #[error("pod {pod} of bot {bot_id} not found in namespace {namespace}")]
    PodNotFound {
        bot_id: String,
        namespace: String,
        pod: String,
    },

    #[error("configuration is for bot {found}, not {expected}")]
    BotIdMismatch { expected: String, found: String },
}

impl OrchestratorError {
    /// True for a missing bot or a missing pod.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::PodNotFound { .. })
    }

    pub(crate) fn provisioning(bot_id: &str, source: ProvisionError) -> Self {
        match source {
            ProvisionError::PodNotFound { namespace, pod } => Self::PodNotFound {
                bot_id: bot_id.to_string(),
                namespace,
                pod,
            },
            source => Self::Provisioning {
                bot_id: bot_id.to_string(),
                source,
            },
        }
    }
}

impl From<RegistryError> for OrchestratorError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(bot_id) => Self::NotFound(bot_id),
        }
    }
}
