//! botgrid-core: shared types for the bot lifecycle orchestrator.
//!
//! - [`BrokerKind`]: the closed set of supported brokers
//! - [`credentials`]: the credential assembler (broker → secrets, resources, build args)
//! - [`BotConfiguration`]: the immutable per-bot specification
//! - [`OrchestratorConfig`]: `botgrid.toml` parsing plus environment overrides

pub mod bot;
pub mod broker;
pub mod config;
pub mod credentials;
pub mod error;

pub use bot::{BotConfiguration, DeployableBot, ImageReference};
pub use broker::BrokerKind;
pub use config::OrchestratorConfig;
pub use credentials::{
    Assembly, CredentialMap, CredentialValue, EnvSource, ResourceProfile, SecretSource,
};
pub use error::{ConfigError, ConfigResult};
