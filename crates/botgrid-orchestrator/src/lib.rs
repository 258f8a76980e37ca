//! botgrid-orchestrator: turns bot configurations into running, isolated bots.
//!
//! # Architecture
//!
//! ```text
//! BotManager
//!   ├── BuildDeployPipeline
//!   │     ├── SourceFetcher   (clone / fetch)
//!   │     ├── ImageBuilder    (docker build, unique tag)
//!   │     └── Provisioner     (namespace → identity → secret → pod)
//!   └── BotRegistry           (bot id → record, written only on success)
//! ```

pub mod error;
pub mod manager;
pub mod pipeline;

pub use error::{OrchestratorError, OrchestratorResult};
pub use manager::BotManager;
pub use pipeline::{BuildDeployPipeline, DeployPhase, Deployment, image_tag};
