//! Registry entry type.

use std::time::{SystemTime, UNIX_EPOCH};

use botgrid_core::{BotConfiguration, DeployableBot, ImageReference};

/// A deployed bot as known to the registry.
#[derive(Debug, Clone)]
pub struct BotRecord {
    pub config: BotConfiguration,
    /// Image the running pod was created from.
    pub image: ImageReference,
    /// Tenant namespace the pod runs in. Fixed per deployment.
    pub namespace: String,
    /// Log output from the most recent retrieval.
    pub logs: String,
    /// Unix timestamp (seconds) of the deployment.
    pub deployed_at: u64,
}

impl BotRecord {
    /// Record a fresh deployment.
    pub fn new(bot: DeployableBot, namespace: String) -> Self {
        let (config, image) = bot.into_parts();
        Self {
            config,
            image,
            namespace,
            logs: String::new(),
            deployed_at: epoch_secs(),
        }
    }

    pub fn bot_id(&self) -> &str {
        self.config.bot_id()
    }

    pub fn pod_name(&self) -> String {
        self.config.pod_name()
    }
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
