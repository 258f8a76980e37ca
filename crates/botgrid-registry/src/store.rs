//! BotRegistry: in-memory bot records keyed by bot id.
//!
//! The lock only guards map access. It is never held across cluster or
//! build calls, so two operations on the same bot id can still interleave
//! at the orchestration level; callers serialize per bot id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use botgrid_core::DeployableBot;

use crate::error::{RegistryError, RegistryResult};
use crate::types::{BotRecord, epoch_secs};

/// Thread-safe, cloneable handle to the bot registry.
#[derive(Clone, Default)]
pub struct BotRegistry {
    bots: Arc<RwLock<HashMap<String, BotRecord>>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Overwriting an existing id is allowed; the previous
    /// record is returned.
    pub async fn add(&self, bot_id: &str, record: BotRecord) -> Option<BotRecord> {
        let previous = self.bots.write().await.insert(bot_id.to_string(), record);
        debug!(%bot_id, replaced = previous.is_some(), "bot record stored");
        previous
    }

    /// Remove a record once its pod is gone.
    pub async fn remove(&self, bot_id: &str) -> RegistryResult<BotRecord> {
        let removed = self.bots.write().await.remove(bot_id);
        debug!(%bot_id, existed = removed.is_some(), "bot record removed");
        removed.ok_or_else(|| RegistryError::NotFound(bot_id.to_string()))
    }

    pub async fn get(&self, bot_id: &str) -> Option<BotRecord> {
        self.bots.read().await.get(bot_id).cloned()
    }

    pub async fn contains(&self, bot_id: &str) -> bool {
        self.bots.read().await.contains_key(bot_id)
    }

    /// All records, in no particular order.
    pub async fn list(&self) -> Vec<BotRecord> {
        self.bots.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.bots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bots.read().await.is_empty()
    }

    /// Swap in a redeployed configuration, image and namespace in one step.
    ///
    /// Logs from the previous deployment are discarded.
    pub async fn update(
        &self,
        bot_id: &str,
        bot: DeployableBot,
        namespace: String,
    ) -> RegistryResult<()> {
        let mut bots = self.bots.write().await;
        let record = bots
            .get_mut(bot_id)
            .ok_or_else(|| RegistryError::NotFound(bot_id.to_string()))?;
        let (config, image) = bot.into_parts();
        record.config = config;
        record.image = image;
        record.namespace = namespace;
        record.logs.clear();
        record.deployed_at = epoch_secs();
        debug!(%bot_id, namespace = %record.namespace, "bot record updated");
        Ok(())
    }

    /// Store the most recently retrieved logs.
    pub async fn record_logs(&self, bot_id: &str, logs: String) -> RegistryResult<()> {
        let mut bots = self.bots.write().await;
        let record = bots
            .get_mut(bot_id)
            .ok_or_else(|| RegistryError::NotFound(bot_id.to_string()))?;
        record.logs = logs;
        Ok(())
    }
}
