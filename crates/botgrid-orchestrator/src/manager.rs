//! BotManager: the lifecycle entry point.
//!
//! Deploys go through the [`BuildDeployPipeline`]; teardown and log
//! retrieval go straight to the [`Provisioner`], keyed by bot id. The
//! registry is only written after the cluster side has succeeded, so a
//! failed operation leaves it unchanged.
//!
//! Operations on the same bot id are not serialized here. Callers that
//! may issue concurrent calls for one bot must hold their own per-bot lock.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, info, warn};

use botgrid_build::{DockerCliBuilder, GitFetcher, GitHubTeamClient, ImageBuilder, SourceFetcher};
use botgrid_cluster::{ControlPlane, Provisioner};
use botgrid_core::{BotConfiguration, OrchestratorConfig, ResourceProfile, SecretSource};
use botgrid_registry::{BotRecord, BotRegistry};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::pipeline::BuildDeployPipeline;

/// Environment key holding the token for private source repositories.
pub const SOURCE_TOKEN_KEY: &str = "GITHUB_TOKEN";

pub struct BotManager {
    pipeline: BuildDeployPipeline,
    registry: BotRegistry,
    secrets: Arc<dyn SecretSource>,
    default_resources: ResourceProfile,
    team: Option<GitHubTeamClient>,
}

impl BotManager {
    pub fn new(
        pipeline: BuildDeployPipeline,
        registry: BotRegistry,
        secrets: Arc<dyn SecretSource>,
        default_resources: ResourceProfile,
    ) -> Self {
        Self {
            pipeline,
            registry,
            secrets,
            default_resources,
            team: None,
        }
    }

    /// Source of [`BotManager::team_repositories`].
    pub fn with_team_client(mut self, team: Option<GitHubTeamClient>) -> Self {
        self.team = team;
        self
    }

    /// Wire the git fetcher and docker builder from `config`.
    ///
    /// `CPU_LIMIT`/`MEMORY_LIMIT` from `secrets` override the configured
    /// default resources. `GITHUB_TOKEN` authenticates source fetches and,
    /// with `[source]` organization and team set, team listing.
    pub fn from_config(
        config: &OrchestratorConfig,
        control_plane: Arc<dyn ControlPlane>,
        secrets: Arc<dyn SecretSource>,
    ) -> Self {
        let config = config.clone().with_overrides(secrets.as_ref());
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(GitFetcher::from_config(&config.source));
        let builder: Arc<dyn ImageBuilder> = Arc::new(DockerCliBuilder::from_config(&config.build));
        let provisioner = Provisioner::new(control_plane, &config.cluster.image_pull_secret)
            .with_termination_wait(
                u32::try_from(config.cluster.pod_deletion_timeout_secs).unwrap_or(u32::MAX),
                Duration::from_secs(1),
            );
        let token = secrets.get(SOURCE_TOKEN_KEY).map(SecretString::from);
        let team = GitHubTeamClient::from_config(&config.source, token.clone());

        let pipeline = BuildDeployPipeline::new(
            fetcher,
            builder,
            provisioner,
            &config.build.image_repository,
        )
        .with_source_token(token);

        Self::new(
            pipeline,
            BotRegistry::new(),
            secrets,
            config.default_resources(),
        )
        .with_team_client(team)
    }

    pub fn registry(&self) -> &BotRegistry {
        &self.registry
    }

    /// Build a bot configuration with broker secrets from this manager's
    /// secret source.
    pub fn bot_configuration(
        &self,
        user_id: &str,
        bot_id: &str,
        repository_url: &str,
        broker: &str,
    ) -> OrchestratorResult<BotConfiguration> {
        Ok(BotConfiguration::new(
            user_id,
            bot_id,
            repository_url,
            broker,
            self.secrets.as_ref(),
            &self.default_resources,
        )?)
    }

    /// Deploy a bot and register it. An existing record with the same id
    /// is replaced.
    pub async fn add_bot(&self, config: BotConfiguration) -> OrchestratorResult<BotRecord> {
        let bot_id = config.bot_id().to_string();
        let deployment = self.pipeline.deploy(config).await?;
        let record = BotRecord::new(deployment.bot, deployment.namespace);
        self.registry.add(&bot_id, record.clone()).await;
        info!(%bot_id, namespace = %record.namespace, "bot registered");
        Ok(record)
    }

    /// Delete the bot's pod, then forget the bot.
    pub async fn remove_bot(&self, bot_id: &str) -> OrchestratorResult<BotRecord> {
        let record = self.lookup(bot_id).await?;
        self.pipeline
            .provisioner()
            .delete_pod(&record.namespace, &record.pod_name())
            .await
            .map_err(|e| OrchestratorError::provisioning(bot_id, e))?;
        let removed = self.registry.remove(bot_id).await?;
        info!(%bot_id, namespace = %removed.namespace, "bot removed");
        Ok(removed)
    }

    pub async fn get_bot(&self, bot_id: &str) -> Option<BotRecord> {
        self.registry.get(bot_id).await
    }

    pub async fn list_bots(&self) -> Vec<BotRecord> {
        self.registry.list().await
    }

    /// Fetch the pod's current logs and keep them on the record.
    pub async fn get_bot_logs(&self, bot_id: &str) -> OrchestratorResult<String> {
        let record = self.lookup(bot_id).await?;
        let logs = self
            .pipeline
            .provisioner()
            .read_pod_logs(&record.namespace, &record.pod_name())
            .await
            .map_err(|e| OrchestratorError::provisioning(bot_id, e))?;
        self.registry.record_logs(bot_id, logs.clone()).await?;
        Ok(logs)
    }

    /// Replace a running bot with a new configuration.
    ///
    /// The old pod is deleted first, then the new configuration is deployed.
    /// The record is only rewritten once the redeploy succeeds; on failure
    /// it keeps the previous configuration and namespace even though the old
    /// pod is gone.
    pub async fn update_bot_config(
        &self,
        bot_id: &str,
        config: BotConfiguration,
    ) -> OrchestratorResult<BotRecord> {
        if config.bot_id() != bot_id {
            return Err(OrchestratorError::BotIdMismatch {
                expected: bot_id.to_string(),
                found: config.bot_id().to_string(),
            });
        }
        let record = self.lookup(bot_id).await?;

        self.pipeline
            .provisioner()
            .delete_pod(&record.namespace, &record.pod_name())
            .await
            .map_err(|e| OrchestratorError::provisioning(bot_id, e))?;

        let deployment = self.pipeline.deploy(config).await.inspect_err(|e| {
            warn!(%bot_id, error = %e, "redeploy failed, keeping previous record");
        })?;
        self.registry
            .update(bot_id, deployment.bot, deployment.namespace)
            .await?;

        let updated = self.lookup(bot_id).await?;
        info!(%bot_id, namespace = %updated.namespace, image = %updated.image, "bot updated");
        Ok(updated)
    }

    pub fn team_client(&self) -> Option<&GitHubTeamClient> {
        self.team.as_ref()
    }

    /// Clone URLs of the configured team's repositories, for deploying a
    /// team's bots in bulk. Empty when no team is configured.
    pub async fn team_repositories(&self) -> Vec<String> {
        match &self.team {
            Some(team) => team.list_repositories().await,
            None => {
                debug!("no team configured");
                Vec::new()
            }
        }
    }

    async fn lookup(&self, bot_id: &str) -> OrchestratorResult<BotRecord> {
        match self.registry.get(bot_id).await {
            Some(record) => Ok(record),
            None => {
                warn!(%bot_id, "bot not found");
                Err(OrchestratorError::NotFound(bot_id.to_string()))
            }
        }
    }
}
