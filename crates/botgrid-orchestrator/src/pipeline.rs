//! Build-deploy pipeline: one deploy attempt from configuration to pod.
//!
//! ```text
//! Fetch → Build → Tag → Namespace → Identity → Secret → Pod → Registered
//! ```
//!
//! Phases only move forward and the first failure ends the attempt. There
//! is no retry and no rollback: cluster objects created before the failing
//! phase are left for the next attempt, whose ensure-steps reuse them.
//! The pod cannot be created before `Tag` because only a [`DeployableBot`]
//! carries an image.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use botgrid_build::{BuildError, BuildRequest, ImageBuilder, SourceFetcher};
use botgrid_cluster::{ProvisionError, Provisioner};
use botgrid_core::{BotConfiguration, DeployableBot, ImageReference};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Phase of a deploy attempt, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeployPhase {
    Fetch,
    Build,
    Tag,
    ProvisionNamespace,
    ProvisionIdentity,
    ProvisionSecret,
    ProvisionPod,
    Registered,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Build => "build",
            Self::Tag => "tag",
            Self::ProvisionNamespace => "provision-namespace",
            Self::ProvisionIdentity => "provision-identity",
            Self::ProvisionSecret => "provision-secret",
            Self::ProvisionPod => "provision-pod",
            Self::Registered => "registered",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful deploy.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub bot: DeployableBot,
    pub namespace: String,
    pub pod: String,
}

/// Progress of one attempt. Logs every transition and the phase a
/// failure happened in.
struct DeployAttempt {
    bot_id: String,
    phase: DeployPhase,
}

impl DeployAttempt {
    fn start(bot_id: &str) -> Self {
        debug!(%bot_id, phase = %DeployPhase::Fetch, "deploy started");
        Self {
            bot_id: bot_id.to_string(),
            phase: DeployPhase::Fetch,
        }
    }

    fn advance(&mut self, next: DeployPhase) {
        debug_assert!(next > self.phase, "deploy phases only move forward");
        debug!(bot_id = %self.bot_id, from = %self.phase, to = %next, "deploy phase");
        self.phase = next;
    }

    fn fail(&self, err: OrchestratorError) -> OrchestratorError {
        error!(bot_id = %self.bot_id, phase = %self.phase, error = %err, "deploy aborted");
        err
    }

    fn provision_failed(&self, source: ProvisionError) -> OrchestratorError {
        self.fail(OrchestratorError::provisioning(&self.bot_id, source))
    }
}

/// `{repository}:{32 hex chars}`, the whole random UUID, so rebuilds of any
/// bot never reuse a tag.
pub fn image_tag(repository: &str) -> String {
    format!("{repository}:{}", Uuid::new_v4().simple())
}

/// Fetcher → builder → provisioner, as one operation.
#[derive(Clone)]
pub struct BuildDeployPipeline {
    fetcher: Arc<dyn SourceFetcher>,
    builder: Arc<dyn ImageBuilder>,
    provisioner: Provisioner,
    image_repository: String,
    source_token: Option<SecretString>,
}

impl BuildDeployPipeline {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        builder: Arc<dyn ImageBuilder>,
        provisioner: Provisioner,
        image_repository: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            builder,
            provisioner,
            image_repository: image_repository.into(),
            source_token: None,
        }
    }

    /// Token handed to the fetcher for private repositories.
    pub fn with_source_token(mut self, token: Option<SecretString>) -> Self {
        self.source_token = token;
        self
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Run one deploy attempt for `config`.
    pub async fn deploy(&self, config: BotConfiguration) -> OrchestratorResult<Deployment> {
        let mut attempt = DeployAttempt::start(config.bot_id());

        let context = self.fetch(&config).await.map_err(|e| attempt.fail(e))?;

        attempt.advance(DeployPhase::Build);
        let image = self.build(&config, context).await.map_err(|e| attempt.fail(e))?;

        attempt.advance(DeployPhase::Tag);
        let bot = DeployableBot::new(config, image);
        let config = bot.config();

        attempt.advance(DeployPhase::ProvisionNamespace);
        let namespace = self
            .provisioner
            .ensure_namespace(config.user_id(), config.bot_id())
            .await
            .map_err(|e| attempt.provision_failed(e))?;

        attempt.advance(DeployPhase::ProvisionIdentity);
        self.provisioner
            .ensure_tenant_identity(&namespace)
            .await
            .map_err(|e| attempt.provision_failed(e))?;

        attempt.advance(DeployPhase::ProvisionSecret);
        self.provisioner
            .ensure_credential_secret(&namespace, config.credentials())
            .await
            .map_err(|e| attempt.provision_failed(e))?;

        attempt.advance(DeployPhase::ProvisionPod);
        let pod = self
            .provisioner
            .create_pod(&namespace, &bot)
            .await
            .map_err(|e| attempt.provision_failed(e))?;

        attempt.advance(DeployPhase::Registered);
        info!(
            bot_id = %config.bot_id(),
            %namespace,
            %pod,
            image = %bot.image(),
            "bot deployed"
        );
        Ok(Deployment {
            bot,
            namespace,
            pod,
        })
    }

    async fn fetch(&self, config: &BotConfiguration) -> OrchestratorResult<PathBuf> {
        let url = config.repository_url();
        let unavailable = |reason: String| OrchestratorError::SourceUnavailable {
            url: url.to_string(),
            reason,
        };
        match self.fetcher.fetch(url, self.source_token.as_ref()).await {
            Ok(Some(path)) => Ok(path),
            Ok(None) => Err(unavailable("fetch produced no checkout".to_string())),
            Err(e) => Err(unavailable(e.to_string())),
        }
    }

    async fn build(
        &self,
        config: &BotConfiguration,
        context: PathBuf,
    ) -> OrchestratorResult<ImageReference> {
        let tag = image_tag(&self.image_repository);
        let request = BuildRequest::new(&context, config.build_arguments().clone(), tag);
        self.builder.build(&request).await.map_err(|source| {
            match &source {
                BuildError::Process { tag, message } => {
                    error!(bot_id = %config.bot_id(), %tag, %message, "image build failed");
                }
                BuildError::Communication(message) => {
                    error!(bot_id = %config.bot_id(), %message, "image builder unreachable");
                }
            }
            OrchestratorError::Build {
                bot_id: config.bot_id().to_string(),
                source,
            }
        })
    }
}
