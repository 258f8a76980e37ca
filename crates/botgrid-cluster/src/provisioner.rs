//! Provisioner: tenant boundary setup and pod lifecycle.
//!
//! Wraps a [`ControlPlane`] with ensure-semantics: every `ensure_*` call
//! treats "already exists" as success and logs it at `warn`. Any other
//! control-plane failure is fatal and is returned with the operation and
//! namespace attached. Nothing is rolled back; a failed deploy may leave
//! the namespace, identity and secret in place for the next attempt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use botgrid_core::bot::namespace_name;
use botgrid_core::{CredentialMap, DeployableBot};

use crate::control_plane::ControlPlane;
use crate::error::{ClusterError, ClusterResult, ProvisionError, ProvisionResult};
use crate::resources::{
    CONTAINER_NAME, Container, EnvVar, FS_GROUP, LocalObjectReference, Namespace, ObjectMeta, Pod,
    PodSecurityContext, PodSpec, RUN_AS_GROUP, RUN_AS_USER, ResourceRequirements, Role,
    RoleBinding, SERVICE_ACCOUNT_NAME, Secret, SecurityContext, ServiceAccount,
};

/// Existence checks after a pod delete, one per interval.
const DEFAULT_TERMINATION_CHECKS: u32 = 60;
const DEFAULT_TERMINATION_INTERVAL: Duration = Duration::from_secs(1);

/// Provisions tenant boundaries and bot pods.
#[derive(Clone)]
pub struct Provisioner {
    control_plane: Arc<dyn ControlPlane>,
    image_pull_secret: String,
    termination_checks: u32,
    termination_interval: Duration,
}

impl Provisioner {
    pub fn new(control_plane: Arc<dyn ControlPlane>, image_pull_secret: impl Into<String>) -> Self {
        Self {
            control_plane,
            image_pull_secret: image_pull_secret.into(),
            termination_checks: DEFAULT_TERMINATION_CHECKS,
            termination_interval: DEFAULT_TERMINATION_INTERVAL,
        }
    }

    /// How many times, and how often, [`Provisioner::delete_pod`] checks
    /// that a deleted pod is gone.
    pub fn with_termination_wait(mut self, checks: u32, interval: Duration) -> Self {
        self.termination_checks = checks.max(1);
        self.termination_interval = interval;
        self
    }

    /// Create the tenant namespace `bot-{user_id}-{bot_id}` unless it exists.
    pub async fn ensure_namespace(&self, user_id: &str, bot_id: &str) -> ProvisionResult<String> {
        let namespace = namespace_name(user_id, bot_id);
        let result = self
            .control_plane
            .create_namespace(&Namespace::new(&namespace))
            .await;
        tolerate_conflict("create namespace", &namespace, "namespace", result)?;
        Ok(namespace)
    }

    /// Create the service account, the empty role and the binding between
    /// them. A failure at any step is fatal; earlier steps stay applied.
    pub async fn ensure_tenant_identity(&self, namespace: &str) -> ProvisionResult<()> {
        let result = self
            .control_plane
            .create_service_account(namespace, &ServiceAccount::new(namespace))
            .await;
        tolerate_conflict("create service account", namespace, "service account", result)?;

        let result = self
            .control_plane
            .create_role(namespace, &Role::least_privilege(namespace))
            .await;
        tolerate_conflict("create role", namespace, "role", result)?;

        let result = self
            .control_plane
            .create_role_binding(namespace, &RoleBinding::tenant(namespace))
            .await;
        tolerate_conflict("create role binding", namespace, "role binding", result)?;

        debug!(%namespace, "tenant identity in place");
        Ok(())
    }

    /// Write the credential secret. Absent values are dropped.
    ///
    /// An existing secret is replaced, so it always holds exactly the keys
    /// the next pod references.
    pub async fn ensure_credential_secret(
        &self,
        namespace: &str,
        credentials: &CredentialMap,
    ) -> ProvisionResult<()> {
        let secret = Secret::opaque(namespace, credentials.expose_string_data());
        let keys = secret.string_data.len();
        match self.control_plane.create_secret(namespace, &secret).await {
            Ok(()) => debug!(%namespace, keys, "credential secret created"),
            Err(e) if e.is_conflict() => {
                warn!(%namespace, "credential secret already exists, replacing it");
                self.control_plane
                    .replace_secret(namespace, &secret)
                    .await
                    .map_err(|e| fatal("replace secret", namespace, e))?;
                debug!(%namespace, keys, "credential secret replaced");
            }
            Err(e) => return Err(fatal("create secret", namespace, e)),
        }
        Ok(())
    }

    /// Submit the bot's pod and return its name. Does not wait for it to run.
    pub async fn create_pod(&self, namespace: &str, bot: &DeployableBot) -> ProvisionResult<String> {
        let pod = self.pod_manifest(namespace, bot);
        let name = pod.metadata.name.clone();
        self.control_plane
            .create_pod(namespace, &pod)
            .await
            .map_err(|e| fatal("create pod", namespace, e))?;
        info!(%namespace, pod = %name, image = %bot.image(), "pod submitted");
        Ok(name)
    }

    /// Build the hardened single-container pod for `bot`.
    pub fn pod_manifest(&self, namespace: &str, bot: &DeployableBot) -> Pod {
        let config = bot.config();
        let resources = config.resources();

        let metadata = ObjectMeta::namespaced(config.pod_name(), namespace)
            .with_label("app", "bot")
            .with_label("bot_id", config.bot_id());

        let limits = BTreeMap::from([
            ("cpu".to_string(), resources.cpu.clone()),
            ("memory".to_string(), resources.memory.clone()),
        ]);

        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: bot.image().as_str().to_string(),
            image_pull_policy: "Always".to_string(),
            resources: ResourceRequirements { limits },
            env: config
                .credentials()
                .present_keys()
                .map(EnvVar::from_secret)
                .collect(),
            security_context: SecurityContext::hardened(),
        };

        let spec = PodSpec {
            service_account_name: SERVICE_ACCOUNT_NAME.to_string(),
            automount_service_account_token: false,
            security_context: PodSecurityContext {
                run_as_non_root: true,
                run_as_user: RUN_AS_USER,
                run_as_group: RUN_AS_GROUP,
                fs_group: FS_GROUP,
            },
            containers: vec![container],
            restart_policy: "Never".to_string(),
            image_pull_secrets: vec![LocalObjectReference {
                name: self.image_pull_secret.clone(),
            }],
        };

        Pod::new(metadata, spec)
    }

    /// Delete a pod and wait until it is gone. A pod that is already gone
    /// counts as deleted.
    pub async fn delete_pod(&self, namespace: &str, pod: &str) -> ProvisionResult<()> {
        match self.control_plane.delete_pod(namespace, pod).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(%namespace, %pod, "pod already gone");
                return Ok(());
            }
            Err(e) => return Err(fatal("delete pod", namespace, e)),
        }
        self.wait_until_gone(namespace, pod).await?;
        info!(%namespace, %pod, "pod deleted");
        Ok(())
    }

    /// Poll until the pod object disappears. Its name stays taken while it
    /// terminates.
    async fn wait_until_gone(&self, namespace: &str, pod: &str) -> ProvisionResult<()> {
        for check in 1..=self.termination_checks {
            let exists = self
                .control_plane
                .pod_exists(namespace, pod)
                .await
                .map_err(|e| fatal("wait for pod deletion", namespace, e))?;
            if !exists {
                return Ok(());
            }
            debug!(%namespace, %pod, check, "pod still terminating");
            if check < self.termination_checks {
                tokio::time::sleep(self.termination_interval).await;
            }
        }
        error!(%namespace, %pod, checks = self.termination_checks, "pod did not terminate");
        Err(ProvisionError::TerminationTimeout {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            checks: self.termination_checks,
        })
    }

    /// Current log output of a pod.
    pub async fn read_pod_logs(&self, namespace: &str, pod: &str) -> ProvisionResult<String> {
        match self.control_plane.read_pod_log(namespace, pod).await {
            Ok(logs) => Ok(logs),
            Err(e) if e.is_not_found() => Err(ProvisionError::PodNotFound {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
            }),
            Err(e) => Err(fatal("read pod logs", namespace, e)),
        }
    }
}

fn tolerate_conflict(
    operation: &'static str,
    namespace: &str,
    what: &str,
    result: ClusterResult<()>,
) -> ProvisionResult<()> {
    match result {
        Ok(()) => {
            debug!(%namespace, "{what} created");
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            warn!(%namespace, "{what} already exists, reusing it");
            Ok(())
        }
        Err(e) => Err(fatal(operation, namespace, e)),
    }
}

fn fatal(operation: &'static str, namespace: &str, source: ClusterError) -> ProvisionError {
    error!(%namespace, %operation, error = %source, "provisioning failed");
    ProvisionError::Failure {
        operation,
        namespace: namespace.to_string(),
        source,
    }
}
