//! botgrid.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::credentials::{ResourceProfile, SecretSource};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub resources: ResourcesConfig,
    pub cluster: ClusterConfig,
    pub build: BuildConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub cpu_limit: String,
    pub memory_limit: String,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            cpu_limit: ResourceProfile::DEFAULT_CPU.to_string(),
            memory_limit: ResourceProfile::DEFAULT_MEMORY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Pull secret referenced by every bot pod.
    pub image_pull_secret: String,
    /// API server URL. When absent: in-cluster discovery inside a pod,
    /// otherwise the kubeconfig.
    pub api_server: Option<String>,
    pub token_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    /// Kubeconfig path. Defaults to `$KUBECONFIG`, then `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context. Defaults to `current-context`.
    pub context: Option<String>,
    /// How long a deleted pod may stay terminating before teardown fails.
    pub pod_deletion_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            image_pull_secret: "registry-credentials".to_string(),
            api_server: None,
            token_file: None,
            ca_file: None,
            kubeconfig: None,
            context: None,
            pod_deletion_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Repository part of generated image tags (`{image_repository}:{id}`).
    pub image_repository: String,
    pub docker_binary: String,
    /// Push images after building (needed when the cluster cannot see the
    /// local image store).
    pub push: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image_repository: "bot".to_string(),
            docker_binary: "docker".to_string(),
            push: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Where repositories are cloned.
    pub repo_dir: PathBuf,
    pub git_binary: String,
    /// GitHub organization and team whose repositories can be listed.
    pub organization: Option<String>,
    pub team: Option<String>,
    pub github_api: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("./repos"),
            git_binary: "git".to_string(),
            organization: None,
            team: None,
            github_api: "https://api.github.com".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OrchestratorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `CPU_LIMIT` / `MEMORY_LIMIT` overrides from `source`.
    pub fn with_overrides(mut self, source: &dyn SecretSource) -> Self {
        if let Some(cpu) = source.get("CPU_LIMIT") {
            tracing::debug!(%cpu, "cpu limit overridden from environment");
            self.resources.cpu_limit = cpu;
        }
        if let Some(memory) = source.get("MEMORY_LIMIT") {
            tracing::debug!(%memory, "memory limit overridden from environment");
            self.resources.memory_limit = memory;
        }
        self
    }

    /// Resource profile applied to every broker except interactive-brokers.
    pub fn default_resources(&self) -> ResourceProfile {
        ResourceProfile::new(&self.resources.cpu_limit, &self.resources.memory_limit)
    }
}
