//! botgrid-build: turns a repository URL into a runnable image.
//!
//! # Architecture
//!
//! ```text
//! SourceFetcher ──► build context ──► ImageBuilder ──► ImageReference
//!   └── GitFetcher (git CLI)              └── DockerCliBuilder (docker CLI)
//! ```
//!
//! [`GitHubTeamClient`] lists the repositories a GitHub team can reach,
//! for callers that deploy a whole team's bots.

pub mod docker;
pub mod error;
pub mod git;
pub mod github;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::SecretString;

use botgrid_core::ImageReference;

pub use docker::DockerCliBuilder;
pub use error::{BuildError, BuildResult, FetchError, FetchResult};
pub use git::GitFetcher;
pub use github::GitHubTeamClient;

/// Everything an image build needs.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context: PathBuf,
    pub build_args: BTreeMap<String, String>,
    /// Full `repository:tag` reference to produce.
    pub tag: String,
}

impl BuildRequest {
    pub fn new(context: &Path, build_args: BTreeMap<String, String>, tag: impl Into<String>) -> Self {
        Self {
            context: context.to_path_buf(),
            build_args,
            tag: tag.into(),
        }
    }
}

/// Builds a container image from a local build context.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> BuildResult<ImageReference>;
}

/// Makes a repository available locally.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Clone or update `repository_url` and return the local checkout.
    ///
    /// Repeated fetches converge on the remote's latest state. `Ok(None)`
    /// means the fetch ran but produced no usable checkout.
    async fn fetch(
        &self,
        repository_url: &str,
        token: Option<&SecretString>,
    ) -> FetchResult<Option<PathBuf>>;
}
