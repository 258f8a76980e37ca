//! Image builds through the docker CLI.
//!
//! Pings the daemon with `docker version`, runs
//! `docker build --rm -t <tag> [--build-arg K=V]... <context>`, then
//! `docker push <tag>` when pushing is enabled. A binary that cannot be
//! started, or a daemon that does not answer the ping, is a communication
//! failure. A failed build is a build-process failure unless its output
//! shows the daemon dropped away and no build step failed.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use botgrid_core::ImageReference;
use botgrid_core::config::BuildConfig;

use crate::error::{BuildError, BuildResult};
use crate::{BuildRequest, ImageBuilder};

/// stderr fragments of a build step that ran and failed. These win over
/// [`DAEMON_UNREACHABLE`], which a failing `RUN` step can print too.
const BUILD_STEP_FAILED: &[&str] = &[
    "failed to solve",
    "did not complete successfully",
    "returned a non-zero code",
    "executor failed running",
];

/// stderr fragments docker prints when the daemon is unreachable.
const DAEMON_UNREACHABLE: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "error during connect",
    "connection refused",
];

/// Tail of stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct DockerCliBuilder {
    binary: PathBuf,
    push: bool,
}

impl DockerCliBuilder {
    pub fn new(binary: impl Into<PathBuf>, push: bool) -> Self {
        Self {
            binary: binary.into(),
            push,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(&config.docker_binary, config.push)
    }

    async fn output(&self, args: &[&str]) -> BuildResult<Output> {
        debug!(binary = %self.binary.display(), ?args, "running docker");
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                BuildError::Communication(format!(
                    "cannot run {}: {e}",
                    self.binary.display()
                ))
            })
    }

    /// Fails with a communication error unless the daemon answers.
    async fn ping(&self) -> BuildResult<()> {
        let output = self
            .output(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::Communication(stderr_tail(&stderr)));
        }
        let version = String::from_utf8_lossy(&output.stdout);
        debug!(server = %version.trim(), "docker daemon reachable");
        Ok(())
    }

    async fn run(&self, args: &[&str], tag: &str) -> BuildResult<()> {
        let output = self.output(args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if daemon_unreachable(&stderr) {
            return Err(BuildError::Communication(stderr_tail(&stderr)));
        }
        Err(BuildError::Process {
            tag: tag.to_string(),
            message: format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr_tail(&stderr)
            ),
        })
    }
}

#[async_trait]
impl ImageBuilder for DockerCliBuilder {
    async fn build(&self, request: &BuildRequest) -> BuildResult<ImageReference> {
        self.ping().await?;

        info!(tag = %request.tag, context = %request.context.display(), "building image");
        let args = build_args(request);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args, &request.tag).await?;

        if self.push {
            info!(tag = %request.tag, "pushing image");
            self.run(&["push", request.tag.as_str()], &request.tag).await?;
        }
        Ok(ImageReference::new(&request.tag))
    }
}

/// Argument vector for `docker build`.
fn build_args(request: &BuildRequest) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "--rm".to_string(),
        "-t".to_string(),
        request.tag.clone(),
    ];
    for (key, value) in &request.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(request.context.to_string_lossy().into_owned());
    args
}

fn daemon_unreachable(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    if BUILD_STEP_FAILED.iter().any(|marker| lower.contains(marker)) {
        return false;
    }
    DAEMON_UNREACHABLE.iter().any(|marker| lower.contains(marker))
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
