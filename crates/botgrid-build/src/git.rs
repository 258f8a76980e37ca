//! Source fetching through the git CLI.
//!
//! Each repository lives at `{repo_dir}/{host}/{path...}`, the URL's host
//! and every path segment with `.git` dropped from the last one; local
//! paths go under `{repo_dir}/local/`. Two URLs share a checkout only if
//! they name the same repository.
//!
//! A missing checkout is cloned. An existing one has its `origin`
//! re-pointed at the authenticated URL, is fetched and is hard-reset to
//! the remote's default branch, so force-pushes and local drift are
//! overwritten. The token travels as URL userinfo and is scrubbed from any
//! git output before it is logged or returned.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use botgrid_core::config::SourceConfig;

use crate::SourceFetcher;
use crate::error::{FetchError, FetchResult};

#[derive(Debug, Clone)]
pub struct GitFetcher {
    git_binary: PathBuf,
    repo_dir: PathBuf,
}

impl GitFetcher {
    pub fn new(git_binary: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_binary: git_binary.into(),
            repo_dir: repo_dir.into(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.git_binary, &config.repo_dir)
    }

    /// Local checkout path for `repository_url`.
    pub fn checkout_dir(&self, repository_url: &str) -> FetchResult<PathBuf> {
        Ok(self.repo_dir.join(checkout_path(repository_url)?))
    }

    async fn git(
        &self,
        operation: &'static str,
        url: &str,
        args: &[&str],
        cwd: Option<&Path>,
        token: Option<&SecretString>,
    ) -> FetchResult<()> {
        let mut command = Command::new(&self.git_binary);
        command.args(args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|e| FetchError::Git {
            operation,
            url: url.to_string(),
            message: format!("cannot run {}: {e}", self.git_binary.display()),
        })?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(FetchError::Git {
            operation,
            url: url.to_string(),
            message: scrub(stderr.trim(), token),
        })
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(
        &self,
        repository_url: &str,
        token: Option<&SecretString>,
    ) -> FetchResult<Option<PathBuf>> {
        let dir = self.checkout_dir(repository_url)?;
        let remote = authenticated_url(repository_url, token)?;
        let dir_arg = dir.to_string_lossy().into_owned();

        if dir.exists() {
            info!(url = %repository_url, dir = %dir.display(), "updating checkout");
            self.git(
                "remote set-url",
                repository_url,
                &["remote", "set-url", "origin", remote.expose_secret()],
                Some(&dir),
                token,
            )
            .await?;
            self.git(
                "fetch",
                repository_url,
                &["fetch", "--prune", "origin"],
                Some(&dir),
                token,
            )
            .await?;
            self.git(
                "remote set-head",
                repository_url,
                &["remote", "set-head", "origin", "--auto"],
                Some(&dir),
                token,
            )
            .await?;
            self.git(
                "reset",
                repository_url,
                &["reset", "--hard", "origin/HEAD"],
                Some(&dir),
                token,
            )
            .await?;
        } else {
            info!(url = %repository_url, dir = %dir.display(), "cloning repository");
            let parent = dir.parent().unwrap_or(&self.repo_dir);
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            self.git(
                "clone",
                repository_url,
                &["clone", remote.expose_secret(), &dir_arg],
                None,
                token,
            )
            .await?;
        }

        if dir.is_dir() {
            debug!(dir = %dir.display(), "checkout ready");
            Ok(Some(dir))
        } else {
            Ok(None)
        }
    }
}

/// Checkout location relative to the repository directory: the URL's host
/// followed by its path segments, without a trailing `.git`.
///
/// scp-style remotes (`git@host:org/repo.git`) use the part before `:` as
/// host. Plain paths and `file://` URLs are placed under `local`.
pub fn checkout_path(repository_url: &str) -> FetchResult<PathBuf> {
    let invalid = |message: &str| FetchError::InvalidUrl {
        url: repository_url.to_string(),
        message: message.to_string(),
    };
    let trimmed = repository_url.trim();

    let (host, path) = match Url::parse(trimmed) {
        Ok(url) if url.scheme() == "file" => ("local".to_string(), url.path().to_string()),
        Ok(url) if url.has_host() => {
            let host = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}_{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => return Err(invalid("no host in url")),
            };
            (host, url.path().to_string())
        }
        _ => match scp_remote(trimmed) {
            Some((host, path)) => (host.to_string(), path.to_string()),
            None => ("local".to_string(), trimmed.to_string()),
        },
    };

    let mut segments: Vec<&str> = path.split(['/', '\\']).filter(|s| !s.is_empty()).collect();
    if let Some(last) = segments.last_mut() {
        let name = *last;
        *last = name.strip_suffix(".git").unwrap_or(name);
    }
    if segments.last().is_none_or(|s| s.is_empty()) {
        return Err(invalid("no repository name in url"));
    }
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(invalid("relative segments are not allowed"));
    }

    let mut relative = PathBuf::from(host);
    relative.extend(segments);
    Ok(relative)
}

/// `(host, path)` of an scp-style `[user@]host:path` remote.
fn scp_remote(url: &str) -> Option<(&str, &str)> {
    let (left, path) = url.split_once(':')?;
    if left.is_empty() || left.contains('/') || path.starts_with("//") {
        return None;
    }
    let host = left.rsplit_once('@').map_or(left, |(_, host)| host);
    Some((host, path))
}

/// `repository_url` with `token` as userinfo, for http(s) remotes.
///
/// Other remotes (ssh, local paths) are returned unchanged.
pub fn authenticated_url(
    repository_url: &str,
    token: Option<&SecretString>,
) -> FetchResult<SecretString> {
    let mut url = match Url::parse(repository_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => return Ok(SecretString::from(repository_url.to_string())),
    };
    if let Some(token) = token {
        url.set_username(token.expose_secret())
            .map_err(|()| FetchError::InvalidUrl {
                url: repository_url.to_string(),
                message: "cannot carry credentials".to_string(),
            })?;
    }
    Ok(SecretString::from(url.to_string()))
}

fn scrub(text: &str, token: Option<&SecretString>) -> String {
    match token.map(|t| t.expose_secret()) {
        Some(secret) if !secret.is_empty() => text.replace(secret, "***"),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn token() -> SecretString {
        SecretString::from("ghp_secret123".to_string())
    }

    #[test]
    fn checkout_path_keeps_host_and_full_path() {
        assert_eq!(
            checkout_path("https://github.com/acme/strategy.git").unwrap(),
            Path::new("github.com/acme/strategy")
        );
        assert_eq!(
            checkout_path("https://github.com/acme/strategy/").unwrap(),
            Path::new("github.com/acme/strategy")
        );
        assert_eq!(
            checkout_path("git@github.com:acme/momentum.git").unwrap(),
            Path::new("github.com/acme/momentum")
        );
        assert_eq!(
            checkout_path("ssh://git@git.example.com:2222/quant/arb.git").unwrap(),
            Path::new("git.example.com_2222/quant/arb")
        );
        assert_eq!(
            checkout_path("/srv/git/meanrev").unwrap(),
            Path::new("local/srv/git/meanrev")
        );
    }

    #[test]
    fn same_name_under_different_owners_gets_separate_checkouts() {
        let alice = checkout_path("https://github.com/alice/strategy.git").unwrap();
        let bob = checkout_path("https://github.com/bob/strategy.git").unwrap();
        let gitlab = checkout_path("https://gitlab.com/alice/strategy.git").unwrap();
        assert_ne!(alice, bob);
        assert_ne!(alice, gitlab);

        let fetcher = GitFetcher::new("git", "/var/botgrid/repos");
        assert_ne!(
            fetcher.checkout_dir("https://github.com/alice/strategy.git").unwrap(),
            fetcher.checkout_dir("https://github.com/bob/strategy.git").unwrap()
        );
    }

    #[test]
    fn checkout_path_rejects_empty_and_traversal() {
        assert!(matches!(
            checkout_path("https://github.com/acme/.git"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(checkout_path("").is_err());
        assert!(checkout_path("git@github.com:../../etc/passwd").is_err());
    }

    #[test]
    fn authenticated_url_injects_token() {
        let url = authenticated_url("https://github.com/acme/strategy.git", Some(&token())).unwrap();
        assert_eq!(
            url.expose_secret(),
            "https://ghp_secret123@github.com/acme/strategy.git"
        );
    }

    #[test]
    fn authenticated_url_without_token_or_http() {
        let url = authenticated_url("https://github.com/acme/strategy.git", None).unwrap();
        assert_eq!(url.expose_secret(), "https://github.com/acme/strategy.git");

        let local = authenticated_url("/srv/git/meanrev", Some(&token())).unwrap();
        assert_eq!(local.expose_secret(), "/srv/git/meanrev");
    }

    #[test]
    fn scrub_removes_token() {
        let message = "fatal: unable to access 'https://ghp_secret123@github.com/acme/x.git/'";
        let scrubbed = scrub(message, Some(&token()));
        assert!(!scrubbed.contains("ghp_secret123"));
        assert!(scrubbed.contains("https://***@github.com"));
    }

    #[tokio::test]
    async fn missing_git_binary_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = GitFetcher::new("/nonexistent/botgrid/git", dir.path().join("repos"));
        let err = fetcher
            .fetch("https://github.com/acme/strategy.git", Some(&token()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Git { operation: "clone", .. }));
        assert!(!err.to_string().contains("ghp_secret123"));
    }

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(["-c", "user.name=botgrid", "-c", "user.email=botgrid@localhost"])
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn origin_repository(path: &Path) {
        std::fs::create_dir_all(path).unwrap();
        git(path, &["init", "-q"]);
        std::fs::write(path.join("Dockerfile"), "FROM python:3.12\n").unwrap();
        git(path, &["add", "."]);
        git(path, &["commit", "-q", "-m", "initial"]);
    }

    #[tokio::test]
    async fn clones_then_updates_local_repository() {
        if !git_available() {
            return;
        }
        let scratch = tempfile::tempdir().unwrap();
        let origin = scratch.path().join("meanrev");
        origin_repository(&origin);

        let repos = scratch.path().join("repos");
        let fetcher = GitFetcher::new("git", &repos);
        let url = origin.to_string_lossy().into_owned();

        let checkout = fetcher.fetch(&url, None).await.unwrap().unwrap();
        assert!(checkout.starts_with(&repos));
        assert!(checkout.ends_with("meanrev"));
        assert!(checkout.join("Dockerfile").is_file());

        std::fs::write(origin.join("bot.py"), "print('tick')\n").unwrap();
        git(&origin, &["add", "."]);
        git(&origin, &["commit", "-q", "-m", "add bot"]);

        let again = fetcher.fetch(&url, None).await.unwrap().unwrap();
        assert_eq!(again, checkout);
        assert!(checkout.join("bot.py").is_file());
    }

    #[tokio::test]
    async fn refetch_converges_after_history_rewrite() {
        if !git_available() {
            return;
        }
        let scratch = tempfile::tempdir().unwrap();
        let origin = scratch.path().join("momentum");
        origin_repository(&origin);

        let fetcher = GitFetcher::new("git", scratch.path().join("repos"));
        let url = origin.to_string_lossy().into_owned();
        let checkout = fetcher.fetch(&url, None).await.unwrap().unwrap();

        std::fs::write(origin.join("Dockerfile"), "FROM python:3.13\n").unwrap();
        git(&origin, &["commit", "-q", "-a", "--amend", "-m", "rewritten"]);
        std::fs::write(checkout.join("scratch.txt"), "local drift\n").unwrap();
        std::fs::write(checkout.join("Dockerfile"), "FROM busybox\n").unwrap();

        fetcher.fetch(&url, None).await.unwrap().unwrap();
        assert_eq!(
            std::fs::read_to_string(checkout.join("Dockerfile")).unwrap(),
            "FROM python:3.13\n"
        );
    }

    #[tokio::test]
    async fn same_repository_name_from_two_owners_stays_separate() {
        if !git_available() {
            return;
        }
        let scratch = tempfile::tempdir().unwrap();
        let alice = scratch.path().join("alice").join("strategy");
        let bob = scratch.path().join("bob").join("strategy");
        origin_repository(&alice);
        origin_repository(&bob);
        std::fs::write(bob.join("bot.py"), "print('bob')\n").unwrap();
        git(&bob, &["add", "."]);
        git(&bob, &["commit", "-q", "-m", "bob's bot"]);

        let fetcher = GitFetcher::new("git", scratch.path().join("repos"));
        let alice_checkout = fetcher
            .fetch(&alice.to_string_lossy(), None)
            .await
            .unwrap()
            .unwrap();
        let bob_checkout = fetcher
            .fetch(&bob.to_string_lossy(), None)
            .await
            .unwrap()
            .unwrap();

        assert_ne!(alice_checkout, bob_checkout);
        assert!(!alice_checkout.join("bot.py").exists());
        assert!(bob_checkout.join("bot.py").is_file());
    }
}
