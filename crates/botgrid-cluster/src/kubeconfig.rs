//! Kubeconfig resolution for clients running outside the cluster.
//!
//! Only what a bearer-token or client-certificate connection needs is read:
//! the context's cluster server and CA, and the user's token or key pair.
//! Inline `*-data` fields are base64; file references are resolved
//! relative to the kubeconfig's directory.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ClusterError, ClusterResult};

/// Connection material for one API server.
pub struct Endpoint {
    pub server: String,
    pub token: Option<SecretString>,
    pub ca_pem: Option<Vec<u8>>,
    /// Client certificate followed by its private key, PEM encoded.
    pub identity_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

impl Endpoint {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            token: None,
            ca_pem: None,
            identity_pem: None,
            insecure_skip_tls_verify: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    current_context: Option<String>,
}

#[derive(Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    certificate_authority: Option<PathBuf>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,
    client_certificate: Option<PathBuf>,
    client_certificate_data: Option<String>,
    client_key: Option<PathBuf>,
    client_key_data: Option<String>,
    exec: Option<serde_yml::Value>,
}

#[derive(Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Deserialize)]
struct ContextEntry {
    cluster: String,
    user: Option<String>,
}

impl Kubeconfig {
    /// `$KUBECONFIG` (first entry), else `~/.kube/config`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(paths) = std::env::var_os("KUBECONFIG") {
            if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
                return Some(first);
            }
        }
        dirs::home_dir().map(|home| home.join(".kube").join("config"))
    }

    pub fn parse(content: &str) -> ClusterResult<Self> {
        serde_yml::from_str(content)
            .map_err(|e| ClusterError::Config(format!("invalid kubeconfig: {e}")))
    }

    pub fn read(path: &Path) -> ClusterResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Config(format!("read kubeconfig {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Resolve `context` (or `current-context`) into an endpoint. Relative
    /// file references are taken from `base_dir`.
    pub fn endpoint(&self, context: Option<&str>, base_dir: &Path) -> ClusterResult<Endpoint> {
        let context_name = context
            .or(self.current_context.as_deref())
            .ok_or_else(|| ClusterError::Config("kubeconfig has no current-context".to_string()))?;
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| missing("context", context_name))?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| missing("cluster", &context.cluster))?;

        let mut endpoint = Endpoint::new(&cluster.server);
        endpoint.insecure_skip_tls_verify = cluster.insecure_skip_tls_verify;
        endpoint.ca_pem = material(
            "certificate-authority",
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
        )?;

        let Some(user_name) = context.user.as_deref() else {
            return Ok(endpoint);
        };
        let user = self
            .users
            .iter()
            .find(|u| u.name == user_name)
            .map(|u| &u.user)
            .ok_or_else(|| missing("user", user_name))?;

        endpoint.token = match (&user.token, &user.token_file) {
            (Some(token), _) => Some(SecretString::from(token.clone())),
            (None, Some(file)) => {
                let path = base_dir.join(file);
                let token = std::fs::read_to_string(&path).map_err(|e| {
                    ClusterError::Config(format!("read token {}: {e}", path.display()))
                })?;
                Some(SecretString::from(token.trim().to_string()))
            }
            (None, None) => None,
        };

        let cert = material(
            "client-certificate",
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            base_dir,
        )?;
        let key = material(
            "client-key",
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
            base_dir,
        )?;
        endpoint.identity_pem = match (cert, key) {
            (Some(mut cert), Some(key)) => {
                if !cert.ends_with(b"\n") {
                    cert.push(b'\n');
                }
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => {
                return Err(ClusterError::Config(format!(
                    "user {user_name} needs both a client certificate and a client key"
                )));
            }
        };

        if user.exec.is_some() && endpoint.token.is_none() && endpoint.identity_pem.is_none() {
            warn!(user = %user_name, "exec credential plugins are not supported, connecting without credentials");
        }
        Ok(endpoint)
    }
}

fn missing(what: &str, name: &str) -> ClusterError {
    ClusterError::Config(format!("kubeconfig {what} {name:?} not found"))
}

/// Inline base64 data wins over a file reference.
fn material(
    field: &str,
    data: Option<&str>,
    file: Option<&Path>,
    base_dir: &Path,
) -> ClusterResult<Option<Vec<u8>>> {
    if let Some(data) = data {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| ClusterError::Config(format!("{field}-data is not base64: {e}")))?;
        return Ok(Some(bytes));
    }
    file.map(|file| {
        let path = base_dir.join(file);
        std::fs::read(&path)
            .map_err(|e| ClusterError::Config(format!("read {field} {}: {e}", path.display())))
    })
    .transpose()
}
