//! Kubernetes REST control plane.
//!
//! Talks to the API server directly over HTTPS with a bearer token or a
//! client certificate. Only the handful of endpoints the provisioner needs
//! are covered.

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info};

use botgrid_core::config::ClusterConfig;

use crate::control_plane::ControlPlane;
use crate::error::{ClusterError, ClusterResult};
use crate::kubeconfig::{Endpoint, Kubeconfig};
use crate::resources::{Namespace, Pod, Role, RoleBinding, Secret, ServiceAccount};

/// Mount point of the pod's own service-account credentials.
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const CORE_API: &str = "/api/v1";
const RBAC_API: &str = "/apis/rbac.authorization.k8s.io/v1";

/// Control plane backed by the Kubernetes HTTP API.
pub struct KubeClient {
    http: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl KubeClient {
    /// Build a client for `api_server`, optionally trusting an extra CA.
    pub fn new(
        api_server: &str,
        token: Option<SecretString>,
        ca_pem: Option<&[u8]>,
    ) -> ClusterResult<Self> {
        let mut endpoint = Endpoint::new(api_server);
        endpoint.token = token;
        endpoint.ca_pem = ca_pem.map(<[u8]>::to_vec);
        Self::connect(endpoint)
    }

    pub fn connect(endpoint: Endpoint) -> ClusterResult<Self> {
        let mut builder = Client::builder();
        if let Some(pem) = &endpoint.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ClusterError::Config(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &endpoint.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| ClusterError::Config(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }
        if endpoint.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url: endpoint.server.trim_end_matches('/').to_string(),
            token: endpoint.token,
        })
    }

    /// Build a client from `[cluster]` config.
    ///
    /// An explicit `api_server` wins. Otherwise the pod's service account
    /// is used when running in a cluster, and the kubeconfig when not.
    pub fn from_config(config: &ClusterConfig) -> ClusterResult<Self> {
        if let Some(api_server) = &config.api_server {
            return Self::from_files(
                api_server,
                config.token_file.as_deref(),
                config.ca_file.as_deref(),
            );
        }
        if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
            return Self::in_cluster();
        }
        Self::from_kubeconfig(config.kubeconfig.as_deref(), config.context.as_deref())
    }

    /// Connect with a kubeconfig context. `path` defaults to `$KUBECONFIG`,
    /// then `~/.kube/config`; `context` to the file's current context.
    pub fn from_kubeconfig(path: Option<&Path>, context: Option<&str>) -> ClusterResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Kubeconfig::default_path)
            .ok_or_else(|| {
                ClusterError::Config(
                    "no api_server configured, not in a cluster and no kubeconfig found"
                        .to_string(),
                )
            })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let endpoint = Kubeconfig::read(&path)?.endpoint(context, base_dir)?;
        info!(kubeconfig = %path.display(), server = %endpoint.server, "using kubeconfig");
        Self::connect(endpoint)
    }

    /// Use the service account mounted into the current pod.
    pub fn in_cluster() -> ClusterResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ClusterError::Config(
                "KUBERNETES_SERVICE_HOST is not set and no api_server is configured".to_string(),
            )
        })?;
        let port =
            std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        Self::from_files(
            &in_cluster_url(&host, &port),
            Some(dir.join("token").as_path()),
            Some(dir.join("ca.crt").as_path()),
        )
    }

    fn from_files(
        api_server: &str,
        token_file: Option<&Path>,
        ca_file: Option<&Path>,
    ) -> ClusterResult<Self> {
        let token = token_file
            .map(|path| {
                std::fs::read_to_string(path)
                    .map(|t| SecretString::from(t.trim().to_string()))
                    .map_err(|e| {
                        ClusterError::Config(format!("read token {}: {e}", path.display()))
                    })
            })
            .transpose()?;
        let ca = ca_file
            .map(|path| {
                std::fs::read(path).map_err(|e| {
                    ClusterError::Config(format!("read CA bundle {}: {e}", path.display()))
                })
            })
            .transpose()?;
        Self::new(api_server, token, ca.as_deref())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn create<T: Serialize + ?Sized>(
        &self,
        path: &str,
        kind: &str,
        name: &str,
        body: &T,
    ) -> ClusterResult<()> {
        let response = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        check(response, kind, name).await?;
        debug!(%kind, %name, "object created");
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for KubeClient {
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()> {
        let path = format!("{CORE_API}/namespaces");
        self.create(&path, "namespace", &namespace.metadata.name, namespace)
            .await
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> ClusterResult<()> {
        let path = namespaced_path(CORE_API, namespace, "serviceaccounts");
        self.create(&path, "serviceaccount", &account.metadata.name, account)
            .await
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> ClusterResult<()> {
        let path = namespaced_path(RBAC_API, namespace, "roles");
        self.create(&path, "role", &role.metadata.name, role).await
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> ClusterResult<()> {
        let path = namespaced_path(RBAC_API, namespace, "rolebindings");
        self.create(&path, "rolebinding", &binding.metadata.name, binding)
            .await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()> {
        let path = namespaced_path(CORE_API, namespace, "secrets");
        self.create(&path, "secret", &secret.metadata.name, secret)
            .await
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()> {
        let name = &secret.metadata.name;
        let path = format!("{}/{name}", namespaced_path(CORE_API, namespace, "secrets"));
        let response = self
            .request(Method::PUT, &path)
            .json(secret)
            .send()
            .await
            .map_err(transport)?;
        check(response, "secret", name).await?;
        debug!(%namespace, %name, "secret replaced");
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> ClusterResult<()> {
        let path = namespaced_path(CORE_API, namespace, "pods");
        self.create(&path, "pod", &pod.metadata.name, pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let path = format!("{}/{name}", namespaced_path(CORE_API, namespace, "pods"));
        let response = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(transport)?;
        check(response, "pod", name).await?;
        Ok(())
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> ClusterResult<bool> {
        let path = format!("{}/{name}", namespaced_path(CORE_API, namespace, "pods"));
        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(transport)?;
        match check(response, "pod", name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read_pod_log(&self, namespace: &str, name: &str) -> ClusterResult<String> {
        let path = format!("{}/{name}/log", namespaced_path(CORE_API, namespace, "pods"));
        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(transport)?;
        check(response, "pod", name)
            .await?
            .text()
            .await
            .map_err(transport)
    }
}

fn namespaced_path(api: &str, namespace: &str, plural: &str) -> String {
    format!("{api}/namespaces/{namespace}/{plural}")
}

/// IPv6 service hosts need brackets in a URL.
fn in_cluster_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{host}]:{port}")
    } else {
        format!("https://{host}:{port}")
    }
}

fn transport(e: reqwest::Error) -> ClusterError {
    ClusterError::Transport(e.to_string())
}

/// Pass a successful response through, else map it with [`status_error`].
async fn check(response: Response, kind: &str, name: &str) -> ClusterResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, kind, name, &body))
}

/// Map a non-success status onto the cluster error taxonomy.
fn status_error(status: StatusCode, kind: &str, name: &str, body: &str) -> ClusterError {
    match status {
        StatusCode::CONFLICT => ClusterError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        StatusCode::NOT_FOUND => ClusterError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        _ => ClusterError::Api {
            status: status.as_u16(),
            message: status_message(body),
        },
    }
}

/// Pull `message` out of a Kubernetes `Status` body, else the raw body.
fn status_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
