//! The control-plane seam.

use async_trait::async_trait;

use crate::error::ClusterResult;
use crate::resources::{Namespace, Pod, Role, RoleBinding, Secret, ServiceAccount};

/// Raw object CRUD against a cluster control plane.
///
/// Implementations report "already exists" as [`ClusterError::Conflict`]
/// and "missing" as [`ClusterError::NotFound`]; interpreting those is the
/// provisioner's job.
///
/// [`ClusterError::Conflict`]: crate::ClusterError::Conflict
/// [`ClusterError::NotFound`]: crate::ClusterError::NotFound
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()>;

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> ClusterResult<()>;

    async fn create_role(&self, namespace: &str, role: &Role) -> ClusterResult<()>;

    async fn create_role_binding(&self, namespace: &str, binding: &RoleBinding)
    -> ClusterResult<()>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()>;

    /// Overwrite an existing secret. Keys missing from `secret` are dropped.
    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()>;

    /// Submit a pod. Returns once the object is accepted, not once it runs.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> ClusterResult<()>;

    /// Request pod deletion. The pod may stay visible while it terminates.
    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Whether the pod object still exists, terminating or not.
    async fn pod_exists(&self, namespace: &str, name: &str) -> ClusterResult<bool>;

    async fn read_pod_log(&self, namespace: &str, name: &str) -> ClusterResult<String>;
}
