//! In-memory control plane.
//!
//! Behaves like an API server for the objects the provisioner touches:
//! duplicate creates conflict, namespaced creates need their namespace,
//! deletes and log reads of missing pods are not-found. A deleted pod can
//! be made to linger as terminating for a number of existence checks,
//! during which its name stays taken. Every call is
//! journaled and individual operations can be made to fail, which is how
//! the orchestrator's ordering and failure paths are tested.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::control_plane::ControlPlane;
use crate::error::{ClusterError, ClusterResult};
use crate::resources::{Namespace, Pod, Role, RoleBinding, Secret, ServiceAccount};

/// Control-plane operation kinds, for fault injection and journal filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateNamespace,
    CreateServiceAccount,
    CreateRole,
    CreateRoleBinding,
    CreateSecret,
    ReplaceSecret,
    CreatePod,
    DeletePod,
    ReadPod,
    ReadPodLog,
}

/// One journaled call: the operation plus the `(namespace, name)` it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneCall {
    pub operation: Operation,
    pub namespace: String,
    pub name: String,
}

type Key = (String, String);

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    service_accounts: BTreeSet<Key>,
    roles: BTreeMap<Key, Role>,
    role_bindings: BTreeMap<Key, RoleBinding>,
    secrets: BTreeMap<Key, Secret>,
    pods: BTreeMap<Key, Pod>,
    /// Deleted pods still terminating, with the existence checks left.
    terminating: BTreeMap<Key, u32>,
    termination_reads: u32,
    logs: BTreeMap<Key, String>,
    journal: Vec<ControlPlaneCall>,
    faults: HashMap<Operation, VecDeque<ClusterError>>,
}

impl State {
    fn record(&mut self, operation: Operation, namespace: &str, name: &str) -> ClusterResult<()> {
        self.journal.push(ControlPlaneCall {
            operation,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        match self.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn remove_pod(&mut self, key: &Key) {
        self.pods.remove(key);
        self.logs.remove(key);
        self.terminating.remove(key);
    }

    fn require_namespace(&self, namespace: &str) -> ClusterResult<()> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(ClusterError::NotFound {
                kind: "namespace".to_string(),
                name: namespace.to_string(),
            })
        }
    }
}

fn conflict(kind: &str, name: &str) -> ClusterError {
    ClusterError::Conflict {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Shared, cloneable in-memory control plane.
#[derive(Clone, Default)]
pub struct InMemoryControlPlane {
    state: Arc<Mutex<State>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `operation` fail with `error`. Faults queue up
    /// per operation.
    pub fn fail_next(&self, operation: Operation, error: ClusterError) {
        self.lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Set the log output returned for a pod.
    pub fn set_pod_log(&self, namespace: &str, pod: &str, logs: &str) {
        self.lock().logs.insert(key(namespace, pod), logs.to_string());
    }

    /// Keep deleted pods visible for `reads` existence checks before they
    /// disappear. Zero, the default, deletes immediately.
    pub fn set_termination_reads(&self, reads: u32) {
        self.lock().termination_reads = reads;
    }

    /// Whether a pod has been deleted but not yet gone.
    pub fn is_terminating(&self, namespace: &str, name: &str) -> bool {
        self.lock().terminating.contains_key(&key(namespace, name))
    }

    /// Every call made so far, in order.
    pub fn journal(&self) -> Vec<ControlPlaneCall> {
        self.lock().journal.clone()
    }

    /// Number of calls of `operation` made so far.
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.lock().namespaces.iter().cloned().collect()
    }

    pub fn has_service_account(&self, namespace: &str, name: &str) -> bool {
        self.lock().service_accounts.contains(&key(namespace, name))
    }

    pub fn role(&self, namespace: &str, name: &str) -> Option<Role> {
        self.lock().roles.get(&key(namespace, name)).cloned()
    }

    pub fn role_binding(&self, namespace: &str, name: &str) -> Option<RoleBinding> {
        self.lock().role_bindings.get(&key(namespace, name)).cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.get(&key(namespace, name)).cloned()
    }

    /// All pods as `(namespace, name)` pairs.
    pub fn pods(&self) -> Vec<(String, String)> {
        self.lock().pods.keys().cloned().collect()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()> {
        let name = &namespace.metadata.name;
        let mut state = self.lock();
        state.record(Operation::CreateNamespace, name, name)?;
        if !state.namespaces.insert(name.clone()) {
            return Err(conflict("namespace", name));
        }
        Ok(())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> ClusterResult<()> {
        let name = &account.metadata.name;
        let mut state = self.lock();
        state.record(Operation::CreateServiceAccount, namespace, name)?;
        state.require_namespace(namespace)?;
        if !state.service_accounts.insert(key(namespace, name)) {
            return Err(conflict("serviceaccount", name));
        }
        Ok(())
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> ClusterResult<()> {
        let name = &role.metadata.name;
        let mut state = self.lock();
        state.record(Operation::CreateRole, namespace, name)?;
        state.require_namespace(namespace)?;
        if state.roles.contains_key(&key(namespace, name)) {
            return Err(conflict("role", name));
        }
        state.roles.insert(key(namespace, name), role.clone());
        Ok(())
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> ClusterResult<()> {
        let name = &binding.metadata.name;
        let mut state = self.lock();
        state.record(Operation::CreateRoleBinding, namespace, name)?;
        state.require_namespace(namespace)?;
        if state.role_bindings.contains_key(&key(namespace, name)) {
            return Err(conflict("rolebinding", name));
        }
        state
            .role_bindings
            .insert(key(namespace, name), binding.clone());
        Ok(())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()> {
        let name = &secret.metadata.name;
        let mut state = self.lock();
        state.record(Operation::CreateSecret, namespace, name)?;
        state.require_namespace(namespace)?;
        if state.secrets.contains_key(&key(namespace, name)) {
            return Err(conflict("secret", name));
        }
        state.secrets.insert(key(namespace, name), secret.clone());
        Ok(())
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()> {
        let name = &secret.metadata.name;
        let mut state = self.lock();
        state.record(Operation::ReplaceSecret, namespace, name)?;
        match state.secrets.get_mut(&key(namespace, name)) {
            Some(existing) => {
                *existing = secret.clone();
                Ok(())
            }
            None => Err(ClusterError::NotFound {
                kind: "secret".to_string(),
                name: name.to_string(),
            }),
        }
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> ClusterResult<()> {
        let name = &pod.metadata.name;
        let mut state = self.lock();
        state.record(Operation::CreatePod, namespace, name)?;
        state.require_namespace(namespace)?;
        if state.pods.contains_key(&key(namespace, name)) {
            return Err(conflict("pod", name));
        }
        state.pods.insert(key(namespace, name), pod.clone());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.lock();
        state.record(Operation::DeletePod, namespace, name)?;
        let pod = key(namespace, name);
        if !state.pods.contains_key(&pod) {
            return Err(ClusterError::NotFound {
                kind: "pod".to_string(),
                name: name.to_string(),
            });
        }
        if state.terminating.contains_key(&pod) {
            return Ok(());
        }
        match state.termination_reads {
            0 => state.remove_pod(&pod),
            reads => {
                state.terminating.insert(pod, reads);
            }
        }
        Ok(())
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> ClusterResult<bool> {
        let mut state = self.lock();
        state.record(Operation::ReadPod, namespace, name)?;
        let pod = key(namespace, name);
        match state.terminating.get(&pod).copied() {
            Some(0) => {
                state.remove_pod(&pod);
                Ok(false)
            }
            Some(left) => {
                state.terminating.insert(pod, left - 1);
                Ok(true)
            }
            None => Ok(state.pods.contains_key(&pod)),
        }
    }

    async fn read_pod_log(&self, namespace: &str, name: &str) -> ClusterResult<String> {
        let mut state = self.lock();
        state.record(Operation::ReadPodLog, namespace, name)?;
        if !state.pods.contains_key(&key(namespace, name)) {
            return Err(ClusterError::NotFound {
                kind: "pod".to_string(),
                name: name.to_string(),
            });
        }
        Ok(state
            .logs
            .get(&key(namespace, name))
            .cloned()
            .unwrap_or_default())
    }
}
