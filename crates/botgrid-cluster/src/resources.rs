//! Control-plane object manifests.
//!
//! Minimal Kubernetes object shapes: only the fields the provisioner sets.
//! They serialize to the API server's JSON wire format (camelCase,
//! `apiVersion`/`kind` envelope).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Service account created in every tenant namespace.
pub const SERVICE_ACCOUNT_NAME: &str = "bot-service-account";
/// Role bound to the tenant service account. Grants nothing.
pub const ROLE_NAME: &str = "bot-role";
pub const ROLE_BINDING_NAME: &str = "bot-rolebinding";
/// Credential secret name, identical in every namespace.
pub const SECRET_NAME: &str = "broker-secrets";
pub const CONTAINER_NAME: &str = "bot";

pub const RUN_AS_USER: i64 = 1000;
pub const RUN_AS_GROUP: i64 = 3000;
pub const FS_GROUP: i64 = 2000;

const CORE_V1: &str = "v1";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const RBAC_V1: &str = "rbac.authorization.k8s.io/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

// ── Namespace ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
}

impl Namespace {
    /// A namespace labelled `name=<name>`.
    pub fn new(name: &str) -> Self {
        Self {
            api_version: CORE_V1.to_string(),
            kind: "Namespace".to_string(),
            metadata: ObjectMeta::named(name).with_label("name", name),
        }
    }
}

// ── Identity ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
}

impl ServiceAccount {
    pub fn new(namespace: &str) -> Self {
        Self {
            api_version: CORE_V1.to_string(),
            kind: "ServiceAccount".to_string(),
            metadata: ObjectMeta::namespaced(SERVICE_ACCOUNT_NAME, namespace),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub rules: Vec<PolicyRule>,
}

impl Role {
    /// The tenant role: one rule on the core group with no resources and no
    /// verbs. Extend here if a bot ever needs control-plane access.
    pub fn least_privilege(namespace: &str) -> Self {
        Self {
            api_version: RBAC_V1.to_string(),
            kind: "Role".to_string(),
            metadata: ObjectMeta::namespaced(ROLE_NAME, namespace),
            rules: vec![PolicyRule {
                api_groups: vec![String::new()],
                resources: Vec::new(),
                verbs: Vec::new(),
            }],
        }
    }

    /// True when no rule grants any verb on any resource.
    pub fn grants_nothing(&self) -> bool {
        self.rules
            .iter()
            .all(|r| r.resources.is_empty() || r.verbs.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}

impl RoleBinding {
    /// Binds the tenant service account to the tenant role.
    pub fn tenant(namespace: &str) -> Self {
        Self {
            api_version: RBAC_V1.to_string(),
            kind: "RoleBinding".to_string(),
            metadata: ObjectMeta::namespaced(ROLE_BINDING_NAME, namespace),
            subjects: vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: SERVICE_ACCOUNT_NAME.to_string(),
                namespace: namespace.to_string(),
            }],
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "Role".to_string(),
                name: ROLE_NAME.to_string(),
            },
        }
    }
}

// ── Secret ────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(rename = "type")]
    pub secret_type: String,
    pub string_data: BTreeMap<String, String>,
}

impl Secret {
    pub fn opaque(namespace: &str, string_data: BTreeMap<String, String>) -> Self {
        Self {
            api_version: CORE_V1.to_string(),
            kind: "Secret".to_string(),
            metadata: ObjectMeta::namespaced(SECRET_NAME, namespace),
            secret_type: "Opaque".to_string(),
            string_data,
        }
    }
}

// Values stay out of logs.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("metadata", &self.metadata)
            .field("type", &self.secret_type)
            .field("keys", &self.string_data.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Pod ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

impl Pod {
    pub fn new(metadata: ObjectMeta, spec: PodSpec) -> Self {
        Self {
            api_version: CORE_V1.to_string(),
            kind: "Pod".to_string(),
            metadata,
            spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub service_account_name: String,
    pub automount_service_account_token: bool,
    pub security_context: PodSecurityContext,
    pub containers: Vec<Container>,
    pub restart_policy: String,
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurityContext {
    pub run_as_non_root: bool,
    pub run_as_user: i64,
    pub run_as_group: i64,
    pub fs_group: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_pull_policy: String,
    pub resources: ResourceRequirements,
    pub env: Vec<EnvVar>,
    pub security_context: SecurityContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    pub value_from: EnvVarSource,
}

impl EnvVar {
    /// An env var sourced from `key` in the tenant credential secret.
    pub fn from_secret(key: &str) -> Self {
        Self {
            name: key.to_string(),
            value_from: EnvVarSource {
                secret_key_ref: SecretKeySelector {
                    name: SECRET_NAME.to_string(),
                    key: key.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    pub secret_key_ref: SecretKeySelector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub run_as_non_root: bool,
    pub allow_privilege_escalation: bool,
    pub read_only_root_filesystem: bool,
    pub capabilities: Capabilities,
}

impl SecurityContext {
    /// Non-root, no escalation, read-only root, every capability dropped.
    pub fn hardened() -> Self {
        Self {
            run_as_non_root: true,
            allow_privilege_escalation: false,
            read_only_root_filesystem: true,
            capabilities: Capabilities {
                drop: vec!["ALL".to_string()],
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namespace_wire_format() {
        let value = serde_json::to_value(Namespace::new("bot-u1-b1")).unwrap();
        assert_eq!(
            value,
            json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": "bot-u1-b1", "labels": { "name": "bot-u1-b1" } }
            })
        );
    }

    #[test]
    fn role_grants_nothing() {
        let role = Role::least_privilege("bot-u1-b1");
        assert!(role.grants_nothing());
        let value = serde_json::to_value(&role).unwrap();
        assert_eq!(value["apiVersion"], "rbac.authorization.k8s.io/v1");
        assert_eq!(value["rules"][0]["apiGroups"], json!([""]));
        assert_eq!(value["rules"][0]["verbs"], json!([]));
    }

    #[test]
    fn role_binding_points_at_tenant_identity() {
        let value = serde_json::to_value(RoleBinding::tenant("ns")).unwrap();
        assert_eq!(value["roleRef"]["apiGroup"], "rbac.authorization.k8s.io");
        assert_eq!(value["roleRef"]["name"], ROLE_NAME);
        assert_eq!(value["subjects"][0]["name"], SERVICE_ACCOUNT_NAME);
        assert_eq!(value["subjects"][0]["namespace"], "ns");
    }

    #[test]
    fn secret_serializes_type_and_string_data() {
        let data = BTreeMap::from([("API_KEY".to_string(), "k".to_string())]);
        let value = serde_json::to_value(Secret::opaque("ns", data)).unwrap();
        assert_eq!(value["type"], "Opaque");
        assert_eq!(value["stringData"]["API_KEY"], "k");
        assert_eq!(value["metadata"]["name"], SECRET_NAME);
    }

    #[test]
    fn secret_debug_hides_values() {
        let data = BTreeMap::from([("API_SECRET".to_string(), "hunter2".to_string())]);
        let rendered = format!("{:?}", Secret::opaque("ns", data));
        assert!(rendered.contains("API_SECRET"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn env_var_references_secret() {
        let value = serde_json::to_value(EnvVar::from_secret("PAPER")).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "PAPER",
                "valueFrom": { "secretKeyRef": { "name": "broker-secrets", "key": "PAPER" } }
            })
        );
    }
}
