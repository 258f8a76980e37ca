//! Bot configuration model.
//!
//! A [`BotConfiguration`] is immutable once built. The image reference is not
//! part of it: a successful build pairs the configuration with an
//! [`ImageReference`] into a [`DeployableBot`], and only a `DeployableBot`
//! can be turned into a pod.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::broker::BrokerKind;
use crate::credentials::{self, Assembly, CredentialMap, ResourceProfile, SecretSource};
use crate::error::{ConfigError, ConfigResult};

/// Kubernetes caps namespace names at 63 characters.
const MAX_NAMESPACE_LEN: usize = 63;

/// Declarative specification of one bot.
#[derive(Debug, Clone)]
pub struct BotConfiguration {
    user_id: String,
    bot_id: String,
    broker: BrokerKind,
    repository_url: String,
    credentials: CredentialMap,
    resources: ResourceProfile,
    build_arguments: BTreeMap<String, String>,
}

impl BotConfiguration {
    /// Build a configuration from a broker name.
    ///
    /// Fails with [`ConfigError::UnsupportedBroker`] for an unknown broker.
    pub fn new(
        user_id: &str,
        bot_id: &str,
        repository_url: &str,
        broker: &str,
        source: &dyn SecretSource,
        default_resources: &ResourceProfile,
    ) -> ConfigResult<Self> {
        let broker: BrokerKind = broker.parse()?;
        Self::for_broker(user_id, bot_id, repository_url, broker, source, default_resources)
    }

    /// Build a configuration for an already-parsed broker.
    pub fn for_broker(
        user_id: &str,
        bot_id: &str,
        repository_url: &str,
        broker: BrokerKind,
        source: &dyn SecretSource,
        default_resources: &ResourceProfile,
    ) -> ConfigResult<Self> {
        let assembly = credentials::assemble(broker, source, default_resources);
        Self::from_assembly(user_id, bot_id, repository_url, broker, assembly)
    }

    /// Build a configuration from an explicit assembly.
    pub fn from_assembly(
        user_id: &str,
        bot_id: &str,
        repository_url: &str,
        broker: BrokerKind,
        assembly: Assembly,
    ) -> ConfigResult<Self> {
        validate_name_part("user_id", user_id, false)?;
        validate_name_part("bot_id", bot_id, true)?;
        if repository_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository_url".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let config = Self {
            user_id: user_id.to_string(),
            bot_id: bot_id.to_string(),
            broker,
            repository_url: repository_url.to_string(),
            credentials: assembly.credentials,
            resources: assembly.resources,
            build_arguments: assembly.build_arguments,
        };

        let namespace = config.namespace_name();
        if namespace.len() > MAX_NAMESPACE_LEN {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                message: format!("{namespace} exceeds {MAX_NAMESPACE_LEN} characters"),
            });
        }
        Ok(config)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn broker(&self) -> BrokerKind {
        self.broker
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn credentials(&self) -> &CredentialMap {
        &self.credentials
    }

    pub fn resources(&self) -> &ResourceProfile {
        &self.resources
    }

    pub fn build_arguments(&self) -> &BTreeMap<String, String> {
        &self.build_arguments
    }

    /// Tenant namespace: `bot-{user_id}-{bot_id}`.
    pub fn namespace_name(&self) -> String {
        namespace_name(&self.user_id, &self.bot_id)
    }

    /// Pod name: `bot-{bot_id}`.
    pub fn pod_name(&self) -> String {
        pod_name(&self.bot_id)
    }
}

/// Tenant namespace for a `(user_id, bot_id)` pair.
///
/// User ids never contain '-', so the first '-' after the prefix splits the
/// name back into its pair and two tenants cannot share a namespace.
pub fn namespace_name(user_id: &str, bot_id: &str) -> String {
    format!("bot-{user_id}-{bot_id}")
}

/// Pod name for a bot.
pub fn pod_name(bot_id: &str) -> String {
    format!("bot-{bot_id}")
}

/// Identifiers end up inside DNS-1123 labels. `allow_hyphen` is false for
/// the user id, which leads the namespace name.
fn validate_name_part(field: &str, value: &str, allow_hyphen: bool) -> ConfigResult<()> {
    let valid = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || (allow_hyphen && b == b'-'))
        && !value.ends_with('-');
    if valid {
        return Ok(());
    }
    let allowed = if allow_hyphen {
        "lowercase alphanumerics or '-'"
    } else {
        "lowercase alphanumerics"
    };
    Err(ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{value:?} must be non-empty {allowed}"),
    })
}

/// Opaque reference to a built image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference(String);

impl ImageReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A configuration paired with the image it was built into.
#[derive(Debug, Clone)]
pub struct DeployableBot {
    config: BotConfiguration,
    image: ImageReference,
}

impl DeployableBot {
    pub fn new(config: BotConfiguration, image: ImageReference) -> Self {
        Self { config, image }
    }

    pub fn config(&self) -> &BotConfiguration {
        &self.config
    }

    pub fn image(&self) -> &ImageReference {
        &self.image
    }

    pub fn into_parts(self) -> (BotConfiguration, ImageReference) {
        (self.config, self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn empty_source() -> HashMap<String, String> {
        HashMap::new()
    }

    fn alpaca(user: &str, bot: &str) -> ConfigResult<BotConfiguration> {
        BotConfiguration::new(
            user,
            bot,
            "https://github.com/acme/strategy.git",
            "alpaca",
            &empty_source(),
            &ResourceProfile::default(),
        )
    }

    #[test]
    fn derives_namespace_and_pod_names() {
        let config = alpaca("u1", "b1").unwrap();
        assert_eq!(config.namespace_name(), "bot-u1-b1");
        assert_eq!(config.pod_name(), "bot-b1");
        assert_eq!(config.broker(), BrokerKind::Alpaca);
    }

    #[test]
    fn unsupported_broker_fails_construction() {
        let err = BotConfiguration::new(
            "u1",
            "b1",
            "https://github.com/acme/strategy.git",
            "etrade",
            &empty_source(),
            &ResourceProfile::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedBroker(_)));
    }

    #[test]
    fn rejects_identifiers_that_break_namespace_names() {
        assert!(alpaca("", "b1").is_err());
        assert!(alpaca("U1", "b1").is_err());
        assert!(alpaca("u1", "b_1").is_err());
        assert!(alpaca("u1", "b1-").is_err());
        assert!(alpaca(&"u".repeat(40), &"b".repeat(40)).is_err());
    }

    #[test]
    fn user_id_may_not_contain_hyphen() {
        let err = alpaca("a-b", "c").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "user_id"));
        assert!(alpaca("a", "b-c").is_ok());
    }

    #[test]
    fn distinct_pairs_never_share_a_namespace() {
        let users = ["a", "ab", "a1", "b"];
        let bots = ["b", "c", "b-c", "ab-c", "c-d-e"];
        let mut seen = HashMap::new();
        for user in users {
            for bot in bots {
                let namespace = alpaca(user, bot).unwrap().namespace_name();
                if let Some(previous) = seen.insert(namespace.clone(), (user, bot)) {
                    panic!("{namespace} shared by {previous:?} and {:?}", (user, bot));
                }
            }
        }
        assert_eq!(seen.len(), users.len() * bots.len());
    }

    #[test]
    fn rejects_empty_repository_url() {
        let err = BotConfiguration::new(
            "u1",
            "b1",
            "  ",
            "alpaca",
            &empty_source(),
            &ResourceProfile::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "repository_url"));
    }

    #[test]
    fn interactive_brokers_configuration_carries_build_args() {
        let config = BotConfiguration::new(
            "u1",
            "ib",
            "https://github.com/acme/ib.git",
            "interactive_brokers",
            &empty_source(),
            &ResourceProfile::default(),
        )
        .unwrap();
        assert_eq!(config.build_arguments().get("IB_USERNAME").map(String::as_str), Some("True"));
        assert_eq!(config.resources().memory, "1Gi");
    }

    #[test]
    fn deployable_bot_pairs_config_with_image() {
        let config = alpaca("u1", "b1").unwrap();
        let bot = DeployableBot::new(config, ImageReference::new("bot:deadbeef"));
        assert_eq!(bot.image().as_str(), "bot:deadbeef");
        assert_eq!(bot.config().bot_id(), "b1");

        let (config, image) = bot.into_parts();
        assert_eq!(config.pod_name(), "bot-b1");
        assert_eq!(image.to_string(), "bot:deadbeef");
    }
}
