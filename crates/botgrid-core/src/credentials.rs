//! Credential assembler.
//!
//! Resolves a [`BrokerKind`] into the credential map injected into the bot's
//! secret, the resource profile its pod runs under, and the build arguments
//! handed to the image builder. The assembler only reads ambient secrets
//! through a [`SecretSource`]; it never touches the network or the cluster,
//! and it does not check whether the credentials are actually valid.

use std::collections::{BTreeMap, HashMap};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::broker::BrokerKind;

/// Where broker secrets come from.
pub trait SecretSource: Send + Sync {
    /// Look up a secret. Missing and empty values are both `None`.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl SecretSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl SecretSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).filter(|v| !v.is_empty()).cloned()
    }
}

/// A single credential value.
#[derive(Debug, Clone)]
pub enum CredentialValue {
    Secret(SecretString),
    Flag(bool),
}

impl CredentialValue {
    pub fn secret(value: impl Into<String>) -> Self {
        Self::Secret(SecretString::from(value.into()))
    }

    /// String form written into the cluster secret. Exposes the secret.
    ///
    /// Flags render as `True`/`False`, the form bot runtimes parse.
    pub fn expose(&self) -> String {
        match self {
            Self::Secret(s) => s.expose_secret().to_string(),
            Self::Flag(true) => "True".to_string(),
            Self::Flag(false) => "False".to_string(),
        }
    }
}

/// Credential key → value. A `None` value is an absent secret and is never
/// transmitted.
#[derive(Debug, Clone, Default)]
pub struct CredentialMap {
    entries: BTreeMap<String, Option<CredentialValue>>,
}

impl CredentialMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<CredentialValue>) {
        self.entries.insert(key.into(), value);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: Option<CredentialValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All declared keys, including those whose value is absent.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Keys whose value is present, in sorted order.
    pub fn present_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, v)| v.is_some())
            .map(|(k, _)| k.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&CredentialValue> {
        self.entries.get(key).and_then(Option::as_ref)
    }

    /// Secret payload with absent values dropped. Exposes every secret.
    pub fn expose_string_data(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.expose())))
            .collect()
    }
}

/// CPU/memory limits for a bot's container, in Kubernetes quantity syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub cpu: String,
    pub memory: String,
}

impl ResourceProfile {
    pub const DEFAULT_CPU: &'static str = "0.5";
    pub const DEFAULT_MEMORY: &'static str = "512Mi";

    pub fn new(cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            cpu: cpu.into(),
            memory: memory.into(),
        }
    }

    /// Fixed profile for the heavier interactive-brokers runtime.
    pub fn interactive_brokers() -> Self {
        Self::new("1", "1Gi")
    }
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CPU, Self::DEFAULT_MEMORY)
    }
}

/// Everything the assembler derives from a broker.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub credentials: CredentialMap,
    pub resources: ResourceProfile,
    pub build_arguments: BTreeMap<String, String>,
}

/// Assemble credentials, resources and build arguments for `broker`.
///
/// `default_resources` applies to every broker except interactive-brokers.
pub fn assemble(
    broker: BrokerKind,
    source: &dyn SecretSource,
    default_resources: &ResourceProfile,
) -> Assembly {
    let secret = |key: &str| source.get(key).map(CredentialValue::secret);
    let paper = |key: &str| {
        let is_paper = source
            .get(key)
            .is_none_or(|v| v.eq_ignore_ascii_case("true"));
        Some(CredentialValue::Flag(is_paper))
    };
    let constant = |value: &str| Some(CredentialValue::secret(value));
    let flag = |value: bool| Some(CredentialValue::Flag(value));

    let credentials = match broker {
        BrokerKind::Alpaca => CredentialMap::new()
            .with("API_KEY", secret("ALPACA_API_KEY"))
            .with("API_SECRET", secret("ALPACA_API_SECRET"))
            .with("PAPER", paper("ALPACA_IS_PAPER")),
        BrokerKind::Tradier => CredentialMap::new()
            .with("ACCESS_TOKEN", secret("TRADIER_ACCESS_TOKEN"))
            .with("ACCOUNT_NUMBER", secret("TRADIER_ACCOUNT_NUMBER"))
            .with("PAPER", paper("TRADIER_IS_PAPER")),
        BrokerKind::Kraken => CredentialMap::new()
            .with("exchange_id", constant("kraken"))
            .with("apiKey", secret("KRAKEN_API_KEY"))
            .with("secret", secret("KRAKEN_API_SECRET"))
            .with("margin", flag(true))
            .with("sandbox", flag(false)),
        BrokerKind::Coinbase => CredentialMap::new()
            .with("exchange_id", constant("coinbase"))
            .with("apiKey", secret("COINBASE_API_KEY"))
            .with("secret", secret("COINBASE_API_SECRET"))
            .with("margin", flag(false))
            .with("sandbox", flag(false)),
        BrokerKind::InteractiveBrokers => CredentialMap::new()
            .with("IB_USERNAME", secret("IB_USERNAME"))
            .with("IB_PASSWORD", secret("IB_PASSWORD"))
            .with("ACCOUNT_ID", secret("ACCOUNT_ID"))
            .with("API_URL", None)
            .with("RUNNING_ON_SERVER", flag(true)),
    };

    let (resources, build_arguments) = match broker {
        BrokerKind::InteractiveBrokers => (
            ResourceProfile::interactive_brokers(),
            BTreeMap::from([("IB_USERNAME".to_string(), "True".to_string())]),
        ),
        _ => (default_resources.clone(), BTreeMap::new()),
    };

    Assembly {
        credentials,
        resources,
        build_arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn every_broker_yields_credentials_without_null_payload() {
        let src = source(&[]);
        for kind in BrokerKind::ALL {
            let assembly = assemble(kind, &src, &ResourceProfile::default());
            assert!(!assembly.credentials.is_empty(), "{kind} has no credentials");
            let payload = assembly.credentials.expose_string_data();
            // Every key in the payload came from a present value.
            for key in payload.keys() {
                assert!(assembly.credentials.get(key).is_some());
            }
            assert!(payload.len() <= assembly.credentials.len());
        }
    }

    #[test]
    fn alpaca_reads_keys_and_defaults_to_paper() {
        let src = source(&[("ALPACA_API_KEY", "key"), ("ALPACA_API_SECRET", "shh")]);
        let assembly = assemble(BrokerKind::Alpaca, &src, &ResourceProfile::default());
        let data = assembly.credentials.expose_string_data();

        assert_eq!(data["API_KEY"], "key");
        assert_eq!(data["API_SECRET"], "shh");
        assert_eq!(data["PAPER"], "True");
        assert!(assembly.build_arguments.is_empty());
        assert_eq!(assembly.resources, ResourceProfile::default());
    }

    #[test]
    fn paper_flag_is_case_insensitive() {
        let src = source(&[("TRADIER_IS_PAPER", "TRUE")]);
        let data = assemble(BrokerKind::Tradier, &src, &ResourceProfile::default())
            .credentials
            .expose_string_data();
        assert_eq!(data["PAPER"], "True");

        let src = source(&[("TRADIER_IS_PAPER", "no")]);
        let data = assemble(BrokerKind::Tradier, &src, &ResourceProfile::default())
            .credentials
            .expose_string_data();
        assert_eq!(data["PAPER"], "False");
    }

    #[test]
    fn missing_secrets_are_dropped_from_payload() {
        let assembly = assemble(BrokerKind::Tradier, &source(&[]), &ResourceProfile::default());
        let data = assembly.credentials.expose_string_data();

        assert_eq!(assembly.credentials.len(), 3);
        assert!(!data.contains_key("ACCESS_TOKEN"));
        assert!(!data.contains_key("ACCOUNT_NUMBER"));
        assert_eq!(
            assembly.credentials.present_keys().collect::<Vec<_>>(),
            vec!["PAPER"]
        );
    }

    #[test]
    fn crypto_exchanges_carry_fixed_flags() {
        let src = source(&[("KRAKEN_API_KEY", "k"), ("KRAKEN_API_SECRET", "s")]);
        let data = assemble(BrokerKind::Kraken, &src, &ResourceProfile::default())
            .credentials
            .expose_string_data();
        assert_eq!(data["exchange_id"], "kraken");
        assert_eq!(data["margin"], "True");
        assert_eq!(data["sandbox"], "False");

        let data = assemble(BrokerKind::Coinbase, &source(&[]), &ResourceProfile::default())
            .credentials
            .expose_string_data();
        assert_eq!(data["exchange_id"], "coinbase");
        assert_eq!(data["margin"], "False");
        assert!(!data.contains_key("apiKey"));
    }

    #[test]
    fn interactive_brokers_gets_fixed_profile_and_build_args() {
        let custom = ResourceProfile::new("2", "4Gi");
        let assembly = assemble(BrokerKind::InteractiveBrokers, &source(&[]), &custom);

        assert_eq!(assembly.resources, ResourceProfile::new("1", "1Gi"));
        assert_eq!(assembly.build_arguments["IB_USERNAME"], "True");
        assert!(assembly.credentials.keys().any(|k| k == "API_URL"));
        assert!(assembly.credentials.get("API_URL").is_none());
        assert_eq!(
            assembly.credentials.expose_string_data()["RUNNING_ON_SERVER"],
            "True"
        );
    }

    #[test]
    fn other_brokers_use_configured_default_profile() {
        let custom = ResourceProfile::new("250m", "256Mi");
        let assembly = assemble(BrokerKind::Coinbase, &source(&[]), &custom);
        assert_eq!(assembly.resources, custom);
    }

    #[test]
    fn empty_values_count_as_absent() {
        let src = source(&[("ALPACA_API_KEY", "")]);
        assert_eq!(SecretSource::get(&src, "ALPACA_API_KEY"), None);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let map = CredentialMap::new().with("API_KEY", Some(CredentialValue::secret("hunter2")));
        let rendered = format!("{map:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
