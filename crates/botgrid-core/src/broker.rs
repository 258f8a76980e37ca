//! Supported brokers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The broker a bot trades through. Selects the credential branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    Alpaca,
    Tradier,
    Kraken,
    Coinbase,
    InteractiveBrokers,
}

impl BrokerKind {
    pub const ALL: [BrokerKind; 5] = [
        BrokerKind::Alpaca,
        BrokerKind::Tradier,
        BrokerKind::Kraken,
        BrokerKind::Coinbase,
        BrokerKind::InteractiveBrokers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpaca => "alpaca",
            Self::Tradier => "tradier",
            Self::Kraken => "kraken",
            Self::Coinbase => "coinbase",
            Self::InteractiveBrokers => "interactive_brokers",
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrokerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alpaca" => Ok(Self::Alpaca),
            "tradier" => Ok(Self::Tradier),
            "kraken" => Ok(Self::Kraken),
            "coinbase" => Ok(Self::Coinbase),
            "interactive_brokers" | "interactive-brokers" => Ok(Self::InteractiveBrokers),
            other => Err(ConfigError::UnsupportedBroker(other.to_string())),
        }
    }
}
