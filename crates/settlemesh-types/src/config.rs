//! Configuration types for SettleMesh clients and streams.
//!
//! Signing material never lives here; it is supplied by the external signer.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{constants, Result, SettlemeshError};

/// Target chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
    Staging,
    Local,
    /// Endpoint given by [`NetworkConfig::custom_ws_url`].
    Custom,
}

impl Network {
    /// Well-known RPC endpoint. `None` for [`Network::Custom`].
    #[must_use]
    pub fn default_rpc(self) -> Option<&'static str> {
        match self {
            Self::Mainnet => Some(constants::MAINNET_RPC),
            Self::Testnet => Some(constants::TESTNET_RPC),
            Self::Staging => Some(constants::STAGING_RPC),
            Self::Local => Some(constants::LOCAL_RPC),
            Self::Custom => None,
        }
    }

    #[must_use]
    pub fn default_middleware(self) -> Option<&'static str> {
        match self {
            Self::Mainnet => Some(constants::MAINNET_MIDDLEWARE),
            Self::Testnet => Some(constants::TESTNET_MIDDLEWARE),
            Self::Staging => Some(constants::STAGING_MIDDLEWARE),
            Self::Local => Some(constants::LOCAL_MIDDLEWARE),
            Self::Custom => None,
        }
    }
}

impl FromStr for Network {
    type Err = SettlemeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "staging" => Ok(Self::Staging),
            "local" => Ok(Self::Local),
            "custom" => Ok(Self::Custom),
            other => Err(SettlemeshError::Configuration(format!(
                "unknown network {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Staging => "staging",
            Self::Local => "local",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Where to reach the chain and its middleware. Holds endpoints only;
/// credentials come from the host at activation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub network: Network,
    /// Required when `network` is [`Network::Custom`].
    pub custom_ws_url: Option<String>,
    /// Overrides the network's middleware endpoint.
    pub middleware_url: Option<String>,
}

impl NetworkConfig {
    #[must_use]
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// WebSocket RPC endpoint to connect the feed and ledger client to.
    pub fn rpc_endpoint(&self) -> Result<String> {
        match (self.network, self.custom_ws_url.as_deref()) {
            (Network::Custom, Some(url)) if !url.trim().is_empty() => Ok(url.trim().to_string()),
            (Network::Custom, _) => Err(SettlemeshError::Configuration(
                "custom network requires a WebSocket URL".into(),
            )),
            (network, _) => network.default_rpc().map(str::to_string).ok_or_else(|| {
                SettlemeshError::Configuration(format!("no RPC endpoint for {network}"))
            }),
        }
    }

    /// Middleware endpoint. An explicit override wins; a custom network
    /// without one has none.
    #[must_use]
    pub fn middleware_endpoint(&self) -> Option<String> {
        self.middleware_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.network.default_middleware().map(str::to_string))
    }
}

/// Multiplexer tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bound on establishing the upstream connection, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl StreamConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: constants::DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_endpoints() {
        let cfg = NetworkConfig::for_network(Network::Mainnet);
        assert_eq!(cfg.rpc_endpoint().unwrap(), constants::MAINNET_RPC);
        assert_eq!(
            cfg.middleware_endpoint().as_deref(),
            Some(constants::MAINNET_MIDDLEWARE)
        );
    }

    #[test]
    fn custom_requires_url() {
        let mut cfg = NetworkConfig::for_network(Network::Custom);
        assert!(matches!(
            cfg.rpc_endpoint().unwrap_err(),
            SettlemeshError::Configuration(_)
        ));
        assert_eq!(cfg.middleware_endpoint(), None);

        cfg.custom_ws_url = Some("ws://node.internal:9944".into());
        assert_eq!(cfg.rpc_endpoint().unwrap(), "ws://node.internal:9944");
    }

    #[test]
    fn middleware_override_wins() {
        let mut cfg = NetworkConfig::for_network(Network::Testnet);
        cfg.middleware_url = Some("https://indexer.example/graphql".into());
        assert_eq!(
            cfg.middleware_endpoint().as_deref(),
            Some("https://indexer.example/graphql")
        );
    }

    #[test]
    fn credentials_are_not_accepted() {
        let endpoints: NetworkConfig =
            serde_json::from_str(r#"{"network":"local","custom_ws_url":null,"middleware_url":null}"#)
                .unwrap();
        assert_eq!(endpoints, NetworkConfig::for_network(Network::Local));

        let with_key = r#"{"network":"local","middleware_url":null,"middleware_api_key":"secret"}"#;
        assert!(serde_json::from_str::<NetworkConfig>(with_key).is_err());
    }

    #[test]
    fn network_parsing() {
        assert_eq!("Staging".parse::<Network>().unwrap(), Network::Staging);
        assert!("moon".parse::<Network>().is_err());
        let json = serde_json::to_string(&Network::Local).unwrap();
        assert_eq!(json, "\"local\"");
    }

    #[test]
    fn default_connect_timeout() {
        assert_eq!(StreamConfig::default().connect_timeout(), Duration::from_secs(60));
    }
}
