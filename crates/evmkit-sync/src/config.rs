//! Kit configuration, loaded from the environment and overridable by the caller.

use alloy::primitives::Address;
use std::time::Duration;

/// Default poll interval of the HTTP RPC syncer.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(12);

/// Default per-request timeout for node and explorer calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pooled hashes resolved concurrently per batch.
pub const DEFAULT_RESOLVER_BATCH_SIZE: usize = 10;

pub const DEFAULT_DB_PATH: &str = "data/evmkit.sqlite";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Where the node is reached. Also the key of the provider registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RpcSource {
    Http { url: String, sync_interval: Duration },
    WebSocket { url: String },
}

impl RpcSource {
    pub fn url(&self) -> &str {
        match self {
            RpcSource::Http { url, .. } | RpcSource::WebSocket { url } => url,
        }
    }
}

/// Etherscan-compatible explorer endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplorerConfig {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct KitConfig {
    /// Tracked wallet address.
    pub address: Address,
    pub rpc: RpcSource,
    /// Without an explorer only the resolver and locally sent transactions feed history.
    pub explorer: Option<ExplorerConfig>,
    pub db_path: String,
    pub request_timeout: Duration,
    pub resolver_batch_size: usize,
    /// Chain id used when signing.
    pub chain_id: u64,
}

impl KitConfig {
    pub fn new(address: Address, rpc: RpcSource) -> Self {
        Self {
            address,
            rpc,
            explorer: None,
            db_path: DEFAULT_DB_PATH.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            resolver_batch_size: DEFAULT_RESOLVER_BATCH_SIZE,
            chain_id: 1,
        }
    }

    /// Reads `EVMKIT_*` variables from the process environment.
    ///
    /// # Errors
    /// Returns error if the address or an RPC URL is missing, or a value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let address = lookup("EVMKIT_ADDRESS")
            .ok_or(ConfigError::Missing("EVMKIT_ADDRESS"))?
            .parse::<Address>()
            .map_err(|err| ConfigError::Invalid {
                name: "EVMKIT_ADDRESS",
                reason: err.to_string(),
            })?;

        let sync_interval = match lookup("EVMKIT_SYNC_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|err| {
                ConfigError::Invalid {
                    name: "EVMKIT_SYNC_INTERVAL_SECS",
                    reason: err.to_string(),
                }
            })?),
            None => DEFAULT_SYNC_INTERVAL,
        };

        let rpc = match (lookup("EVMKIT_WS_URL"), lookup("EVMKIT_RPC_URL")) {
            (Some(url), _) => RpcSource::WebSocket { url },
            (None, Some(url)) => RpcSource::Http { url, sync_interval },
            (None, None) => return Err(ConfigError::Missing("EVMKIT_RPC_URL")),
        };

        let chain_id = match lookup("EVMKIT_CHAIN_ID") {
            Some(raw) => raw.parse::<u64>().map_err(|err| ConfigError::Invalid {
                name: "EVMKIT_CHAIN_ID",
                reason: err.to_string(),
            })?,
            None => 1,
        };

        let mut config = Self::new(address, rpc);
        config.explorer = lookup("EVMKIT_EXPLORER_URL").map(|url| ExplorerConfig {
            url,
            api_key: lookup("EVMKIT_EXPLORER_API_KEY"),
        });
        if let Some(path) = lookup("EVMKIT_DB_PATH") {
            config.db_path = path;
        }
        config.chain_id = chain_id;
        Ok(config)
    }
}
