use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the peerwarden daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node RPC connection
    pub rpc: RpcConfig,
    /// Per-kind cache TTLs
    pub cache: CacheConfig,
    /// Rule engine tuning
    pub engine: EngineConfig,
    /// Geolocation lookups
    pub geolocation: GeolocationConfig,
    /// Rule and log storage
    pub storage: StorageConfig,
    /// Execution-log audit output
    pub output: OutputConfig,
}

/// Node RPC connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Node RPC endpoint, e.g. "http://127.0.0.1:8332"
    pub url: String,
    pub username: String,
    pub password: String,
    /// Per-call timeout; generous, since some node calls are expensive
    pub timeout_seconds: u64,
    /// Serve synthetic data for every read call without touching the node
    pub force_fallback: bool,
}

/// Cache TTLs, one per resource kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Peer list freshness window in seconds
    pub peer_ttl_seconds: i64,
    /// Block and transaction data freshness window
    pub block_ttl_seconds: i64,
    /// Mempool and wallet summary freshness window
    pub mempool_ttl_seconds: i64,
    /// Geolocation record freshness window (long: the source is rate-limited)
    pub geo_ttl_seconds: i64,
}

/// Rule engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between periodic evaluation cycles
    pub tick_interval_seconds: u64,
    /// Minimum seconds between repeated actions of one rule on one peer
    pub cooldown_seconds: i64,
    /// Ban duration applied when a rule does not specify one
    pub default_ban_seconds: i64,
}

/// Geolocation lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationConfig {
    pub enabled: bool,
    /// Lookup endpoint; `{ip}` is replaced with the address
    pub api_url: String,
    /// Minimum milliseconds between upstream requests (source rate limit)
    pub min_request_interval_ms: u64,
    /// Per-lookup HTTP timeout
    pub timeout_seconds: u64,
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the sqlite database holding rules and execution logs
    pub database_path: PathBuf,
    /// Execution logs older than this are pruned on startup
    pub log_retention_days: i64,
}

/// Audit output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "jsonl" or "console"
    pub format: String,
    /// Output file path (if format is not "console")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rpc: RpcConfig {
                url: "http://127.0.0.1:8332".to_string(),
                username: "rpcuser".to_string(),
                password: "rpcpass".to_string(),
                timeout_seconds: 30,
                force_fallback: false,
            },
            cache: CacheConfig {
                peer_ttl_seconds: 60,
                block_ttl_seconds: 300,
                mempool_ttl_seconds: 300,
                geo_ttl_seconds: 60 * 60 * 24 * 30,
            },
            engine: EngineConfig {
                tick_interval_seconds: 300,
                cooldown_seconds: 3600,
                default_ban_seconds: 86400,
            },
            geolocation: GeolocationConfig {
                enabled: true,
                api_url: "http://ip-api.com/json/{ip}".to_string(),
                min_request_interval_ms: 1500,
                timeout_seconds: 10,
            },
            storage: StorageConfig {
                database_path: PathBuf::from("peerwarden.db"),
                log_retention_days: 90,
            },
            output: OutputConfig {
                format: "jsonl".to_string(),
                file_path: Some(PathBuf::from("executions.jsonl")),
            },
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let reparsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(reparsed.engine.cooldown_seconds, 3600);
        assert_eq!(reparsed.cache.peer_ttl_seconds, 60);
        assert_eq!(reparsed.rpc.url, config.rpc.url);
    }
}
