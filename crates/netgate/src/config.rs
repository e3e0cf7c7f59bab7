use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use rule_engine::RuleConfig;
use trust_store::{KvStore, MemoryStore, RedisStore};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub datastorage: StorageConfig,
    #[serde(default = "default_fail2ban_storage")]
    pub fail2bandatastorage: StorageConfig,
    /// Ban-record lifetime in milliseconds.
    #[serde(default = "default_fail2ban_ttl")]
    pub fail2banttl: u64,
    /// Skip certificate verification when dialing TLS upstreams.
    #[serde(default = "default_true")]
    pub tlsskipverify: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rules: RuleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            datastorage: StorageConfig::default(),
            fail2bandatastorage: default_fail2ban_storage(),
            fail2banttl: default_fail2ban_ttl(),
            tlsskipverify: default_true(),
            logging: LoggingConfig::default(),
            rules: RuleConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_http_address")]
    pub httpaddress: String,
    #[serde(default = "default_grpc_address")]
    pub grpcaddress: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            httpaddress: default_http_address(),
            grpcaddress: default_grpc_address(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_credentials")]
    pub credentials: HashMap<String, String>,
    #[serde(rename = "type", default = "default_storage_type")]
    pub storage_type: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials: default_data_credentials(),
            storage_type: default_storage_type(),
        }
    }
}

impl StorageConfig {
    /// Build the configured driver.
    pub async fn connect(&self) -> anyhow::Result<Arc<dyn KvStore>> {
        match self.storage_type.as_str() {
            "redis" => {
                let store = RedisStore::connect(&self.credentials)
                    .await
                    .context("failed to connect to redis")?;
                Ok(Arc::new(store))
            }
            "memory" => Ok(Arc::new(MemoryStore::new())),
            other => anyhow::bail!("unsupported storage type '{other}'"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_http_address() -> String {
    ":9998".to_string()
}

fn default_grpc_address() -> String {
    "localhost:6664".to_string()
}

fn credentials(db: &str) -> HashMap<String, String> {
    HashMap::from([
        ("host".to_string(), "localhost:6379".to_string()),
        ("db".to_string(), db.to_string()),
        ("password".to_string(), String::new()),
    ])
}

fn default_data_credentials() -> HashMap<String, String> {
    credentials("4")
}

fn default_fail2ban_storage() -> StorageConfig {
    StorageConfig {
        credentials: credentials("5"),
        storage_type: default_storage_type(),
    }
}

fn default_storage_type() -> String {
    "redis".to_string()
}

fn default_fail2ban_ttl() -> u64 {
    300_000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a JSON file.
///
/// A missing file produces the default configuration with a warning, so a
/// freshly-installed proxy can come up before anyone has written a config.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    Ok(config)
}

/// Listen addresses may omit the host (`:9998`); bindable form needs one.
pub fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.host.httpaddress, ":9998");
        assert_eq!(cfg.host.grpcaddress, "localhost:6664");
        assert_eq!(cfg.datastorage.storage_type, "redis");
        assert_eq!(cfg.datastorage.credentials["db"], "4");
        assert_eq!(cfg.fail2bandatastorage.credentials["db"], "5");
        assert_eq!(cfg.fail2banttl, 300_000);
        assert!(cfg.tlsskipverify);
        assert!(cfg.rules.is_empty());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "host": {"httpaddress": ":8080"},
                "rules": {
                    "^api\\.example$": [{"^/v1/": "http://upstream:8080"}]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.host.httpaddress, ":8080");
        assert_eq!(cfg.host.grpcaddress, "localhost:6664");
        assert_eq!(cfg.rules.len(), 1);
        assert_eq!(cfg.fail2banttl, 300_000);
    }

    #[test]
    fn storage_type_field_is_named_type() {
        let cfg: Config = serde_json::from_str(
            r#"{"datastorage": {"type": "memory", "credentials": {}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.datastorage.storage_type, "memory");
        assert!(cfg.datastorage.credentials.is_empty());
    }

    #[test]
    fn normalize_addr_fills_wildcard_host() {
        assert_eq!(normalize_addr(":9998"), "0.0.0.0:9998");
        assert_eq!(normalize_addr("localhost:6664"), "localhost:6664");
        assert_eq!(normalize_addr("10.0.0.1:80"), "10.0.0.1:80");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load(Path::new("/does/not/exist.json")).unwrap();
        assert_eq!(cfg.host.httpaddress, ":9998");
    }
}
