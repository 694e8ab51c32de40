//! Admission control configuration structures.

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Admission control configuration for the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Upper bound for one read-modify-write round trip against the store.
    /// Slower round trips count as store failures and the request is admitted.
    #[serde(default = "default_store_timeout", deserialize_with = "deserialize_duration")]
    pub store_timeout: Duration,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Protected operations.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            store_timeout: default_store_timeout(),
            storage: StorageConfig::default(),
            rules: Vec::new(),
        }
    }
}

fn default_store_timeout() -> Duration {
    Duration::from_millis(250)
}

/// One protected operation: a route, how callers are told apart, and the quotas they share.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Route path the operation is mounted at.
    pub path: String,
    /// Operation name used in rate-limit keys. Defaults to the path.
    #[serde(default)]
    pub name: Option<String>,
    /// Caller identification strategy.
    #[serde(default)]
    pub key: KeySource,
    /// One rate spec (`"30/h"`) or a list of them, all enforced together.
    #[serde(deserialize_with = "deserialize_rates")]
    pub rate: Vec<String>,
    /// Only requests with one of these methods are counted. All methods when unset.
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    /// Reject over-quota requests with 429. When false the request goes through flagged.
    #[serde(default = "default_block")]
    pub block: bool,
}

impl RuleConfig {
    /// Name of the operation as it appears in rate-limit keys.
    pub fn operation(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }
}

fn default_block() -> bool {
    true
}

fn deserialize_rates<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(rate) => vec![rate],
        OneOrMany::Many(rates) => rates,
    })
}

/// How the caller of a protected operation is identified.
///
/// Written in configuration as `"identity"`, `"address"` or `"header:<name>"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum KeySource {
    /// The authenticated client id, falling back to the address for anonymous callers.
    Identity,
    /// The network address of the caller.
    #[default]
    Address,
    /// The raw value of a request header.
    Header(String),
}

impl TryFrom<String> for KeySource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("identity") {
            return Ok(Self::Identity);
        }

        if value.eq_ignore_ascii_case("address") {
            return Ok(Self::Address);
        }

        let Some((prefix, name)) = value.split_once(':') else {
            return Err(format!(
                "unknown key strategy '{value}', expected 'identity', 'address' or 'header:<name>'"
            ));
        };

        if !prefix.eq_ignore_ascii_case("header") {
            return Err(format!(
                "unknown key strategy '{value}', expected 'identity', 'address' or 'header:<name>'"
            ));
        }

        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(format!("invalid header name in key strategy '{value}'"));
        }

        Ok(Self::Header(name.to_string()))
    }
}

/// Configuration for the in-memory store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryStorageConfig {
    /// Maximum number of counters kept at once.
    pub max_entries: u64,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self { max_entries: 100_000 }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default). Counters are local to the process.
    Memory(MemoryStorageConfig),
    /// Redis storage, shared by every process pointing at the same server.
    Redis(Box<RedisConfig>),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory(MemoryStorageConfig::default())
    }
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Prefix prepended to every counter key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "gatekeeper:".to_string()
}

/// Redis connection pool configuration. Unset fields keep their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
