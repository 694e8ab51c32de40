//! Gatekeeper configuration structures to map the gatekeeper.toml configuration.

#![deny(missing_docs)]

mod client_identity;
mod loader;
mod rate_limit;

use std::{borrow::Cow, net::SocketAddr, path::Path};

pub use client_identity::ClientIdentity;
pub use rate_limit::*;
use serde::Deserialize;

/// Main configuration structure for the Gatekeeper application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Admission control configuration.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates rule paths and quotas, returning warnings for suspicious but legal setups.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        loader::validate(self)
    }
}

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Health endpoint configuration.
    #[serde(default)]
    pub health: HealthConfig,
    /// Trusted-header client identification, feeding the `identity` key strategy.
    #[serde(default)]
    pub client_identification: Option<ClientIdentificationConfig>,
}

/// Where a piece of client identity is read from.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentificationSource {
    /// HTTP header name (e.g., "X-User-Id"), set by a trusted authenticating proxy.
    pub http_header: String,
}

/// Client identification extraction configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientIdentificationConfig {
    /// Whether client identification is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Client ID extraction source.
    pub client_id: IdentificationSource,
}

/// Health endpoint configuration.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is enabled.
    pub enabled: bool,
    /// The path for the health endpoint.
    pub path: Cow<'static, str>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            enabled: true,
            path: Cow::Borrowed("/health"),
        }
    }
}
