//! Rate-limit key resolution: who is being limited, for which operation.

use std::{fmt, net::SocketAddr, sync::Arc};

use axum::extract::ConnectInfo;
use config::{ClientIdentity, KeySource};
use http::request::Parts;

/// Error type a custom key function may fail with.
pub type KeyFnError = Box<dyn std::error::Error + Send + Sync>;

type KeyFn = dyn Fn(&Parts) -> Result<String, KeyFnError> + Send + Sync;

/// How callers of a protected operation are told apart.
#[derive(Clone)]
pub enum KeyStrategy {
    /// The authenticated client id. Anonymous callers are keyed by address.
    ByIdentity,
    /// The caller's network address.
    ByAddress,
    /// The raw value of a request header, `unknown` when absent. Stored lowercase.
    ByHeader(String),
    /// A caller-supplied function. Failures fall back to the address.
    Custom(Arc<KeyFn>),
}

impl KeyStrategy {
    /// Keys callers by the value of the named header.
    pub fn header(name: impl AsRef<str>) -> Self {
        Self::ByHeader(name.as_ref().to_ascii_lowercase())
    }

    /// Keys callers with a function of the request head.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Parts) -> Result<String, KeyFnError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Builds the key `ratelimit:<strategy>:<identifier>:<operation>`.
    ///
    /// The strategy segment names the strategy that produced the identifier, so a fallback
    /// to the address shares its counter with the address strategy for the same operation.
    pub fn resolve(&self, parts: &Parts, operation: &str) -> String {
        let (strategy, identifier) = self.identify(parts);

        format!("ratelimit:{strategy}:{identifier}:{operation}")
    }

    fn identify(&self, parts: &Parts) -> (String, String) {
        match self {
            KeyStrategy::ByIdentity => match parts.extensions.get::<ClientIdentity>() {
                Some(identity) => ("identity".to_string(), identity.client_id.clone()),
                None => ("address".to_string(), client_address(parts)),
            },
            KeyStrategy::ByAddress => ("address".to_string(), client_address(parts)),
            KeyStrategy::ByHeader(name) => {
                let value = parts
                    .headers
                    .get(name.as_str())
                    .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                    .unwrap_or_else(|| "unknown".to_string());

                (format!("header:{name}"), value)
            }
            KeyStrategy::Custom(f) => match f(parts) {
                Ok(identifier) => ("custom".to_string(), identifier),
                Err(e) => {
                    log::warn!(
                        "Custom rate limit key failed for {} {}, falling back to the client address: {e}",
                        parts.method,
                        parts.uri.path()
                    );

                    ("address".to_string(), client_address(parts))
                }
            },
        }
    }
}

impl From<&KeySource> for KeyStrategy {
    fn from(source: &KeySource) -> Self {
        match source {
            KeySource::Identity => KeyStrategy::ByIdentity,
            KeySource::Address => KeyStrategy::ByAddress,
            KeySource::Header(name) => KeyStrategy::header(name),
        }
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByIdentity => f.write_str("ByIdentity"),
            Self::ByAddress => f.write_str("ByAddress"),
            Self::ByHeader(name) => f.debug_tuple("ByHeader").field(name).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// The caller's address: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer
/// address of the connection, then `unknown`.
///
/// Forwarding headers are taken at face value; only expose this behind a proxy that sets them.
pub fn client_address(parts: &Parts) -> String {
    let forwarded_for = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(address) = forwarded_for {
        return address.to_string();
    }

    let real_ip = parts
        .headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(address) = real_ip {
        return address.to_string();
    }

    match parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(peer)) => peer.ip().to_string(),
        None => "unknown".to_string(),
    }
}
