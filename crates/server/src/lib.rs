//! Gatekeeper server library.
//!
//! Provides the admission-control middleware, and a reusable server function to serve
//! the configured protected operations either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod client_identification;
mod health;
mod key;
mod rate_limit;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use ::rate_limit::RateLimitManager;
use anyhow::anyhow;
use axum::{
    Extension, Json, Router,
    routing::{MethodRouter, any, get},
};
use config::Config;
use serde::Serialize;
use tokio::net::TcpListener;

use crate::client_identification::ClientIdentificationLayer;

pub use ::rate_limit::RateLimitDecision;
pub use crate::key::{KeyFnError, KeyStrategy, client_address};
pub use crate::rate_limit::{RateLimitLayer, RateLimitLayerBuilder, RateLimitService};

/// Address used when neither the command line nor `server.listen_address` sets one.
pub const DEFAULT_LISTEN_ADDRESS: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000);

/// Configuration for serving Gatekeeper.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Gatekeeper TOML configuration.
    pub config: Config,
}

impl ServeConfig {
    /// Picks the listen address: `listen_override` first, then `server.listen_address`, then
    /// [`DEFAULT_LISTEN_ADDRESS`].
    pub fn new(config: Config, listen_override: Option<SocketAddr>) -> Self {
        let listen_address = match (listen_override, config.server.listen_address) {
            (Some(address), Some(configured)) if address != configured => {
                log::info!("Listen address {address} overrides {configured} from the configuration");
                address
            }
            (Some(address), _) | (None, Some(address)) => address,
            (None, None) => DEFAULT_LISTEN_ADDRESS,
        };

        Self { listen_address, config }
    }
}

/// Body returned by a protected operation endpoint.
#[derive(Debug, Serialize)]
struct OperationResponse {
    operation: String,
    rate_limit: Option<RateLimitDecision>,
}

fn operation_endpoint(operation: String) -> MethodRouter {
    any(move |decision: Option<Extension<RateLimitDecision>>| {
        let operation = operation.clone();

        async move {
            Json(OperationResponse {
                operation,
                rate_limit: decision.map(|Extension(decision)| decision),
            })
        }
    })
}

/// Builds the application: one endpoint per configured rule, each behind its quotas.
///
/// Rules are validated here, so a malformed quota fails startup instead of the first request.
pub async fn router(config: &Config) -> anyhow::Result<Router> {
    config.validate()?;

    let mut app = Router::new();
    let rate_limits = &config.rate_limits;

    if rate_limits.enabled {
        log::debug!("Initializing rate limit manager with {} rules", rate_limits.rules.len());
        let manager = Arc::new(RateLimitManager::from_config(rate_limits).await?);

        for rule in &rate_limits.rules {
            let layer = RateLimitLayer::from_rule(manager.clone(), rule)
                .map_err(|e| anyhow!("Invalid rate limit rule for '{}': {e}", rule.path))?;

            log::info!("Rate limiting {} as '{}' at {}", rule.path, rule.operation(), rule.rate.join(", "));

            app = app.route(&rule.path, operation_endpoint(rule.operation().to_string()).route_layer(layer));
        }
    } else {
        log::debug!("Rate limiting disabled - operations are served without limits");

        for rule in &rate_limits.rules {
            app = app.route(&rule.path, operation_endpoint(rule.operation().to_string()));
        }
    }

    if config.server.health.enabled {
        app = app.route(&config.server.health.path, get(health::health));
    }

    // Applied last so it runs before any rate limit layer.
    if let Some(identification) = &config.server.client_identification
        && identification.enabled
    {
        app = app.layer(ClientIdentificationLayer::new(identification.clone()));
    }

    Ok(app)
}

/// Starts and runs the Gatekeeper server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let app = router(&config).await?;

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if config.rate_limits.rules.is_empty() {
        log::warn!("Server starting with no protected operations. Add [[rate_limits.rules]] to configure some.");
    }

    log::info!("Gatekeeper listening on http://{listen_address}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for the shutdown signal: {e}");
        std::future::pending::<()>().await;
    }

    log::info!("Shutting down");
}
