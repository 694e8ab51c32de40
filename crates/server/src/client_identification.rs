mod middleware;

use config::{ClientIdentificationConfig, ClientIdentity, IdentificationSource};
use http::HeaderMap;
pub use middleware::ClientIdentificationLayer;

/// Extract client identity from request headers set by a trusted authenticating proxy.
///
/// Returns `None` when identification is disabled or the caller sent no client id; such
/// callers are anonymous and the `identity` key strategy keys them by address.
pub fn extract_client_identity(headers: &HeaderMap, config: &ClientIdentificationConfig) -> Option<ClientIdentity> {
    if !config.enabled {
        return None;
    }

    extract_from_source(headers, &config.client_id).map(ClientIdentity::new)
}

fn extract_from_source(headers: &HeaderMap, source: &IdentificationSource) -> Option<String> {
    headers
        .get(source.http_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
