//! Client identification middleware.
//!
//! Reads the caller's identity from trusted headers and stores it as a request extension
//! before rate limiting runs. Anonymous requests pass through untouched.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::ClientIdentificationConfig;
use http::{Request, Response};
use tower::Layer;

use crate::client_identification::extract_client_identity;

#[derive(Clone)]
pub struct ClientIdentificationLayer(Arc<ClientIdentificationConfig>);

impl ClientIdentificationLayer {
    pub fn new(config: ClientIdentificationConfig) -> Self {
        Self(Arc::new(config))
    }
}

impl<Service> Layer<Service> for ClientIdentificationLayer
where
    Service: Send + Clone,
{
    type Service = ClientIdentificationService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        ClientIdentificationService {
            next,
            config: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ClientIdentificationService<Service> {
    next: Service,
    config: Arc<ClientIdentificationConfig>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for ClientIdentificationService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();

        match extract_client_identity(req.headers(), &self.config) {
            Some(identity) => {
                log::debug!("Identified client '{}'", identity.client_id);
                req.extensions_mut().insert(identity);
            }
            None => log::debug!("Anonymous request to {}", req.uri().path()),
        }

        Box::pin(async move { next.call(req).await })
    }
}

#[cfg(test)]
mod tests {
    use axum::{Extension, Router, routing::get};
    use config::{ClientIdentity, IdentificationSource};
    use tower::ServiceExt;

    use super::*;

    async fn whoami(identity: Option<Extension<ClientIdentity>>) -> String {
        identity
            .map(|Extension(identity)| identity.client_id)
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn app() -> Router {
        let config = ClientIdentificationConfig {
            enabled: true,
            client_id: IdentificationSource {
                http_header: "X-Client-Id".to_string(),
            },
        };

        Router::new()
            .route("/whoami", get(whoami))
            .layer(ClientIdentificationLayer::new(config))
    }

    async fn body(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn identity_is_stored_for_handlers() {
        let request = Request::get("/whoami")
            .header("x-client-id", "user-42")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(body(response).await, "user-42");
    }

    #[tokio::test]
    async fn anonymous_requests_pass() {
        let request = Request::get("/whoami").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(body(response).await, "anonymous");
    }
}
