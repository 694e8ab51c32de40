//! Rate limiting middleware for HTTP requests.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::RuleConfig;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use rate_limit::{CounterStorage, RateLimitDecision, RateLimitError, RateLimitManager, RateSpec, Storage, parse_rates};
use tower::Layer;

use crate::key::KeyStrategy;

struct Protection<S> {
    manager: Arc<RateLimitManager<S>>,
    key: KeyStrategy,
    operation: Option<String>,
    specs: Vec<RateSpec>,
    methods: Option<Vec<Method>>,
    block: bool,
}

impl<S> Protection<S> {
    fn applies_to(&self, method: &Method) -> bool {
        self.methods.as_ref().is_none_or(|methods| methods.contains(method))
    }
}

/// Puts one protected operation behind its quotas.
///
/// Over-quota requests get a 429 unless blocking is off. Every counted request carries its
/// [`RateLimitDecision`] as a request extension.
pub struct RateLimitLayer<S = Storage>(Arc<Protection<S>>);

impl<S> Clone for RateLimitLayer<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S: CounterStorage> RateLimitLayer<S> {
    /// Starts a layer counting against `manager`.
    pub fn builder(manager: Arc<RateLimitManager<S>>) -> RateLimitLayerBuilder<S> {
        RateLimitLayerBuilder {
            manager,
            key: KeyStrategy::ByAddress,
            operation: None,
            rates: Vec::new(),
            methods: None,
            block: true,
        }
    }

    /// A layer for a configured rule.
    pub fn from_rule(manager: Arc<RateLimitManager<S>>, rule: &RuleConfig) -> Result<Self, RateLimitError> {
        let mut builder = Self::builder(manager)
            .key((&rule.key).into())
            .operation(rule.operation())
            .rates(rule.rate.iter().cloned())
            .block(rule.block);

        if let Some(methods) = &rule.methods {
            builder = builder.methods(methods.iter().cloned());
        }

        builder.build()
    }
}

/// Builder for [`RateLimitLayer`]. Quotas and methods are checked by [`build`](Self::build).
pub struct RateLimitLayerBuilder<S> {
    manager: Arc<RateLimitManager<S>>,
    key: KeyStrategy,
    operation: Option<String>,
    rates: Vec<String>,
    methods: Option<Vec<String>>,
    block: bool,
}

impl<S: CounterStorage> RateLimitLayerBuilder<S> {
    /// How callers are told apart. Defaults to their address.
    pub fn key(mut self, key: KeyStrategy) -> Self {
        self.key = key;
        self
    }

    /// Operation name used in keys. Defaults to the request path.
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Adds a quota such as `"30/h"`.
    pub fn rate(mut self, rate: impl Into<String>) -> Self {
        self.rates.push(rate.into());
        self
    }

    /// Adds several quotas, all enforced together.
    pub fn rates<I, R>(mut self, rates: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.rates.extend(rates.into_iter().map(Into::into));
        self
    }

    /// Only counts requests with one of these methods; others pass untouched.
    pub fn methods<I, M>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// When false, over-quota requests still reach the handler, flagged as limited.
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Validates the quotas and method filter.
    pub fn build(self) -> Result<RateLimitLayer<S>, RateLimitError> {
        let specs = parse_rates(&self.rates)?;

        let methods = self
            .methods
            .map(|methods| {
                methods
                    .iter()
                    .map(|method| {
                        Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                            .map_err(|_| RateLimitError::InvalidMethod(method.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(RateLimitLayer(Arc::new(Protection {
            manager: self.manager,
            key: self.key,
            operation: self.operation,
            specs,
            methods,
            block: self.block,
        })))
    }
}

impl<Service, S> Layer<Service> for RateLimitLayer<S>
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service, S>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            protection: self.0.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
pub struct RateLimitService<Service, S = Storage> {
    next: Service,
    protection: Arc<Protection<S>>,
}

impl<Service: Clone, S> Clone for RateLimitService<Service, S> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            protection: self.protection.clone(),
        }
    }
}

impl<Service, S, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service, S>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: 'static,
    S: CounterStorage,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let protection = self.protection.clone();

        Box::pin(async move {
            if !protection.applies_to(req.method()) {
                return next.call(req).await;
            }

            let (mut parts, body) = req.into_parts();

            let operation = protection.operation.as_deref().unwrap_or(parts.uri.path());
            let key = protection.key.resolve(&parts, operation);

            let decision = protection.manager.check_all(&key, &protection.specs).await;

            if decision.limited {
                if protection.block {
                    log::debug!("Request rejected due to rate limit: {key}");

                    let now = protection.manager.clock().now();
                    return Ok(too_many_requests(&decision, decision.retry_after(now)));
                }

                log::debug!("Rate limit exceeded for {key}, passing the request on flagged");
            }

            parts.extensions.insert(decision);
            next.call(Request::from_parts(parts, body)).await
        })
    }
}

fn too_many_requests(decision: &RateLimitDecision, retry_after: u64) -> Response<Body> {
    let mut response = Response::new(Body::from("Rate limit exceeded"));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining()));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset.as_second()));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));

    response
}
