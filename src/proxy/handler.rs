//! Request orchestration
//!
//! Each request passes admission (per-client rate limit), then balancing,
//! then forwarding. A transport failure while forwarding takes the backend
//! out of rotation immediately instead of waiting for the next probe.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::http::connection::Handler;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::backend::{Balancer, BackendPool};
use crate::proxy::upstream::{Forwarder, HttpForwarder};
use crate::ratelimit::{Admission, RateLimiter, client_identity};

/// Seconds advertised in `Retry-After` on a 429.
pub const RETRY_AFTER_SECS: u64 = 10;

pub const NO_BACKEND_MESSAGE: &str = "no available backends";
pub const BACKEND_FAILED_MESSAGE: &str = "backend unavailable";

/// The proxy's request handler.
///
/// Generic over the balancing, admission and forwarding strategies; the
/// defaults are the round-robin pool, the token bucket limiter and the
/// plain HTTP forwarder. The pool and limiter are shared with the
/// background tasks that maintain them.
pub struct ProxyHandler<B = BackendPool, A = RateLimiter, F = HttpForwarder> {
    balancer: Arc<B>,
    admission: Arc<A>,
    forwarder: F,
}

impl<B, A, F> ProxyHandler<B, A, F>
where
    B: Balancer,
    A: Admission,
    F: Forwarder,
{
    pub fn new(balancer: Arc<B>, admission: Arc<A>, forwarder: F) -> Self {
        Self {
            balancer,
            admission,
            forwarder,
        }
    }

    pub fn balancer(&self) -> &Arc<B> {
        &self.balancer
    }

    pub fn admission(&self) -> &Arc<A> {
        &self.admission
    }

    /// Admission, then routing.
    pub async fn handle(&self, request: Request, peer: SocketAddr) -> Response {
        if let Some(rejection) = self.admit(&request, peer).await {
            return rejection;
        }

        self.route(&request, peer).await
    }

    /// Rate limit check. `None` means the request may proceed.
    pub async fn admit(&self, request: &Request, peer: SocketAddr) -> Option<Response> {
        let client = client_identity(request, peer);

        if self.admission.allow(&client).await {
            return None;
        }

        warn!(
            client = %client,
            method = %request.method,
            url = %request.path,
            user_agent = %request.user_agent(),
            "Rate limit exceeded"
        );

        Some(rate_limited())
    }

    /// Pick a backend and forward to it.
    pub async fn route(&self, request: &Request, peer: SocketAddr) -> Response {
        let Some(backend) = self.balancer.select_next() else {
            warn!(method = %request.method, path = %request.path, "No available backends");
            return Response::json_error(StatusCode::ServiceUnavailable, NO_BACKEND_MESSAGE);
        };

        info!(
            client = %peer.ip(),
            backend = %backend.url(),
            method = %request.method,
            path = %request.path,
            "Forwarding request"
        );

        match self.forwarder.forward(&backend, request, peer.ip()).await {
            Ok(response) => {
                debug!(
                    backend = %backend.url(),
                    status = response.status.as_u16(),
                    "Backend responded"
                );
                response
            }
            Err(e) => {
                error!(backend = %backend.url(), error = %format!("{e:#}"), "Proxy error");
                self.balancer.mark_dead(backend.url());
                Response::json_error(StatusCode::ServiceUnavailable, BACKEND_FAILED_MESSAGE)
            }
        }
    }
}

impl<B, A, F> Handler for ProxyHandler<B, A, F>
where
    B: Balancer,
    A: Admission,
    F: Forwarder,
{
    async fn handle(&self, request: Request, peer: SocketAddr) -> Response {
        ProxyHandler::handle(self, request, peer).await
    }
}

/// 429 with a `Retry-After` hint and a plain-text body.
pub fn rate_limited() -> Response {
    ResponseBuilder::new(StatusCode::TooManyRequests)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Retry-After", RETRY_AFTER_SECS.to_string())
        .body(b"rate limit exceeded\n".to_vec())
        .build()
}
