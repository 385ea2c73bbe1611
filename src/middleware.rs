use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::handlers::SharedState;
use crate::rate_limiter::RateLimitDecision;

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let peer = peer_addr(&request);
    let started = Instant::now();

    info!(
        target: "gemini_gateway::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        peer = %peer,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    info!(
        target: "gemini_gateway::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Rejects the request with 429 when any applicable window is full.
pub async fn rate_limit_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let identity = state.key_generator.client_identity(&request);
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());

    match state.rate_limiter.check(&identity, route.as_deref()).await? {
        RateLimitDecision::Allowed => Ok(next.run(request).await),
        RateLimitDecision::Limited { rule, retry_after } => {
            warn!(
                target: "gemini_gateway::middleware",
                client = %identity,
                route = route.as_deref().unwrap_or("-"),
                limit = %rule,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            Err(GatewayError::RateLimited { retry_after })
        }
    }
}

fn peer_addr(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_peer_addr_from_connect_info() {
        let mut request = Request::new(Body::empty());
        let addr: SocketAddr = "192.0.2.10:41000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        assert_eq!(peer_addr(&request), "192.0.2.10:41000");
    }

    #[test]
    fn test_peer_addr_fallback() {
        let request = Request::new(Body::empty());
        assert_eq!(peer_addr(&request), "unknown");
    }
}
