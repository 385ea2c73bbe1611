//! Client identity resolution and counter key generation for rate limiting.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use std::net::SocketAddr;

use crate::rate_limit_config::RateLimitRule;

const KEY_PREFIX: &str = "gemini-gateway";
const UNKNOWN_CLIENT: &str = "unknown";

/// Scope of the rules that apply to every route
pub const GLOBAL_SCOPE: &str = "global";

/// Derives the identity a request is rate limited under
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    trust_forwarded_for: bool,
}

impl KeyGenerator {
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self {
            trust_forwarded_for,
        }
    }

    /// First `X-Forwarded-For` entry when trusted, else the peer address.
    pub fn client_identity<B>(&self, request: &Request<B>) -> String {
        if self.trust_forwarded_for {
            if let Some(forwarded) = Self::extract_forwarded_for(request.headers()) {
                return forwarded;
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    /// First non-empty entry of `X-Forwarded-For`
    pub fn extract_forwarded_for(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(ToString::to_string)
    }

    /// Counter key for one rule in one scope
    pub fn window_key(scope: &str, rule: &RateLimitRule, identity: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            KEY_PREFIX,
            scope,
            rule.limit,
            rule.window.as_millis(),
            Self::sanitize_key(identity)
        )
    }

    /// Sanitize key components to ensure valid Redis keys
    pub fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, ':' | '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(true)
    }
}
