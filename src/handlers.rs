use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Html,
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::GatewayError;
use crate::gemini::GeminiClient;
use crate::key_generator::KeyGenerator;
use crate::rate_limiter::RateLimiter;
use crate::redis::RedisClient;
use crate::response::GeneratedTextResponse;
use crate::validation::RequestValidator;

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Everything a request needs, built once from the configuration
pub struct AppState {
    pub gemini: GeminiClient,
    pub rate_limiter: RateLimiter,
    pub key_generator: KeyGenerator,
}

impl AppState {
    /// Connects to Redis when configured, otherwise counts in memory.
    pub async fn from_config(config: &Config) -> Result<SharedState, GatewayError> {
        let rate_limit_config = config.rate_limit_config();
        if rate_limit_config.is_empty() {
            warn!("No rate limits configured; every request is allowed");
        }

        let rate_limiter = match config.redis_url() {
            Some(url) => {
                let redis_client = RedisClient::connect(url).await?;
                info!("Rate limit counters stored in Redis");
                RateLimiter::with_redis(rate_limit_config, redis_client)
            }
            None => {
                info!("REDIS_URL not set; rate limit counters kept in memory (single instance only)");
                RateLimiter::in_memory(rate_limit_config)
            }
        };

        let gemini = GeminiClient::new(config)?;
        if !gemini.is_configured() {
            error!("GOOGLE_API_KEY is not set; /generate will fail until it is configured");
        }

        Ok(Arc::new(AppState {
            gemini,
            rate_limiter,
            key_generator: KeyGenerator::new(config.trust_forwarded_for),
        }))
    }
}

/// Landing page
pub async fn home(State(state): State<SharedState>) -> Html<String> {
    Html(INDEX_TEMPLATE.replace("{{ model_name }}", &escape_html(state.gemini.model())))
}

/// Generate text for a prompt
pub async fn generate_text(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GeneratedTextResponse>, GatewayError> {
    let prompt = RequestValidator::validate_generate_request(&headers, &body)?;
    let generated_text = state.gemini.generate(&prompt).await?;

    Ok(Json(GeneratedTextResponse::new(generated_text)))
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
