use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;
use thiserror::Error;

use crate::response::ErrorResponse;

pub const NOT_JSON_MESSAGE: &str = "A requisição deve ser do tipo JSON";
pub const PROMPT_REQUIRED_MESSAGE: &str = "O campo 'prompt' é obrigatório no JSON da requisição.";
pub const API_KEY_MISSING_MESSAGE: &str =
    "A API Key para a API Gemini não está configurada no servidor.";
pub const RATE_LIMITED_MESSAGE: &str =
    "Limite de requisições excedido. Por favor, tente novamente mais tarde.";
pub const UPSTREAM_FAILURE_MESSAGE: &str =
    "Ocorreu um erro ao processar sua solicitação com a API Gemini.";
pub const STORE_UNAVAILABLE_MESSAGE: &str =
    "O serviço de controle de requisições está indisponível no momento.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Erro interno do servidor.";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("server misconfigured: {0}")]
    ServerMisconfigured(String),

    #[error("Gemini API call failed: {0}")]
    Upstream(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::Redis(err.to_string())
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ServerMisconfigured(_)
            | GatewayError::Upstream(_)
            | GatewayError::Config(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON body sent to the caller. Internal details only leak for
    /// upstream failures, where the caller gets the raw error text.
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            GatewayError::InvalidRequest(msg) | GatewayError::ServerMisconfigured(msg) => {
                ErrorResponse::new(msg)
            }
            GatewayError::RateLimited { .. } => ErrorResponse::new(RATE_LIMITED_MESSAGE),
            GatewayError::Upstream(details) => {
                ErrorResponse::with_details(UPSTREAM_FAILURE_MESSAGE, details)
            }
            GatewayError::Redis(_) => ErrorResponse::new(STORE_UNAVAILABLE_MESSAGE),
            GatewayError::Config(_) | GatewayError::Internal(_) => {
                ErrorResponse::new(INTERNAL_ERROR_MESSAGE)
            }
        }
    }
}

/// Whole seconds until retry, rounded up and never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        }

        let mut response = (status, Json(self.to_error_response())).into_response();

        if let GatewayError::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::RateLimited { retry_after: Duration::from_secs(1) }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::ServerMisconfigured("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Upstream("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Redis("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_error_carries_details() {
        let body = GatewayError::Upstream("503 Service Unavailable: overloaded".into())
            .to_error_response();
        assert_eq!(body.error, UPSTREAM_FAILURE_MESSAGE);
        assert_eq!(body.details.as_deref(), Some("503 Service Unavailable: overloaded"));
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let body = GatewayError::Internal("poisoned lock".into()).to_error_response();
        assert_eq!(body.error, INTERNAL_ERROR_MESSAGE);
        assert!(body.details.is_none());

        let body = GatewayError::Redis("connection refused".into()).to_error_response();
        assert_eq!(body.error, STORE_UNAVAILABLE_MESSAGE);
        assert!(body.details.is_none());
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let response = GatewayError::RateLimited {
            retry_after: Duration::from_millis(1500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(10)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(3600)), 3600);
    }
}
