use axum::http::{header, HeaderMap};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::error::{GatewayError, NOT_JSON_MESSAGE, PROMPT_REQUIRED_MESSAGE};

/// Body of `POST /generate`
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(
        required(message = "prompt is required"),
        length(min = 1, message = "prompt cannot be empty")
    )]
    pub prompt: Option<String>,
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// `application/json` or any `application/*+json`, parameters allowed
    pub fn is_json_content_type(headers: &HeaderMap) -> bool {
        let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        else {
            return false;
        };

        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
    }

    /// Validates a generation request and returns its prompt
    pub fn validate_generate_request(headers: &HeaderMap, body: &[u8]) -> Result<String, GatewayError> {
        if !Self::is_json_content_type(headers) {
            return Err(GatewayError::InvalidRequest(NOT_JSON_MESSAGE.to_string()));
        }

        let value: Value = serde_json::from_slice(body)
            .map_err(|_| GatewayError::InvalidRequest(NOT_JSON_MESSAGE.to_string()))?;

        let prompt_required = || GatewayError::InvalidRequest(PROMPT_REQUIRED_MESSAGE.to_string());

        // serde would also accept `["..."]` for a struct
        if !value.is_object() {
            return Err(prompt_required());
        }

        let request: GenerateRequest =
            serde_json::from_value(value).map_err(|_| prompt_required())?;
        request.validate().map_err(|_| prompt_required())?;

        request.prompt.ok_or_else(prompt_required)
    }
}
