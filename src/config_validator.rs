use crate::error::GatewayError;
use std::time::Duration;

/// Validates configuration values before the server starts
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), GatewayError> {
        if url.is_empty() {
            return Err(GatewayError::Config("Redis URL cannot be empty".to_string()));
        }

        if !["redis://", "rediss://", "unix://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(GatewayError::Config(
                "Redis URL must start with 'redis://', 'rediss://' or 'unix://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the Gemini API root URL
    pub fn validate_base_url(url: &str) -> Result<(), GatewayError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(GatewayError::Config(format!(
                "Gemini base URL '{}' must start with 'http://' or 'https://'",
                url
            )));
        }

        Ok(())
    }

    /// Validates a model identifier, which ends up in the request path
    pub fn validate_model(model: &str) -> Result<(), GatewayError> {
        if model.trim().is_empty() {
            return Err(GatewayError::Config("Gemini model cannot be empty".to_string()));
        }

        if model.contains('/') || model.chars().any(char::is_whitespace) {
            return Err(GatewayError::Config(format!(
                "Gemini model '{}' cannot contain '/' or whitespace",
                model
            )));
        }

        Ok(())
    }

    pub fn validate_duration(name: &str, value: Duration) -> Result<(), GatewayError> {
        if value.is_zero() {
            return Err(GatewayError::Config(format!("{} must be greater than 0", name)));
        }

        Ok(())
    }
}
