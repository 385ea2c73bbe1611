pub mod config;
pub mod config_validator;
pub mod error;
pub mod gemini;
pub mod handlers;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod redis;
pub mod response;
pub mod server;
pub mod validation;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use handlers::{AppState, SharedState};
pub use server::{create_app, Server};
