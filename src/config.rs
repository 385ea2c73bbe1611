use clap::{ArgAction, Parser};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::config_validator::ConfigValidator;
use crate::error::GatewayError;
use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::rate_limit_config::{LimitSet, RateLimitConfig, RateLimitRule};

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Service configuration, read once at startup from the environment
/// (a `.env` file is loaded first) or the matching command line flags.
#[derive(Debug, Clone, Parser)]
#[command(name = "gemini-gateway", version, about)]
pub struct Config {
    /// Gemini API key; `/generate` answers 500 while it is missing
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Address to listen on
    #[arg(long, env = "HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Redis URL for shared rate limit counters; in-memory when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Gemini model identifier
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub gemini_model: String,

    /// Root URL of the Gemini REST API
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub gemini_base_url: String,

    /// Timeout for one Gemini call, e.g. `30s`
    #[arg(long, env = "GEMINI_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub gemini_timeout: Duration,

    /// Limits on every route, e.g. `200 per day;10 per hour`
    #[arg(long, env = "DEFAULT_LIMITS", default_value = "200 per day;10 per hour")]
    pub default_limits: LimitSet,

    /// Extra limits on `/generate`
    #[arg(long, env = "GENERATE_LIMITS", default_value = "10 per hour")]
    pub generate_limits: LimitSet,

    /// Rate limit by the first `X-Forwarded-For` entry. Only safe behind a
    /// proxy that overwrites the header.
    #[arg(long, env = "TRUST_FORWARDED_FOR", default_value_t = true, action = ArgAction::Set)]
    pub trust_forwarded_for: bool,

    /// How often expired in-memory counters are dropped
    #[arg(long, env = "RATE_LIMIT_CLEANUP_INTERVAL", default_value = "5m", value_parser = parse_duration)]
    pub rate_limit_cleanup_interval: Duration,

    /// Log level for this crate when `RUST_LOG` is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            google_api_key: None,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5000,
            redis_url: None,
            gemini_model: DEFAULT_MODEL.to_string(),
            gemini_base_url: DEFAULT_BASE_URL.to_string(),
            gemini_timeout: Duration::from_secs(30),
            default_limits: LimitSet(vec![RateLimitRule::per_day(200), RateLimitRule::per_hour(10)]),
            generate_limits: LimitSet(vec![RateLimitRule::per_hour(10)]),
            trust_forwarded_for: true,
            rate_limit_cleanup_interval: Duration::from_secs(300),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and flags
    pub fn from_env() -> Result<Self, clap::Error> {
        Config::try_parse()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// The API key, treating a blank value as unset
    pub fn api_key(&self) -> Option<&str> {
        self.google_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.default_limits.clone(), self.generate_limits.clone())
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if let Some(url) = self.redis_url() {
            ConfigValidator::validate_redis_url(url)?;
        }
        ConfigValidator::validate_base_url(&self.gemini_base_url)?;
        ConfigValidator::validate_model(&self.gemini_model)?;
        ConfigValidator::validate_duration("GEMINI_TIMEOUT", self.gemini_timeout)?;
        ConfigValidator::validate_duration(
            "RATE_LIMIT_CLEANUP_INTERVAL",
            self.rate_limit_cleanup_interval,
        )?;
        Ok(())
    }
}
