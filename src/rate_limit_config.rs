use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

pub const GENERATE_ROUTE: &str = "/generate";

const SECOND: u64 = 1;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const YEAR: u64 = 365 * DAY;

/// Longest window a rule may use
pub const MAX_WINDOW: Duration = Duration::from_secs(100 * YEAR);

/// `<count> per <n>? <unit>` or `<count>/<n>? <unit>`, e.g. `200 per day`, `10/hour`.
static RULE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+)\s*(?:/|\s+per\s+)\s*(\d+)?\s*(second|minute|hour|day|month|year)s?\s*$")
        .expect("rate limit rule pattern is valid")
});

/// A single fixed-window ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn per_hour(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(HOUR))
    }

    pub fn per_day(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(DAY))
    }

    /// Validate rule parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.limit == 0 {
            return Err("Rate limit must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("Rate limit window must be greater than 0".to_string());
        }
        if self.window > MAX_WINDOW {
            return Err(format!(
                "Rate limit window must be at most {}",
                humantime_serde::re::humantime::format_duration(MAX_WINDOW)
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RateLimitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} per {}",
            self.limit,
            humantime_serde::re::humantime::format_duration(self.window)
        )
    }
}

impl FromStr for RateLimitRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = RULE_PATTERN
            .captures(s)
            .ok_or_else(|| format!("Invalid rate limit '{}', expected e.g. '10 per hour'", s.trim()))?;

        let limit: u64 = captures[1]
            .parse()
            .map_err(|e| format!("Invalid rate limit count in '{}': {}", s.trim(), e))?;
        let multiplier: u64 = match captures.get(2) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|e| format!("Invalid window size in '{}': {}", s.trim(), e))?,
            None => 1,
        };
        let unit_secs = match captures[3].to_lowercase().as_str() {
            "second" => SECOND,
            "minute" => MINUTE,
            "hour" => HOUR,
            "day" => DAY,
            "month" => 30 * DAY,
            _ => YEAR,
        };
        let window_secs = unit_secs
            .checked_mul(multiplier)
            .ok_or_else(|| format!("Rate limit window too large in '{}'", s.trim()))?;

        let rule = RateLimitRule::new(limit, Duration::from_secs(window_secs));
        rule.validate()?;
        Ok(rule)
    }
}

/// An ordered list of rules, written as `200 per day; 10 per hour`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimitSet(pub Vec<RateLimitRule>);

impl LimitSet {
    pub fn rules(&self) -> &[RateLimitRule] {
        &self.0
    }
}

impl FromStr for LimitSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split([';', ','])
            .filter(|part| !part.trim().is_empty())
            .map(RateLimitRule::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map(LimitSet)
    }
}

impl fmt::Display for LimitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&rules.join("; "))
    }
}

/// Rules applied to every route plus extra rules for individual routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub default_limits: LimitSet,
    pub route_limits: HashMap<String, LimitSet>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(
            LimitSet(vec![RateLimitRule::per_day(200), RateLimitRule::per_hour(10)]),
            LimitSet(vec![RateLimitRule::per_hour(10)]),
        )
    }
}

impl RateLimitConfig {
    pub fn new(default_limits: LimitSet, generate_limits: LimitSet) -> Self {
        let mut route_limits = HashMap::new();
        if !generate_limits.0.is_empty() {
            route_limits.insert(GENERATE_ROUTE.to_string(), generate_limits);
        }
        Self {
            default_limits,
            route_limits,
        }
    }

    /// Rules for a route, if it has any of its own
    pub fn route_rules(&self, route: &str) -> &[RateLimitRule] {
        self.route_limits
            .get(route)
            .map(LimitSet::rules)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.default_limits.0.is_empty() && self.route_limits.values().all(|set| set.0.is_empty())
    }
}
