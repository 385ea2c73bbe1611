use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{GatewayError, Result};
use crate::key_generator::{KeyGenerator, GLOBAL_SCOPE};
use crate::rate_limit_config::{RateLimitConfig, RateLimitRule};
use crate::redis::RedisClient;

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited {
        rule: RateLimitRule,
        retry_after: Duration,
    },
}

/// Fixed-window counters keyed by client identity.
///
/// A window opens on the first request that hits it and closes `rule.window`
/// later, in both backends.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<Mutex<HashMap<String, LocalWindow>>>),
    Redis(Arc<RedisClient>),
}

/// In-memory counter for one window
#[derive(Debug, Clone, Copy)]
struct LocalWindow {
    count: u64,
    expires_at: Instant,
}

impl LocalWindow {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl RateLimiter {
    /// In-process counters; single instance only and lost on restart.
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Counters shared through Redis, for multi-instance deployments.
    pub fn with_redis(config: RateLimitConfig, redis_client: RedisClient) -> Self {
        Self {
            config: Arc::new(config),
            backend: Backend::Redis(Arc::new(redis_client)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Redis(_) => "redis",
        }
    }

    /// Counter keys and rules that apply to a request on `route`
    fn windows_for(&self, identity: &str, route: Option<&str>) -> Vec<(String, RateLimitRule)> {
        let global = self
            .config
            .default_limits
            .rules()
            .iter()
            .map(|rule| (KeyGenerator::window_key(GLOBAL_SCOPE, rule, identity), *rule));

        let scoped = route.into_iter().flat_map(|route| {
            self.config
                .route_rules(route)
                .iter()
                .map(move |rule| (KeyGenerator::window_key(route, rule, identity), *rule))
        });

        global.chain(scoped).collect()
    }

    /// Check-and-increment every applicable window for `identity`.
    ///
    /// Nothing is incremented when any window is already full.
    pub async fn check(&self, identity: &str, route: Option<&str>) -> Result<RateLimitDecision> {
        let windows = self.windows_for(identity, route);
        if windows.is_empty() {
            return Ok(RateLimitDecision::Allowed);
        }

        match &self.backend {
            Backend::Memory(store) => Self::hit_local(store, &windows, Instant::now()),
            Backend::Redis(client) => Ok(match client.hit_windows(&windows).await? {
                None => RateLimitDecision::Allowed,
                Some(full) => RateLimitDecision::Limited {
                    rule: windows[full.index].1,
                    retry_after: full.retry_after,
                },
            }),
        }
    }

    fn hit_local(
        store: &Mutex<HashMap<String, LocalWindow>>,
        windows: &[(String, RateLimitRule)],
        now: Instant,
    ) -> Result<RateLimitDecision> {
        let mut counters = store
            .lock()
            .map_err(|_| GatewayError::Internal("Failed to acquire rate limit lock".to_string()))?;

        let mut expiries = Vec::with_capacity(windows.len());
        for (key, rule) in windows {
            if let Some(window) = counters.get(key) {
                if !window.is_expired(now) && window.count >= rule.limit {
                    return Ok(RateLimitDecision::Limited {
                        rule: *rule,
                        retry_after: window.expires_at.saturating_duration_since(now),
                    });
                }
            }
            let expires_at = now.checked_add(rule.window).ok_or_else(|| {
                GatewayError::Internal(format!("Rate limit window out of range: {}", rule))
            })?;
            expiries.push(expires_at);
        }

        for ((key, _), expires_at) in windows.iter().zip(expiries) {
            let window = counters
                .entry(key.clone())
                .or_insert(LocalWindow { count: 0, expires_at });
            if window.is_expired(now) {
                window.count = 0;
                window.expires_at = expires_at;
            }
            window.count += 1;
        }

        Ok(RateLimitDecision::Allowed)
    }

    /// Drop expired in-memory windows. Redis expires keys on its own.
    pub fn purge_expired(&self) -> Result<usize> {
        let Backend::Memory(store) = &self.backend else {
            return Ok(0);
        };

        let now = Instant::now();
        let mut counters = store
            .lock()
            .map_err(|_| GatewayError::Internal("Failed to acquire rate limit lock".to_string()))?;

        let initial_count = counters.len();
        counters.retain(|_, window| !window.is_expired(now));

        Ok(initial_count - counters.len())
    }

    /// Number of live in-memory windows
    pub fn tracked_windows(&self) -> usize {
        match &self.backend {
            Backend::Memory(store) => store.lock().map(|counters| counters.len()).unwrap_or(0),
            Backend::Redis(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit_config::{LimitSet, GENERATE_ROUTE};

    fn limiter(default_limits: Vec<RateLimitRule>, generate_limits: Vec<RateLimitRule>) -> RateLimiter {
        RateLimiter::in_memory(RateLimitConfig::new(
            LimitSet(default_limits),
            LimitSet(generate_limits),
        ))
    }

    async fn allowed(limiter: &RateLimiter, identity: &str, route: &str) -> bool {
        limiter.check(identity, Some(route)).await.unwrap() == RateLimitDecision::Allowed
    }

    #[tokio::test]
    async fn test_allows_up_to_limit() {
        let limiter = limiter(vec![RateLimitRule::per_hour(3)], vec![]);

        for _ in 0..3 {
            assert!(allowed(&limiter, "10.0.0.1", "/").await);
        }

        match limiter.check("10.0.0.1", Some("/")).await.unwrap() {
            RateLimitDecision::Limited { rule, retry_after } => {
                assert_eq!(rule, RateLimitRule::per_hour(3));
                assert!(retry_after <= Duration::from_secs(3600));
                assert!(retry_after > Duration::from_secs(3500));
            }
            RateLimitDecision::Allowed => panic!("fourth request should be limited"),
        }
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let limiter = limiter(vec![RateLimitRule::per_hour(1)], vec![]);

        assert!(allowed(&limiter, "10.0.0.1", "/").await);
        assert!(!allowed(&limiter, "10.0.0.1", "/").await);
        assert!(allowed(&limiter, "10.0.0.2", "/").await);
    }

    #[tokio::test]
    async fn test_route_rules_only_apply_to_their_route() {
        let limiter = limiter(vec![RateLimitRule::per_hour(100)], vec![RateLimitRule::per_hour(2)]);

        assert!(allowed(&limiter, "c", GENERATE_ROUTE).await);
        assert!(allowed(&limiter, "c", GENERATE_ROUTE).await);
        assert!(!allowed(&limiter, "c", GENERATE_ROUTE).await);

        // the landing page only carries the global rules
        assert!(allowed(&limiter, "c", "/").await);
    }

    #[tokio::test]
    async fn test_global_rules_are_shared_across_routes() {
        let limiter = limiter(vec![RateLimitRule::per_day(3)], vec![RateLimitRule::per_hour(10)]);

        assert!(allowed(&limiter, "c", "/").await);
        assert!(allowed(&limiter, "c", GENERATE_ROUTE).await);
        assert!(allowed(&limiter, "c", "/").await);
        assert!(!allowed(&limiter, "c", GENERATE_ROUTE).await);
        assert!(!allowed(&limiter, "c", "/").await);
    }

    #[tokio::test]
    async fn test_rejection_does_not_increment() {
        let limiter = limiter(vec![RateLimitRule::per_hour(100)], vec![RateLimitRule::per_hour(1)]);

        assert!(allowed(&limiter, "c", GENERATE_ROUTE).await);
        for _ in 0..5 {
            assert!(!allowed(&limiter, "c", GENERATE_ROUTE).await);
        }

        let store = match &limiter.backend {
            Backend::Memory(store) => store.clone(),
            Backend::Redis(_) => unreachable!(),
        };
        let counters = store.lock().unwrap();
        let global_key = KeyGenerator::window_key(GLOBAL_SCOPE, &RateLimitRule::per_hour(100), "c");
        assert_eq!(counters[&global_key].count, 1);
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let limiter = limiter(vec![RateLimitRule::new(1, Duration::from_millis(50))], vec![]);

        assert!(allowed(&limiter, "c", "/").await);
        assert!(!allowed(&limiter, "c", "/").await);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(allowed(&limiter, "c", "/").await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let limiter = limiter(
            vec![RateLimitRule::new(5, Duration::from_millis(20)), RateLimitRule::per_hour(5)],
            vec![],
        );

        assert!(allowed(&limiter, "c", "/").await);
        assert_eq!(limiter.tracked_windows(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(limiter.purge_expired().unwrap(), 1);
        assert_eq!(limiter.tracked_windows(), 1);
    }

    #[tokio::test]
    async fn test_no_rules_always_allows() {
        let limiter = limiter(vec![], vec![]);
        for _ in 0..50 {
            assert!(allowed(&limiter, "c", "/").await);
        }
        assert_eq!(limiter.tracked_windows(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_window_is_an_error() {
        let limiter = limiter(vec![RateLimitRule::new(1, Duration::MAX)], vec![]);

        assert!(limiter.check("c", Some("/")).await.is_err());
        // the lock is still usable afterwards
        assert_eq!(limiter.tracked_windows(), 0);
        assert_eq!(limiter.purge_expired().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_default_daily_limit() {
        let daily_only = RateLimitConfig {
            default_limits: LimitSet(vec![RateLimitRule::per_day(200)]),
            route_limits: HashMap::new(),
        };
        assert_eq!(
            daily_only.default_limits.rules()[0],
            RateLimitConfig::default().default_limits.rules()[0]
        );
        let limiter = RateLimiter::in_memory(daily_only);

        for i in 0..200 {
            let route = if i % 2 == 0 { "/" } else { GENERATE_ROUTE };
            assert!(allowed(&limiter, "c", route).await, "request {} should pass", i + 1);
        }

        match limiter.check("c", Some(GENERATE_ROUTE)).await.unwrap() {
            RateLimitDecision::Limited { rule, .. } => assert_eq!(rule, RateLimitRule::per_day(200)),
            RateLimitDecision::Allowed => panic!("request 201 should be limited"),
        }
        assert!(!allowed(&limiter, "c", "/").await);
        assert!(allowed(&limiter, "other", "/").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_exceed_limit() {
        let limiter = limiter(vec![RateLimitRule::per_hour(10)], vec![]);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { allowed(&limiter, "racer", "/").await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
    }
}
