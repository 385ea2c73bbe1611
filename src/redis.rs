use crate::error::{GatewayError, Result};
use crate::rate_limit_config::RateLimitRule;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use std::time::Duration;

/// Checks every window first and only increments when none is full, so a
/// rejected request leaves all counters untouched.
///
/// KEYS: one counter per window. ARGV: `limit, window_ms` pairs in KEYS order.
/// Returns `{1, 0, 0}` when allowed, `{0, index, pttl_ms}` when the window
/// at 1-based `index` is full.
const HIT_WINDOWS_SCRIPT: &str = r#"
for i, key in ipairs(KEYS) do
    local limit = tonumber(ARGV[i * 2 - 1])
    local current = tonumber(redis.call('GET', key) or '0')
    if current >= limit then
        return {0, i, redis.call('PTTL', key)}
    end
end
for i, key in ipairs(KEYS) do
    if redis.call('INCR', key) == 1 then
        redis.call('PEXPIRE', key, ARGV[i * 2])
    end
end
return {1, 0, 0}
"#;

/// A full window found by [`RedisClient::hit_windows`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullWindow {
    pub index: usize,
    pub retry_after: Duration,
}

pub struct RedisClient {
    connection: MultiplexedConnection,
    script: Script,
}

impl RedisClient {
    /// Open a multiplexed connection and make sure the server answers
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| GatewayError::Redis(format!("Failed to create Redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| GatewayError::Redis(format!("Failed to connect to Redis: {}", e)))?;

        let redis_client = Self {
            connection,
            script: Script::new(HIT_WINDOWS_SCRIPT),
        };
        redis_client.ping().await?;

        Ok(redis_client)
    }

    pub async fn ping(&self) -> Result<String> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| GatewayError::Redis(format!("Ping failed: {}", e)))
    }

    /// Atomically check-and-increment the given windows.
    pub async fn hit_windows(
        &self,
        windows: &[(String, RateLimitRule)],
    ) -> Result<Option<FullWindow>> {
        if windows.is_empty() {
            return Ok(None);
        }

        let mut invocation = self.script.prepare_invoke();
        for (key, rule) in windows {
            invocation
                .key(key.as_str())
                .arg(rule.limit)
                .arg(window_millis(rule)?);
        }

        let mut conn = self.connection.clone();
        let reply: Vec<i64> = invocation.invoke_async(&mut conn).await?;

        match reply.as_slice() {
            [1, ..] => Ok(None),
            [0, index, pttl] => {
                let index = usize::try_from(*index)
                    .ok()
                    .and_then(|i| i.checked_sub(1))
                    .filter(|i| *i < windows.len())
                    .ok_or_else(|| {
                        GatewayError::Redis(format!("Rate limit script returned bad index {}", index))
                    })?;
                // PTTL is negative when the key vanished between GET and PTTL
                let retry_after = Duration::from_millis((*pttl).max(0) as u64);
                Ok(Some(FullWindow { index, retry_after }))
            }
            other => Err(GatewayError::Redis(format!(
                "Unexpected rate limit script reply: {:?}",
                other
            ))),
        }
    }

}

fn window_millis(rule: &RateLimitRule) -> Result<u64> {
    u64::try_from(rule.window.as_millis())
        .map_err(|_| GatewayError::Internal(format!("Rate limit window out of range: {}", rule)))
}
