//! Redis-backed [`WindowStore`] for a rate-limit store shared between
//! process restarts (or several front-ends talking to one Redis).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tally_types::TallyError;

use crate::rate_limit::{RateLimitDecision, WindowKey, WindowStore};

/// Applies one fixed-window hit server-side so the read-modify-write is
/// atomic. Times are unix milliseconds.
///
/// Returns `{allowed (0|1), remaining, reset_at_ms}`.
const HIT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local state = redis.call('HMGET', KEYS[1], 'count', 'reset_at')
local count = tonumber(state[1])
local reset_at = tonumber(state[2])
if count == nil or reset_at == nil or now >= reset_at then
  reset_at = now + window
  redis.call('HSET', KEYS[1], 'count', 1, 'reset_at', reset_at)
  redis.call('PEXPIRE', KEYS[1], window)
  return {1, capacity - 1, reset_at}
end
if count >= capacity then
  return {0, 0, reset_at}
end
count = redis.call('HINCRBY', KEYS[1], 'count', 1)
return {1, capacity - count, reset_at}
"#;

/// Window store kept in Redis hashes, one hash per (scope, actor).
pub struct RedisWindowStore {
    client: redis::Client,
    key_prefix: String,
    script: redis::Script,
}

impl RedisWindowStore {
    /// Create a store from a connection URL. No connection is made until
    /// the first hit.
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, TallyError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| TallyError::RateLimitError(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            script: redis::Script::new(HIT_SCRIPT),
        })
    }

    /// `{prefix}:ratelimit:{scope byte length}:{scope}:{actor}`. The length
    /// prefix keeps ids containing `:` from mapping two pairs to one key.
    fn window_key(&self, key: &WindowKey) -> String {
        format!(
            "{}:ratelimit:{}:{}:{}",
            self.key_prefix,
            key.scope.len(),
            key.scope,
            key.actor
        )
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, TallyError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TallyError::RateLimitError(e.to_string()))
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn hit(
        &self,
        key: &WindowKey,
        now: DateTime<Utc>,
        window: Duration,
        capacity: u32,
    ) -> Result<RateLimitDecision, TallyError> {
        let mut conn = self.connection().await?;
        let reply: Vec<i64> = self
            .script
            .key(self.window_key(key))
            .arg(now.timestamp_millis())
            .arg(window.as_millis() as i64)
            .arg(capacity)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| TallyError::RateLimitError(e.to_string()))?;

        let &[allowed, remaining, reset_ms] = reply.as_slice() else {
            return Err(TallyError::RateLimitError(format!(
                "unexpected script reply: {reply:?}"
            )));
        };
        Ok(RateLimitDecision {
            allowed: allowed == 1,
            remaining: u32::try_from(remaining).unwrap_or(0),
            reset_at: DateTime::<Utc>::from_timestamp_millis(reset_ms),
        })
    }
}
