//! Redis-compatible counter store for multi-instance deployments.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{CounterStore, StoreError, WindowHit};
use crate::clock;

/// Counter store backed by Redis (or any server speaking its protocol).
///
/// Sliding windows are sorted-set logs of hit timestamps, checked and
/// updated by one Lua script so concurrent hits on a key cannot overshoot
/// the limit.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connects and verifies the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!("Failed to create Redis client: {e}");
            StoreError::from(e)
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            warn!("Failed to create Redis connection manager: {e}");
            StoreError::from(e)
        })?;

        let mut conn = connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(StoreError::Protocol(format!("PING answered {pong:?}")));
        }

        debug!("Connected to Redis counter store");
        Ok(Self { connection })
    }
}

/// KEYS[1] window key; ARGV: now ms, window ms, limit, member.
/// Returns `{count, score}`: `count` as in `WindowHit`, `score` the hit whose
/// expiry frees room.
static HIT_WINDOW: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local held = redis.call('ZCARD', key)
local index = 0
if held < limit then
  redis.call('ZADD', key, now, ARGV[4])
else
  index = held - limit
end
local freeing = redis.call('ZRANGE', key, index, index, 'WITHSCORES')
local newest = redis.call('ZRANGE', key, -1, -1, 'WITHSCORES')
if newest[2] then
  redis.call('PEXPIREAT', key, tonumber(newest[2]) + window)
end
local score = now
if freeing[2] then
  score = tonumber(freeing[2])
end
return {held + 1, score}
",
    )
});

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn secs(d: Duration) -> i64 {
    // EXPIRE rejects 0; round sub-second TTLs up
    i64::try_from(d.as_secs().max(1)).unwrap_or(i64::MAX)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn hit_window(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<WindowHit, StoreError> {
        let mut conn = self.connection.clone();
        let now = Utc::now().timestamp_millis();
        let member = format!("{now}-{}", uuid::Uuid::new_v4());

        let (count, freeing_ms): (u64, i64) = HIT_WINDOW
            .key(key)
            .arg(now)
            .arg(millis(window))
            .arg(limit)
            .arg(&member)
            .invoke_async(&mut conn)
            .await?;

        let freeing_at = Utc
            .timestamp_millis_opt(freeing_ms)
            .single()
            .ok_or_else(|| StoreError::Protocol(format!("bad window score {freeing_ms}")))?;

        Ok(WindowHit {
            count,
            reset_at: clock::after(freeing_at, window),
        })
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();

        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(secs(ttl))
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(count)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs(ttl))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let n: u64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
