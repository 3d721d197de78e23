//! Thin async wrapper over a Redis-like KV store.
//!
//! Every rate-limit algorithm mutation runs as a single server-side Lua
//! script so the read-compute-write-TTL cycle is atomic in one round trip
//! (spec.md §4.1). The [`KvStore`] trait lets the rate-limit algorithms stay
//! generic over the transport, and lets tests substitute a failing store to
//! exercise the fail-open path (spec.md §8, property 8).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv store unreachable: {0}")]
    Unreachable(String),
    #[error("kv script error: {0}")]
    Script(String),
}

impl From<RedisError> for KvError {
    fn from(e: RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            KvError::Unreachable(e.to_string())
        } else {
            KvError::Script(e.to_string())
        }
    }
}

/// Outcome of an atomic rate-limit check against the KV store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitOutcome {
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    /// Unix millis at which the window/bucket resets.
    pub reset_at_ms: i64,
}

/// Async contract every KV-backed rate-limit algorithm consumes. Every
/// mutating call is a single atomic server-side script.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn eval_token_bucket(
        &self,
        key: &str,
        max_tokens: f64,
        refill_rate_per_sec: f64,
        cost: f64,
        now_ms: i64,
        ttl_seconds: i64,
    ) -> Result<LimitOutcome, KvError>;

    async fn eval_sliding_window_log(
        &self,
        key: &str,
        limit: u64,
        window_ms: i64,
        cost: u64,
        now_ms: i64,
        member_prefix: &str,
    ) -> Result<LimitOutcome, KvError>;

    async fn eval_sliding_window_counter(
        &self,
        key: &str,
        limit: u64,
        window_seconds: i64,
        cost: u64,
        now_ms: i64,
    ) -> Result<LimitOutcome, KvError>;

    async fn eval_fixed_window(
        &self,
        key: &str,
        limit: u64,
        window_seconds: i64,
        cost: u64,
        now_ms: i64,
    ) -> Result<LimitOutcome, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;
}

/// Production [`KvStore`] backed by a Redis-compatible server.
pub struct RedisKvStore {
    conn: ConnectionManager,
    token_bucket_script: Script,
    sliding_window_log_script: Script,
    sliding_window_counter_script: Script,
    fixed_window_script: Script,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| KvError::Unreachable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Unreachable(e.to_string()))?;
        Ok(Self {
            conn,
            token_bucket_script: Script::new(TOKEN_BUCKET_SCRIPT),
            sliding_window_log_script: Script::new(SLIDING_WINDOW_LOG_SCRIPT),
            sliding_window_counter_script: Script::new(SLIDING_WINDOW_COUNTER_SCRIPT),
            fixed_window_script: Script::new(FIXED_WINDOW_SCRIPT),
        })
    }
}

// Each script reads current state, computes the new state, writes it back
// and sets a TTL, all within a single Redis EVAL so concurrent callers never
// interleave a read with another caller's write (testable property 1).

const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local max_tokens = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now_ms = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local tokens = max_tokens
local last_refill = now_ms
local raw = redis.call("HMGET", key, "tokens", "last_refill_ms")
if raw[1] then
  tokens = tonumber(raw[1])
  last_refill = tonumber(raw[2])
end

local elapsed_sec = (now_ms - last_refill) / 1000.0
if elapsed_sec < 0 then elapsed_sec = 0 end
tokens = math.min(max_tokens, tokens + elapsed_sec * refill_rate)

local allowed = 0
if tokens >= cost then
  tokens = tokens - cost
  allowed = 1
end

redis.call("HMSET", key, "tokens", tostring(tokens), "last_refill_ms", tostring(now_ms))
redis.call("EXPIRE", key, ttl)

local deficit = max_tokens - tokens
local seconds_to_full = 0
if refill_rate > 0 then seconds_to_full = deficit / refill_rate end
local reset_at_ms = now_ms + math.floor(seconds_to_full * 1000)

return {allowed, math.floor(tokens), math.floor(max_tokens), reset_at_ms}
"#;

const SLIDING_WINDOW_LOG_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now_ms = tonumber(ARGV[4])
local member_prefix = ARGV[5]

redis.call("ZREMRANGEBYSCORE", key, "-inf", now_ms - window_ms)
local count = redis.call("ZCARD", key)

local allowed = 0
if count + cost <= limit then
  for i = 1, cost do
    redis.call("ZADD", key, now_ms, member_prefix .. ":" .. i .. ":" .. now_ms)
  end
  allowed = 1
  count = count + cost
end

redis.call("EXPIRE", key, math.ceil(window_ms / 1000) + 1)

local oldest = redis.call("ZRANGE", key, 0, 0, "WITHSCORES")
local reset_at_ms = now_ms + window_ms
if oldest[2] then
  reset_at_ms = tonumber(oldest[2]) + window_ms
end

local remaining = limit - count
if remaining < 0 then remaining = 0 end

return {allowed, math.floor(remaining), math.floor(limit), reset_at_ms}
"#;

const SLIDING_WINDOW_COUNTER_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_sec = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now_ms = tonumber(ARGV[4])

local now_sec = now_ms / 1000.0
local current_window = math.floor(now_sec / window_sec)
local progress = (now_sec - current_window * window_sec) / window_sec

local prev_key = key .. ":" .. (current_window - 1)
local curr_key = key .. ":" .. current_window

local prev = tonumber(redis.call("GET", prev_key)) or 0
local curr = tonumber(redis.call("GET", curr_key)) or 0

local weighted = prev * (1 - progress) + curr

local allowed = 0
if weighted + cost <= limit then
  curr = redis.call("INCRBY", curr_key, cost)
  redis.call("EXPIRE", curr_key, window_sec * 2)
  allowed = 1
  weighted = weighted + cost
end

local reset_at_ms = (current_window + 1) * window_sec * 1000
local remaining = limit - weighted
if remaining < 0 then remaining = 0 end

return {allowed, math.floor(remaining), math.floor(limit), math.floor(reset_at_ms)}
"#;

const FIXED_WINDOW_SCRIPT: &str = r#"
local base_key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_sec = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now_ms = tonumber(ARGV[4])

local now_sec = now_ms / 1000.0
local window_index = math.floor(now_sec / window_sec)
local key = base_key .. ":" .. window_index

local new_count = redis.call("INCRBY", key, cost)
local ttl = math.ceil((window_index + 1) * window_sec - now_sec)
redis.call("EXPIRE", key, ttl)

local allowed = 0
if new_count <= limit then allowed = 1 end

local remaining = limit - new_count
if remaining < 0 then remaining = 0 end

local reset_at_ms = (window_index + 1) * window_sec * 1000

return {allowed, math.floor(remaining), math.floor(limit), math.floor(reset_at_ms)}
"#;

fn parse_outcome(raw: Vec<i64>) -> LimitOutcome {
    LimitOutcome {
        allowed: raw.first().copied().unwrap_or(0) == 1,
        remaining: raw.get(1).copied().unwrap_or(0).max(0) as u64,
        limit: raw.get(2).copied().unwrap_or(0).max(0) as u64,
        reset_at_ms: raw.get(3).copied().unwrap_or(0),
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn eval_token_bucket(
        &self,
        key: &str,
        max_tokens: f64,
        refill_rate_per_sec: f64,
        cost: f64,
        now_ms: i64,
        ttl_seconds: i64,
    ) -> Result<LimitOutcome, KvError> {
        let mut conn = self.conn.clone();
        let raw: Vec<i64> = self
            .token_bucket_script
            .key(key)
            .arg(max_tokens)
            .arg(refill_rate_per_sec)
            .arg(cost)
            .arg(now_ms)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await?;
        Ok(parse_outcome(raw))
    }

    async fn eval_sliding_window_log(
        &self,
        key: &str,
        limit: u64,
        window_ms: i64,
        cost: u64,
        now_ms: i64,
        member_prefix: &str,
    ) -> Result<LimitOutcome, KvError> {
        let mut conn = self.conn.clone();
        let raw: Vec<i64> = self
            .sliding_window_log_script
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .arg(cost)
            .arg(now_ms)
            .arg(member_prefix)
            .invoke_async(&mut conn)
            .await?;
        Ok(parse_outcome(raw))
    }

    async fn eval_sliding_window_counter(
        &self,
        key: &str,
        limit: u64,
        window_seconds: i64,
        cost: u64,
        now_ms: i64,
    ) -> Result<LimitOutcome, KvError> {
        let mut conn = self.conn.clone();
        let raw: Vec<i64> = self
            .sliding_window_counter_script
            .key(key)
            .arg(limit)
            .arg(window_seconds)
            .arg(cost)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(parse_outcome(raw))
    }

    async fn eval_fixed_window(
        &self,
        key: &str,
        limit: u64,
        window_seconds: i64,
        cost: u64,
        now_ms: i64,
    ) -> Result<LimitOutcome, KvError> {
        let mut conn = self.conn.clone();
        let raw: Vec<i64> = self
            .fixed_window_script
            .key(key)
            .arg(limit)
            .arg(window_seconds)
            .arg(cost)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(parse_outcome(raw))
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_outcome_clamps_negative_remaining() {
        let outcome = parse_outcome(vec![1, -5, 10, 1000]);
        assert_eq!(outcome.remaining, 0);
        assert!(outcome.allowed);
    }
}
