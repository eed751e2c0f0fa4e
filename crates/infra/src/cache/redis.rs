//! Redis-backed balance cache (optional, `redis` feature).
//!
//! Values are stored as JSON under `adledger:channel_balance:{channel_id}` with
//! a server-side expiry (`SET ... EX`). The invalidation generation lives next
//! to it under `{key}:generation` and has no expiry.

use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use adledger_accounting::ChannelBalance;

use super::{BalanceCache, CacheError, decode_balance, encode_balance};

/// `SET` only while the generation still matches what the reader saw.
const SET_IF_GENERATION: &str = r#"
local current = redis.call('GET', KEYS[2]) or '0'
if current ~= ARGV[3] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
return 1
"#;

fn generation_key(key: &str) -> String {
    format!("{key}:generation")
}

#[derive(Debug, Clone)]
pub struct RedisBalanceCache {
    client: redis::Client,
}

impl RedisBalanceCache {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }
}

#[async_trait]
impl BalanceCache for RedisBalanceCache {
    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<ChannelBalance>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        raw.as_deref().map(decode_balance).transpose()
    }

    #[instrument(skip(self), err)]
    async fn generation(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<u64> = redis::cmd("GET")
            .arg(generation_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;
        Ok(raw.unwrap_or(0))
    }

    #[instrument(skip(self, value), err)]
    async fn set(
        &self,
        key: &str,
        value: &ChannelBalance,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CacheError> {
        let payload = encode_balance(value)?;

        let mut conn = self.connection().await?;
        let stored: i64 = redis::Script::new(SET_IF_GENERATION)
            .key(key)
            .key(generation_key(key))
            .arg(payload)
            .arg(ttl.as_secs().max(1))
            .arg(generation.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;
        Ok(stored == 1)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(key)
            .ignore()
            .cmd("INCR")
            .arg(generation_key(key))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;
        Ok(())
    }
}
