//! Best-effort balance cache.
//!
//! Advisory only: transaction operations never read it, and any cache failure
//! degrades the read path to "compute from the store".
//!
//! ## Invalidation generations
//!
//! Every key carries a generation counter that `delete` bumps. A reader takes
//! the generation *before* summing entries and passes it to `set`, which
//! stores the value only if no invalidation happened in between. A posting
//! that commits while a balance is being computed therefore can't leave the
//! pre-commit value behind in the cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use adledger_accounting::ChannelBalance;
use adledger_core::ChannelId;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryBalanceCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisBalanceCache;

/// Cache key of one channel's balance.
pub fn balance_key(channel_id: ChannelId) -> String {
    format!("adledger:channel_balance:{channel_id}")
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait BalanceCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ChannelBalance>, CacheError>;

    /// Invalidation generation of `key`; 0 if it was never invalidated.
    async fn generation(&self, key: &str) -> Result<u64, CacheError>;

    /// Store `value` unless `key` was invalidated after `generation` was read.
    ///
    /// Returns whether the value was stored.
    async fn set(
        &self,
        key: &str,
        value: &ChannelBalance,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CacheError>;

    /// Drop the value and bump the generation.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<C> BalanceCache for Arc<C>
where
    C: BalanceCache + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<ChannelBalance>, CacheError> {
        (**self).get(key).await
    }

    async fn generation(&self, key: &str) -> Result<u64, CacheError> {
        (**self).generation(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &ChannelBalance,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CacheError> {
        (**self).set(key, value, ttl, generation).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        (**self).delete(key).await
    }
}

/// Wire format of a cached balance (JSON, decimals as strings).
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
pub(crate) fn encode_balance(value: &ChannelBalance) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))
}

#[cfg_attr(not(feature = "redis"), allow(dead_code))]
pub(crate) fn decode_balance(payload: &str) -> Result<ChannelBalance, CacheError> {
    serde_json::from_str(payload).map_err(|e| CacheError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn payload_keeps_exact_decimals() {
        let value = ChannelBalance {
            balance: dec!(1000.00),
            frozen: dec!(300.00),
            available: dec!(700.00),
        };
        let payload = encode_balance(&value).unwrap();
        assert!(payload.contains("\"700.00\""), "{payload}");

        let decoded = decode_balance(&payload).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded.available.to_string(), "700.00");
    }

    #[test]
    fn garbage_payload_is_a_serialization_error() {
        assert!(matches!(
            decode_balance("{\"balance\": 1"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn keys_are_namespaced_per_channel() {
        let a = ChannelId::new();
        let b = ChannelId::new();
        assert!(balance_key(a).starts_with("adledger:channel_balance:"));
        assert_ne!(balance_key(a), balance_key(b));
    }
}
