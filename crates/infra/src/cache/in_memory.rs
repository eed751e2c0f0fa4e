use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use adledger_accounting::ChannelBalance;

use super::{BalanceCache, CacheError};

#[derive(Debug, Default)]
struct Slot {
    value: Option<(ChannelBalance, Instant)>,
    generation: u64,
}

/// Process-local TTL cache. Expired entries are dropped lazily on read.
///
/// Values and generations share one lock, so the generation check in `set`
/// and the bump in `delete` are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct InMemoryBalanceCache {
    inner: RwLock<HashMap<String, Slot>>,
}

impl InMemoryBalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (possibly expired, not yet evicted) values.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|m| m.values().filter(|s| s.value.is_some()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> CacheError {
    CacheError::Command("lock poisoned".to_string())
}

#[async_trait]
impl BalanceCache for InMemoryBalanceCache {
    async fn get(&self, key: &str) -> Result<Option<ChannelBalance>, CacheError> {
        let now = Instant::now();
        {
            let map = self.inner.read().map_err(|_| poisoned())?;
            match map.get(key).and_then(|s| s.value.as_ref()) {
                Some((value, expires_at)) if *expires_at > now => return Ok(Some(*value)),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut map = self.inner.write().map_err(|_| poisoned())?;
        if let Some(slot) = map.get_mut(key) {
            if slot.value.is_some_and(|(_, expires_at)| expires_at <= now) {
                slot.value = None;
            }
        }
        Ok(None)
    }

    async fn generation(&self, key: &str) -> Result<u64, CacheError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(key).map_or(0, |s| s.generation))
    }

    async fn set(
        &self,
        key: &str,
        value: &ChannelBalance,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CacheError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let slot = map.entry(key.to_string()).or_default();
        if slot.generation != generation {
            return Ok(false);
        }
        slot.value = Some((*value, Instant::now() + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let slot = map.entry(key.to_string()).or_default();
        slot.value = None;
        slot.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TTL: Duration = Duration::from_secs(300);

    fn sample() -> ChannelBalance {
        ChannelBalance {
            balance: dec!(10.00),
            frozen: dec!(2.00),
            available: dec!(8.00),
        }
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = InMemoryBalanceCache::new();
        let generation = cache.generation("k").await.unwrap();
        assert!(cache.set("k", &sample(), TTL, generation).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(sample()));
        assert_eq!(cache.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses_and_evicted() {
        let cache = InMemoryBalanceCache::new();
        cache.set("k", &sample(), Duration::ZERO, 0).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_entry_and_bumps_generation() {
        let cache = InMemoryBalanceCache::new();
        cache.set("k", &sample(), TTL, 0).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.generation("k").await.unwrap(), 1);

        // Deleting a missing key is not an error.
        cache.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn set_after_invalidation_is_refused() {
        let cache = InMemoryBalanceCache::new();
        let seen = cache.generation("k").await.unwrap();

        cache.delete("k").await.unwrap();

        assert!(!cache.set("k", &sample(), TTL, seen).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);

        let current = cache.generation("k").await.unwrap();
        assert!(cache.set("k", &sample(), TTL, current).await.unwrap());
    }
}
