//! Configuration loading and representation.

use std::time::Duration;

use thiserror::Error;

use adledger_core::{Currency, DEFAULT_CURRENCY};

/// Default balance cache TTL (seconds).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default Postgres pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be set")]
    Missing { var: &'static str },

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Runtime configuration of the ledger engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub database_url: String,
    /// Redis endpoint for `RedisBalanceCache` (`redis` feature). The engine
    /// never reads it; whoever builds the `LedgerService` picks the cache.
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    pub default_currency: Currency,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: None,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            default_currency: Currency::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl LedgerConfig {
    /// Read configuration from the process environment.
    ///
    /// - `DATABASE_URL` (required)
    /// - `REDIS_URL` (optional)
    /// - `LEDGER_CACHE_TTL_SECS` (default 300)
    /// - `LEDGER_DEFAULT_CURRENCY` (default RUB)
    /// - `DATABASE_MAX_CONNECTIONS` (default 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing { var: "DATABASE_URL" })?;

        let redis_url = lookup("REDIS_URL").filter(|v| !v.trim().is_empty());

        let cache_ttl = match lookup("LEDGER_CACHE_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_number("LEDGER_CACHE_TTL_SECS", &raw)?),
            None => Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        };

        let default_currency = Currency::new(
            lookup("LEDGER_DEFAULT_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        )
        .map_err(|e| ConfigError::Invalid {
            var: "LEDGER_DEFAULT_CURRENCY",
            reason: e.to_string(),
        })?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => parse_number("DATABASE_MAX_CONNECTIONS", &raw)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DATABASE_MAX_CONNECTIONS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url,
            redis_url,
            cache_ttl,
            default_currency,
            max_connections,
        })
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let cfg = LedgerConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/ledger")])).unwrap();
        assert_eq!(cfg.cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.default_currency.as_str(), "RUB");
        assert_eq!(cfg.redis_url, None);
        assert_eq!(cfg.max_connections, 10);
    }

    #[test]
    fn missing_database_url_is_reported() {
        let err = LedgerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing { var: "DATABASE_URL" });
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = LedgerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/ledger"),
            ("REDIS_URL", "redis://cache:6379"),
            ("LEDGER_CACHE_TTL_SECS", "60"),
            ("LEDGER_DEFAULT_CURRENCY", "usd"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(60));
        assert_eq!(cfg.default_currency.as_str(), "USD");
        assert_eq!(cfg.max_connections, 4);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = LedgerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/ledger"),
            ("LEDGER_CACHE_TTL_SECS", "five minutes"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LEDGER_CACHE_TTL_SECS", .. }));
    }
}
