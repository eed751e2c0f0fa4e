//! Infrastructure layer: ledger persistence, channel lookup, balance cache,
//! configuration and the service facade other subsystems call.

pub mod cache;
pub mod channels;
pub mod config;
pub mod error;
pub mod service;
pub mod store;


pub use cache::{BalanceCache, CacheError, InMemoryBalanceCache, balance_key};
pub use channels::{Channel, ChannelDirectory, InMemoryChannelDirectory};
pub use config::{ConfigError, LedgerConfig};
pub use error::LedgerError;
pub use service::{LedgerService, ServiceSettings};
pub use store::{InMemoryLedgerStore, LedgerStore};
