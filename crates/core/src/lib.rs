//! `adledger-core`: foundation building blocks for the channel ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money helpers and the domain error model.

pub mod error;
pub mod id;
pub mod money;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, ChannelId, EntryId, LegalEntityId, TransactionId};
pub use money::{Currency, Money, DEFAULT_CURRENCY, MAX_AMOUNT, MONEY_SCALE};
