//! Channel ledger accounting (double-entry, append-only).
//!
//! Pure domain logic only: no IO, no persistence, no caching. Balances are never
//! stored; they are derived from entries by [`ChannelBalance::derive`].

pub mod account;
pub mod balance;
pub mod entry;
pub mod posting;

pub use account::{Account, AccountKind, ChannelAccounts};
pub use balance::ChannelBalance;
pub use entry::{AccountSums, EntrySide, LedgerEntry, Metadata, TransactionKind, check_balanced, is_balanced};
pub use posting::{Guard, Posting, PostingRule, TransactionRequest};
