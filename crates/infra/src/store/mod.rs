//! Append-only ledger store boundary.
//!
//! The store is the only component that writes ledger rows. It exposes:
//!
//! - lazy account creation (`ensure_accounts`),
//! - grouped SUM queries for the balance calculator,
//! - one atomic **lock → check → insert** primitive (`post`) used by every
//!   transaction operation,
//! - read access to entries for verification and history.
//!
//! ## Append-only
//!
//! Entries have no update or delete path. `update_entry` / `delete_entry` exist
//! only so that an accidental mutation attempt fails fast with
//! `DomainError::ImmutabilityViolation` instead of silently succeeding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use adledger_accounting::{Account, AccountSums, ChannelAccounts, LedgerEntry, Posting};
use adledger_core::{AccountId, ChannelId, Currency, DomainError, EntryId, TransactionId};

use crate::error::LedgerError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Idempotently create the four accounts of a channel + currency; return all four.
    async fn ensure_accounts(
        &self,
        channel_id: ChannelId,
        currency: &Currency,
    ) -> Result<ChannelAccounts, LedgerError>;

    /// Existing accounts of the given channels (no creation).
    async fn find_accounts(
        &self,
        channel_ids: &[ChannelId],
        currency: &Currency,
    ) -> Result<Vec<Account>, LedgerError>;

    /// Debit / credit totals per account, one grouped query.
    ///
    /// Accounts without entries are absent from the map.
    async fn account_sums(
        &self,
        account_ids: &[AccountId],
    ) -> Result<HashMap<AccountId, AccountSums>, LedgerError>;

    /// Atomically: ensure and lock the channel's accounts, recompute CASH and
    /// FROZEN under the lock, run `posting.authorize`, insert the balanced entries.
    ///
    /// On any error nothing is committed.
    async fn post(&self, posting: &Posting) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// All entries of one transaction group.
    async fn transaction_entries(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Most recent entries across a channel's accounts, newest first.
    async fn channel_entries(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Transaction ids whose debits differ from their credits (expected empty).
    async fn unbalanced_transactions(&self) -> Result<Vec<TransactionId>, LedgerError>;

    /// Always fails: ledger entries are immutable.
    async fn update_entry(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        tracing::error!(entry_id = %entry.id, "attempted to update an immutable ledger entry");
        Err(DomainError::immutable(format!("update of entry {}", entry.id)).into())
    }

    /// Always fails: ledger entries are immutable.
    async fn delete_entry(&self, entry_id: EntryId) -> Result<(), LedgerError> {
        tracing::error!(%entry_id, "attempted to delete an immutable ledger entry");
        Err(DomainError::immutable(format!("delete of entry {entry_id}")).into())
    }
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn ensure_accounts(
        &self,
        channel_id: ChannelId,
        currency: &Currency,
    ) -> Result<ChannelAccounts, LedgerError> {
        (**self).ensure_accounts(channel_id, currency).await
    }

    async fn find_accounts(
        &self,
        channel_ids: &[ChannelId],
        currency: &Currency,
    ) -> Result<Vec<Account>, LedgerError> {
        (**self).find_accounts(channel_ids, currency).await
    }

    async fn account_sums(
        &self,
        account_ids: &[AccountId],
    ) -> Result<HashMap<AccountId, AccountSums>, LedgerError> {
        (**self).account_sums(account_ids).await
    }

    async fn post(&self, posting: &Posting) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).post(posting).await
    }

    async fn transaction_entries(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).transaction_entries(transaction_id).await
    }

    async fn channel_entries(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).channel_entries(channel_id, limit).await
    }

    async fn unbalanced_transactions(&self) -> Result<Vec<TransactionId>, LedgerError> {
        (**self).unbalanced_transactions().await
    }

    async fn update_entry(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        (**self).update_entry(entry).await
    }

    async fn delete_entry(&self, entry_id: EntryId) -> Result<(), LedgerError> {
        (**self).delete_entry(entry_id).await
    }
}
