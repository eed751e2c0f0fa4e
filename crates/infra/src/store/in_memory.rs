use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use adledger_accounting::{
    Account, AccountKind, AccountSums, ChannelAccounts, ChannelBalance, LedgerEntry, Posting,
};
use adledger_core::{AccountId, ChannelId, Currency, TransactionId};

use super::LedgerStore;
use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccountKey {
    channel_id: ChannelId,
    kind: AccountKind,
    currency: Currency,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<AccountKey, Account>,
    entries: Vec<LedgerEntry>,
}

impl Inner {
    fn ensure(&mut self, channel_id: ChannelId, currency: &Currency) -> Result<ChannelAccounts, LedgerError> {
        let now = Utc::now();
        let mut set = Vec::with_capacity(AccountKind::ALL.len());
        for kind in AccountKind::ALL {
            let key = AccountKey {
                channel_id,
                kind,
                currency: currency.clone(),
            };
            let account = self
                .accounts
                .entry(key)
                .or_insert_with(|| Account::open(channel_id, kind, currency.clone(), now));
            set.push(account.clone());
        }
        Ok(ChannelAccounts::from_accounts(set)?)
    }

    fn sums(&self, account_id: AccountId) -> AccountSums {
        AccountSums::from_entries(self.entries.iter().filter(|e| e.account_id == account_id))
    }
}

/// In-memory append-only ledger store.
///
/// Intended for tests/dev. A single write lock is held across the whole
/// check-and-insert of `post`, which serializes postings the way row locks do
/// in Postgres.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `post` fail half-way through its insert (tests).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Total number of stored entries.
    pub fn entry_count(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn ensure_accounts(
        &self,
        channel_id: ChannelId,
        currency: &Currency,
    ) -> Result<ChannelAccounts, LedgerError> {
        let mut inner = self.inner.write().map_err(|_| LedgerError::poisoned())?;
        inner.ensure(channel_id, currency)
    }

    async fn find_accounts(
        &self,
        channel_ids: &[ChannelId],
        currency: &Currency,
    ) -> Result<Vec<Account>, LedgerError> {
        let wanted: HashSet<ChannelId> = channel_ids.iter().copied().collect();
        let inner = self.inner.read().map_err(|_| LedgerError::poisoned())?;
        Ok(inner
            .accounts
            .values()
            .filter(|a| wanted.contains(&a.channel_id) && &a.currency == currency)
            .cloned()
            .collect())
    }

    async fn account_sums(
        &self,
        account_ids: &[AccountId],
    ) -> Result<HashMap<AccountId, AccountSums>, LedgerError> {
        let wanted: HashSet<AccountId> = account_ids.iter().copied().collect();
        let inner = self.inner.read().map_err(|_| LedgerError::poisoned())?;

        let mut sums: HashMap<AccountId, AccountSums> = HashMap::new();
        for e in inner.entries.iter().filter(|e| wanted.contains(&e.account_id)) {
            sums.entry(e.account_id).or_default().add(e.side, e.amount);
        }
        Ok(sums)
    }

    async fn post(&self, posting: &Posting) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut inner = self.inner.write().map_err(|_| LedgerError::poisoned())?;

        let accounts = inner.ensure(posting.channel_id, &posting.currency)?;
        let current = ChannelBalance::derive(
            inner.sums(accounts.cash.id),
            inner.sums(accounts.frozen.id),
        );
        posting.authorize(&current)?;

        let entries = posting.entries(&accounts, Utc::now())?;

        // Stage first, then publish in one step: a failure leaves no partial pair.
        let mut staged = Vec::with_capacity(entries.len());
        for (idx, e) in entries.iter().enumerate() {
            if idx > 0 && self.fail_writes.load(Ordering::SeqCst) {
                return Err(LedgerError::Store(format!(
                    "simulated write failure at entry {idx} of transaction {}",
                    posting.transaction_id
                )));
            }
            staged.push(e.clone());
        }
        inner.entries.extend(staged);

        Ok(entries)
    }

    async fn transaction_entries(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let inner = self.inner.read().map_err(|_| LedgerError::poisoned())?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn channel_entries(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let inner = self.inner.read().map_err(|_| LedgerError::poisoned())?;
        let owned: HashSet<AccountId> = inner
            .accounts
            .values()
            .filter(|a| a.channel_id == channel_id)
            .map(|a| a.id)
            .collect();

        Ok(inner
            .entries
            .iter()
            .rev()
            .filter(|e| owned.contains(&e.account_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn unbalanced_transactions(&self) -> Result<Vec<TransactionId>, LedgerError> {
        let inner = self.inner.read().map_err(|_| LedgerError::poisoned())?;

        let mut groups: HashMap<TransactionId, (usize, AccountSums)> = HashMap::new();
        for e in &inner.entries {
            let (count, sums) = groups.entry(e.transaction_id).or_default();
            *count += 1;
            sums.add(e.side, e.amount);
        }

        let mut unbalanced: Vec<TransactionId> = groups
            .into_iter()
            .filter(|(_, (count, sums))| *count < 2 || !sums.balance().is_zero())
            .map(|(id, _)| id)
            .collect();
        unbalanced.sort();
        Ok(unbalanced)
    }
}
