//! Ledger service: the stable API other subsystems call.
//!
//! ```text
//! ensure_accounts ─┐
//!                  ├─ LedgerStore (append-only, atomic post)
//! record_* / freeze / unfreeze ── Posting ── store.post ── invalidate_cache
//!                  │
//! calculate_balance ── BalanceCache (advisory) ── store sums
//! get_balance_for_channels ── grouped sums (CASH, FROZEN)
//! get_legal_entity_balance ── ChannelDirectory ── bulk path ── roll-up
//! ```
//!
//! The service holds no state of its own beyond its collaborators, so it can be
//! shared freely between request handlers.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use adledger_accounting::{
    AccountKind, ChannelAccounts, ChannelBalance, LedgerEntry, Posting, TransactionKind,
    TransactionRequest, is_balanced,
};
use adledger_core::{AccountId, ChannelId, Currency, LegalEntityId, TransactionId};

use crate::cache::{BalanceCache, balance_key};
use crate::channels::{Channel, ChannelDirectory};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Tunables of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub cache_ttl: Duration,
    pub currency: Currency,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(crate::config::DEFAULT_CACHE_TTL_SECS),
            currency: Currency::default(),
        }
    }
}

impl From<&LedgerConfig> for ServiceSettings {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl,
            currency: config.default_currency.clone(),
        }
    }
}

enum CacheLookup {
    Hit(ChannelBalance),
    Miss(u64),
}

pub struct LedgerService<S, D, C> {
    store: S,
    channels: D,
    cache: C,
    settings: ServiceSettings,
}

impl<S, D, C> LedgerService<S, D, C>
where
    S: LedgerStore,
    D: ChannelDirectory,
    C: BalanceCache,
{
    pub fn new(store: S, channels: D, cache: C, settings: ServiceSettings) -> Self {
        Self {
            store,
            channels,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Idempotently create the four accounts of a channel in `currency`.
    #[instrument(skip(self), fields(channel_id = %channel_id, currency = %currency), err)]
    pub async fn ensure_accounts(
        &self,
        channel_id: ChannelId,
        currency: &Currency,
    ) -> Result<HashMap<AccountKind, AccountId>, LedgerError> {
        let accounts = self.store.ensure_accounts(channel_id, currency).await?;
        Ok(accounts.iter().map(|a| (a.kind, a.id)).collect())
    }

    // --- balance calculator -------------------------------------------------

    /// Balance of one channel.
    ///
    /// Soft-deleted channels short-circuit to zero without touching cache or
    /// store. With `use_cache`, a fresh cache entry is returned as-is and a
    /// computed value is written through, unless the channel was invalidated
    /// while it was being computed.
    #[instrument(skip(self), fields(channel_id = %channel_id), err)]
    pub async fn calculate_balance(
        &self,
        channel_id: ChannelId,
        use_cache: bool,
    ) -> Result<ChannelBalance, LedgerError> {
        let channel = self.require_channel(channel_id).await?;
        if channel.is_deleted {
            return Ok(ChannelBalance::zero());
        }

        let key = balance_key(channel_id);
        let lookup = if use_cache { self.probe_cache(&key).await } else { None };
        let generation = match lookup {
            Some(CacheLookup::Hit(cached)) => return Ok(cached),
            Some(CacheLookup::Miss(generation)) => Some(generation),
            None => None,
        };

        // The generation was taken before summing: a posting committed from
        // here on bumps it, and the write-through below is refused.
        let accounts = self.store.ensure_accounts(channel_id, &self.settings.currency).await?;
        let balance = self.derive(&accounts).await?;

        if let Some(generation) = generation {
            match self
                .cache
                .set(&key, &balance, self.settings.cache_ttl, generation)
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!("channel invalidated during read; not caching"),
                Err(e) => warn!(error = %e, "balance cache write failed"),
            }
        }
        Ok(balance)
    }

    /// Drop the cached balance of a channel and bump its generation. Never fails.
    #[instrument(skip(self), fields(channel_id = %channel_id))]
    pub async fn invalidate_cache(&self, channel_id: ChannelId) {
        if let Err(e) = self.cache.delete(&balance_key(channel_id)).await {
            warn!(error = %e, "balance cache invalidation failed");
        }
    }

    /// Balances of many channels with two grouped SUM queries.
    ///
    /// Soft-deleted and unknown channels are left out of the result; channels
    /// without accounts yet resolve to zero.
    #[instrument(skip(self, channel_ids), fields(channel_count = channel_ids.len()), err)]
    pub async fn get_balance_for_channels(
        &self,
        channel_ids: &[ChannelId],
    ) -> Result<HashMap<ChannelId, ChannelBalance>, LedgerError> {
        let channels = self.channels.channels(channel_ids).await?;
        self.bulk_balances(&channels).await
    }

    // --- aggregation ----------------------------------------------------------

    /// Roll-up over all non-deleted channels of a legal entity.
    #[instrument(skip(self), fields(legal_entity_id = %legal_entity_id), err)]
    pub async fn get_legal_entity_balance(
        &self,
        legal_entity_id: LegalEntityId,
    ) -> Result<ChannelBalance, LedgerError> {
        let channels = self.channels.legal_entity_channels(legal_entity_id).await?;
        let balances = self.bulk_balances(&channels).await?;
        Ok(ChannelBalance::aggregate(balances.values()))
    }

    // --- transaction operations -----------------------------------------------

    /// CASH ↑ / REVENUE ↓.
    pub async fn record_income(
        &self,
        channel_id: ChannelId,
        request: TransactionRequest,
    ) -> Result<TransactionId, LedgerError> {
        self.execute(channel_id, TransactionKind::Income, request).await
    }

    /// CASH → FROZEN. Requires `available >= amount`.
    pub async fn freeze_amount(
        &self,
        channel_id: ChannelId,
        request: TransactionRequest,
    ) -> Result<TransactionId, LedgerError> {
        self.execute(channel_id, TransactionKind::Freeze, request).await
    }

    /// FROZEN → CASH. Requires `frozen >= amount`.
    pub async fn unfreeze_amount(
        &self,
        channel_id: ChannelId,
        request: TransactionRequest,
    ) -> Result<TransactionId, LedgerError> {
        self.execute(channel_id, TransactionKind::Unfreeze, request).await
    }

    /// CASH → EXPENSE. Requires `available >= amount`.
    pub async fn record_payout(
        &self,
        channel_id: ChannelId,
        request: TransactionRequest,
    ) -> Result<TransactionId, LedgerError> {
        self.execute(channel_id, TransactionKind::Payout, request).await
    }

    /// CASH → EXPENSE. Requires `available >= amount`.
    pub async fn record_commission(
        &self,
        channel_id: ChannelId,
        request: TransactionRequest,
    ) -> Result<TransactionId, LedgerError> {
        self.execute(channel_id, TransactionKind::Commission, request).await
    }

    // --- verification & history -----------------------------------------------

    /// Σdebits == Σcredits for a transaction group. Unknown ids are not balanced.
    #[instrument(skip(self), fields(transaction_id = %transaction_id), err)]
    pub async fn validate_transaction_balance(
        &self,
        transaction_id: TransactionId,
    ) -> Result<bool, LedgerError> {
        let entries = self.store.transaction_entries(transaction_id).await?;
        Ok(is_balanced(&entries))
    }

    pub async fn transaction_entries(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.transaction_entries(transaction_id).await
    }

    /// Latest entries of a channel, newest first.
    pub async fn channel_history(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.channel_entries(channel_id, limit).await
    }

    /// Reconciliation sweep; expected to return nothing.
    #[instrument(skip(self), err)]
    pub async fn find_unbalanced_transactions(&self) -> Result<Vec<TransactionId>, LedgerError> {
        let unbalanced = self.store.unbalanced_transactions().await?;
        if !unbalanced.is_empty() {
            warn!(count = unbalanced.len(), "unbalanced transaction groups found");
        }
        Ok(unbalanced)
    }

    // --- internals --------------------------------------------------------------

    #[instrument(skip(self, request), fields(channel_id = %channel_id, kind = %kind, amount = %request.amount), err)]
    async fn execute(
        &self,
        channel_id: ChannelId,
        kind: TransactionKind,
        request: TransactionRequest,
    ) -> Result<TransactionId, LedgerError> {
        let posting = Posting::new(channel_id, self.settings.currency.clone(), kind, request)?;
        let channel = self.require_channel(channel_id).await?;
        let posting = if channel.is_deleted {
            posting.for_inactive_channel()
        } else {
            posting
        };

        if let Err(e) = self.store.post(&posting).await {
            if e.is_validation() {
                debug!(error = %e, "posting rejected");
            }
            return Err(e);
        }

        self.invalidate_cache(channel_id).await;
        info!(transaction_id = %posting.transaction_id, "posting committed");
        Ok(posting.transaction_id)
    }

    /// Cache probe of the read path. `None` means the cache is unavailable
    /// and the computed value is not written through.
    async fn probe_cache(&self, key: &str) -> Option<CacheLookup> {
        match self.cache.get(key).await {
            Ok(Some(cached)) => return Some(CacheLookup::Hit(cached)),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "balance cache read failed; computing from store");
                return None;
            }
        }
        match self.cache.generation(key).await {
            Ok(generation) => Some(CacheLookup::Miss(generation)),
            Err(e) => {
                warn!(error = %e, "balance cache generation read failed; not caching");
                None
            }
        }
    }

    async fn require_channel(&self, channel_id: ChannelId) -> Result<Channel, LedgerError> {
        self.channels
            .channel(channel_id)
            .await?
            .ok_or(LedgerError::ChannelNotFound(channel_id))
    }

    async fn derive(&self, accounts: &ChannelAccounts) -> Result<ChannelBalance, LedgerError> {
        let sums = self
            .store
            .account_sums(&[accounts.cash.id, accounts.frozen.id])
            .await?;
        Ok(ChannelBalance::derive(
            sums.get(&accounts.cash.id).copied().unwrap_or_default(),
            sums.get(&accounts.frozen.id).copied().unwrap_or_default(),
        ))
    }

    async fn bulk_balances(
        &self,
        channels: &[Channel],
    ) -> Result<HashMap<ChannelId, ChannelBalance>, LedgerError> {
        let active: Vec<ChannelId> = channels.iter().filter(|c| !c.is_deleted).map(|c| c.id).collect();
        if active.is_empty() {
            return Ok(HashMap::new());
        }

        let accounts = self.store.find_accounts(&active, &self.settings.currency).await?;

        let mut cash_of: HashMap<ChannelId, AccountId> = HashMap::new();
        let mut frozen_of: HashMap<ChannelId, AccountId> = HashMap::new();
        for a in &accounts {
            match a.kind {
                AccountKind::Cash => {
                    cash_of.insert(a.channel_id, a.id);
                }
                AccountKind::Frozen => {
                    frozen_of.insert(a.channel_id, a.id);
                }
                AccountKind::Revenue | AccountKind::Expense => {}
            }
        }

        let cash_ids: Vec<AccountId> = cash_of.values().copied().collect();
        let frozen_ids: Vec<AccountId> = frozen_of.values().copied().collect();
        let cash_sums = self.store.account_sums(&cash_ids).await?;
        let frozen_sums = self.store.account_sums(&frozen_ids).await?;

        Ok(active
            .into_iter()
            .map(|channel_id| {
                let cash = cash_of
                    .get(&channel_id)
                    .and_then(|id| cash_sums.get(id))
                    .copied()
                    .unwrap_or_default();
                let frozen = frozen_of
                    .get(&channel_id)
                    .and_then(|id| frozen_sums.get(id))
                    .copied()
                    .unwrap_or_default();
                (channel_id, ChannelBalance::derive(cash, frozen))
            })
            .collect())
    }
}
