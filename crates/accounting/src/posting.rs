//! Posting rules for the five transaction operations.
//!
//! A [`Posting`] is the validated, not-yet-written form of one operation. The
//! store evaluates [`Posting::authorize`] while it holds the channel's account
//! locks, then writes [`Posting::entries`] in the same transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use adledger_core::{ChannelId, Currency, DomainError, DomainResult, EntryId, Money, TransactionId};

use crate::account::{AccountKind, ChannelAccounts};
use crate::balance::ChannelBalance;
use crate::entry::{EntrySide, LedgerEntry, Metadata, TransactionKind, check_balanced};

/// Precondition an operation checks against the current balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Only `amount > 0`.
    None,
    /// `available >= amount`.
    Available,
    /// `frozen >= amount`.
    Frozen,
}

impl Guard {
    pub fn check(&self, amount: Decimal, current: &ChannelBalance) -> DomainResult<()> {
        match self {
            Guard::None => Ok(()),
            Guard::Available if current.available >= amount => Ok(()),
            Guard::Available => Err(DomainError::InsufficientAvailable {
                requested: amount,
                available: current.available,
            }),
            Guard::Frozen if current.frozen >= amount => Ok(()),
            Guard::Frozen => Err(DomainError::InsufficientFrozen {
                requested: amount,
                frozen: current.frozen,
            }),
        }
    }
}

/// Which account is debited, which is credited, and what must hold first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingRule {
    pub kind: TransactionKind,
    pub debit: AccountKind,
    pub credit: AccountKind,
    pub guard: Guard,
}

impl PostingRule {
    pub const fn for_kind(kind: TransactionKind) -> Self {
        let (debit, credit, guard) = match kind {
            TransactionKind::Income => (AccountKind::Cash, AccountKind::Revenue, Guard::None),
            TransactionKind::Freeze => (AccountKind::Frozen, AccountKind::Cash, Guard::Available),
            TransactionKind::Unfreeze => (AccountKind::Cash, AccountKind::Frozen, Guard::Frozen),
            TransactionKind::Payout => (AccountKind::Expense, AccountKind::Cash, Guard::Available),
            TransactionKind::Commission => (AccountKind::Expense, AccountKind::Cash, Guard::Available),
        };
        Self {
            kind,
            debit,
            credit,
            guard,
        }
    }
}

/// Caller input shared by all five operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    /// Tag naming the external event (e.g. "placement", "payout_request").
    pub source_kind: Option<String>,
    /// Opaque reference into the external system.
    pub source_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TransactionRequest {
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount,
            description: String::new(),
            source_kind: None,
            source_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_source(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.source_kind = Some(kind.into());
        self.source_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A validated operation, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub transaction_id: TransactionId,
    pub channel_id: ChannelId,
    pub currency: Currency,
    pub rule: PostingRule,
    pub amount: Decimal,
    pub description: String,
    pub source_kind: Option<String>,
    pub source_id: Option<String>,
    pub metadata: Metadata,
    /// Soft-deleted channels always read as zero balance.
    pub channel_active: bool,
}

impl Posting {
    /// Validate the request locally. Nothing has been read or written yet.
    pub fn new(
        channel_id: ChannelId,
        currency: Currency,
        kind: TransactionKind,
        request: TransactionRequest,
    ) -> DomainResult<Self> {
        let amount = Money::positive(request.amount)?;
        Ok(Self {
            transaction_id: TransactionId::new(),
            channel_id,
            currency,
            rule: PostingRule::for_kind(kind),
            amount,
            description: request.description,
            source_kind: request.source_kind,
            source_id: request.source_id,
            metadata: request.metadata,
            channel_active: true,
        })
    }

    pub fn for_inactive_channel(mut self) -> Self {
        self.channel_active = false;
        self
    }

    pub fn kind(&self) -> TransactionKind {
        self.rule.kind
    }

    /// Check the operation's precondition against the balance read under lock.
    pub fn authorize(&self, current: &ChannelBalance) -> DomainResult<()> {
        let current = if self.channel_active {
            *current
        } else {
            ChannelBalance::zero()
        };
        self.rule.guard.check(self.amount, &current)
    }

    /// The balanced debit/credit pair for this operation.
    pub fn entries(&self, accounts: &ChannelAccounts, now: DateTime<Utc>) -> DomainResult<Vec<LedgerEntry>> {
        if accounts.channel_id() != self.channel_id || accounts.currency() != &self.currency {
            return Err(DomainError::invariant("posting targets a different channel account set"));
        }

        let line = |kind: AccountKind, side: EntrySide| LedgerEntry {
            id: EntryId::new(),
            account_id: accounts.get(kind).id,
            amount: self.amount,
            side,
            transaction_id: self.transaction_id,
            transaction_kind: self.rule.kind,
            description: self.description.clone(),
            source_kind: self.source_kind.clone(),
            source_id: self.source_id.clone(),
            metadata: self.metadata.clone(),
            created_at: now,
        };

        let entries = vec![
            line(self.rule.debit, EntrySide::Debit),
            line(self.rule.credit, EntrySide::Credit),
        ];
        check_balanced(&entries)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::entry::AccountSums;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn accounts_for(channel_id: ChannelId) -> ChannelAccounts {
        ChannelAccounts::from_accounts(
            AccountKind::ALL
                .iter()
                .map(|k| Account::open(channel_id, *k, Currency::default(), Utc::now())),
        )
        .unwrap()
    }

    /// Minimal in-process ledger: entries appended, balance derived.
    struct TestLedger {
        accounts: ChannelAccounts,
        entries: Vec<LedgerEntry>,
    }

    impl TestLedger {
        fn new() -> Self {
            Self {
                accounts: accounts_for(ChannelId::new()),
                entries: Vec::new(),
            }
        }

        fn sums(&self, kind: AccountKind) -> AccountSums {
            let id = self.accounts.get(kind).id;
            AccountSums::from_entries(self.entries.iter().filter(|e| e.account_id == id))
        }

        fn balance(&self) -> ChannelBalance {
            ChannelBalance::derive(self.sums(AccountKind::Cash), self.sums(AccountKind::Frozen))
        }

        fn post(&mut self, kind: TransactionKind, amount: Decimal) -> DomainResult<TransactionId> {
            let posting = Posting::new(
                self.accounts.channel_id(),
                Currency::default(),
                kind,
                TransactionRequest::new(amount),
            )?;
            posting.authorize(&self.balance())?;
            let lines = posting.entries(&self.accounts, Utc::now())?;
            self.entries.extend(lines);
            Ok(posting.transaction_id)
        }

        fn group(&self, tx: TransactionId) -> Vec<LedgerEntry> {
            self.entries.iter().filter(|e| e.transaction_id == tx).cloned().collect()
        }
    }

    #[test]
    fn rules_match_the_operation_table() {
        let table: HashMap<TransactionKind, (AccountKind, AccountKind, Guard)> = [
            (TransactionKind::Income, (AccountKind::Cash, AccountKind::Revenue, Guard::None)),
            (TransactionKind::Freeze, (AccountKind::Frozen, AccountKind::Cash, Guard::Available)),
            (TransactionKind::Unfreeze, (AccountKind::Cash, AccountKind::Frozen, Guard::Frozen)),
            (TransactionKind::Payout, (AccountKind::Expense, AccountKind::Cash, Guard::Available)),
            (TransactionKind::Commission, (AccountKind::Expense, AccountKind::Cash, Guard::Available)),
        ]
        .into_iter()
        .collect();

        for kind in TransactionKind::ALL {
            let rule = PostingRule::for_kind(kind);
            assert_eq!((rule.debit, rule.credit, rule.guard), table[&kind]);
        }
    }

    #[test]
    fn non_positive_amount_is_rejected_before_anything_else() {
        let err = Posting::new(
            ChannelId::new(),
            Currency::default(),
            TransactionKind::Income,
            TransactionRequest::new(dec!(0)),
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn freeze_moves_cash_to_frozen_without_changing_balance() {
        let mut ledger = TestLedger::new();
        ledger.post(TransactionKind::Income, dec!(1000.00)).unwrap();
        ledger.post(TransactionKind::Freeze, dec!(300.00)).unwrap();

        let b = ledger.balance();
        assert_eq!(b.balance, dec!(1000.00));
        assert_eq!(b.available, dec!(700.00));
        assert_eq!(b.frozen, dec!(300.00));
    }

    #[test]
    fn freeze_beyond_available_is_rejected() {
        let mut ledger = TestLedger::new();
        ledger.post(TransactionKind::Income, dec!(1000.00)).unwrap();
        let err = ledger.post(TransactionKind::Freeze, dec!(1500.00)).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientAvailable {
                requested: dec!(1500.00),
                available: dec!(1000.00),
            }
        );
        assert_eq!(ledger.entries.len(), 2);
    }

    #[test]
    fn unfreeze_beyond_frozen_is_rejected() {
        let mut ledger = TestLedger::new();
        ledger.post(TransactionKind::Income, dec!(100)).unwrap();
        ledger.post(TransactionKind::Freeze, dec!(40)).unwrap();
        let err = ledger.post(TransactionKind::Unfreeze, dec!(41)).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientFrozen { .. }));
    }

    #[test]
    fn payout_and_commission_reduce_balance() {
        let mut ledger = TestLedger::new();
        ledger.post(TransactionKind::Income, dec!(500)).unwrap();
        ledger.post(TransactionKind::Commission, dec!(50)).unwrap();
        ledger.post(TransactionKind::Payout, dec!(200)).unwrap();

        let b = ledger.balance();
        assert_eq!(b.balance, dec!(250.00));
        assert_eq!(b.available, dec!(250.00));
        assert_eq!(
            ledger.sums(AccountKind::Expense).balance(),
            dec!(250),
            "expense carries outflows"
        );
    }

    #[test]
    fn inactive_channel_authorizes_against_zero() {
        let posting = Posting::new(
            ChannelId::new(),
            Currency::default(),
            TransactionKind::Payout,
            TransactionRequest::new(dec!(1)),
        )
        .unwrap()
        .for_inactive_channel();

        let rich = ChannelBalance {
            balance: dec!(100),
            frozen: dec!(0),
            available: dec!(100),
        };
        assert!(matches!(
            posting.authorize(&rich),
            Err(DomainError::InsufficientAvailable { .. })
        ));
    }

    #[test]
    fn entries_refuse_foreign_account_set() {
        let posting = Posting::new(
            ChannelId::new(),
            Currency::default(),
            TransactionKind::Income,
            TransactionRequest::new(dec!(1)),
        )
        .unwrap();
        assert!(posting.entries(&accounts_for(ChannelId::new()), Utc::now()).is_err());
    }

    #[test]
    fn request_builder_carries_source_and_metadata() {
        let req = TransactionRequest::new(dec!(10))
            .with_description("placement #42")
            .with_source("placement", "42")
            .with_metadata("campaign", "spring");
        let posting = Posting::new(ChannelId::new(), Currency::default(), TransactionKind::Income, req).unwrap();
        let accounts = accounts_for(posting.channel_id);
        let lines = posting.entries(&accounts, Utc::now()).unwrap();
        for l in &lines {
            assert_eq!(l.source_kind.as_deref(), Some("placement"));
            assert_eq!(l.source_id.as_deref(), Some("42"));
            assert_eq!(l.metadata["campaign"], "spring");
            assert_eq!(l.description, "placement #42");
        }
    }

    fn op_strategy() -> impl Strategy<Value = (TransactionKind, Decimal)> {
        (
            prop::sample::select(TransactionKind::ALL.to_vec()),
            1i64..500_000i64,
        )
            .prop_map(|(kind, cents)| (kind, Decimal::new(cents, 2)))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every accepted operation writes a balanced group, and no
        /// reachable sequence drives available or frozen below zero.
        #[test]
        fn any_operation_sequence_stays_balanced_and_non_negative(
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let mut ledger = TestLedger::new();
            for (kind, amount) in ops {
                let before = ledger.entries.len();
                match ledger.post(kind, amount) {
                    Ok(tx) => prop_assert!(is_balanced_group(&ledger.group(tx))),
                    Err(e) => {
                        prop_assert!(e.is_validation());
                        prop_assert_eq!(ledger.entries.len(), before);
                    }
                }
                let b = ledger.balance();
                prop_assert!(b.available >= Decimal::ZERO);
                prop_assert!(b.frozen >= Decimal::ZERO);
                prop_assert_eq!(b.balance, b.available + b.frozen);
            }
        }

        /// Property: freeze then unfreeze of the same amount is a no-op on the balance.
        #[test]
        fn freeze_unfreeze_roundtrip(income in 1i64..1_000_000i64, pct in 1u32..=100u32) {
            let mut ledger = TestLedger::new();
            let income = Decimal::new(income, 2);
            ledger.post(TransactionKind::Income, income).unwrap();

            let before = ledger.balance();
            let x = (before.available * Decimal::from(pct) / Decimal::from(100)).round_dp(2);
            prop_assume!(x > Decimal::ZERO);

            ledger.post(TransactionKind::Freeze, x).unwrap();
            prop_assert_eq!(ledger.balance().balance, before.balance);
            ledger.post(TransactionKind::Unfreeze, x).unwrap();

            let after = ledger.balance();
            prop_assert_eq!(after.balance, before.balance);
            prop_assert_eq!(after.frozen, before.frozen);
            prop_assert_eq!(after.available, before.available);
        }
    }

    fn is_balanced_group(entries: &[LedgerEntry]) -> bool {
        crate::entry::is_balanced(entries)
    }
}
