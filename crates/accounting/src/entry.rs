use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use adledger_core::{AccountId, DomainError, DomainResult, EntryId, TransactionId};

/// Free-form key/value metadata attached to entries.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Side of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntrySide {
    Debit,
    Credit,
}

impl EntrySide {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySide::Debit => "DEBIT",
            EntrySide::Credit => "CREDIT",
        }
    }
}

impl core::str::FromStr for EntrySide {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBIT" => Ok(EntrySide::Debit),
            "CREDIT" => Ok(EntrySide::Credit),
            other => Err(DomainError::validation(format!("unknown entry side '{other}'"))),
        }
    }
}

/// Business meaning of a transaction group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Income,
    Freeze,
    Unfreeze,
    Payout,
    Commission,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 5] = [
        TransactionKind::Income,
        TransactionKind::Freeze,
        TransactionKind::Unfreeze,
        TransactionKind::Payout,
        TransactionKind::Commission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "INCOME",
            TransactionKind::Freeze => "FREEZE",
            TransactionKind::Unfreeze => "UNFREEZE",
            TransactionKind::Payout => "PAYOUT",
            TransactionKind::Commission => "COMMISSION",
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::validation(format!("unknown transaction kind '{s}'")))
    }
}

/// One immutable line in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    /// Strictly positive, two decimal places.
    pub amount: Decimal,
    pub side: EntrySide,
    pub transaction_id: TransactionId,
    pub transaction_kind: TransactionKind,
    pub description: String,
    pub source_kind: Option<String>,
    pub source_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Debit positive, credit negative.
    pub fn signed_amount(&self) -> Decimal {
        match self.side {
            EntrySide::Debit => self.amount,
            EntrySide::Credit => -self.amount,
        }
    }
}

/// Running debit / credit totals of one account (or one transaction group).
///
/// Plain `Decimal` addition is safe here because every stored amount is below
/// [`adledger_core::MAX_AMOUNT`]; see its docs for the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountSums {
    pub debits: Decimal,
    pub credits: Decimal,
}

impl AccountSums {
    pub fn new(debits: Decimal, credits: Decimal) -> Self {
        Self { debits, credits }
    }

    pub fn add(&mut self, side: EntrySide, amount: Decimal) {
        match side {
            EntrySide::Debit => self.debits += amount,
            EntrySide::Credit => self.credits += amount,
        }
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut sums = Self::default();
        for e in entries {
            sums.add(e.side, e.amount);
        }
        sums
    }

    /// Σdebits − Σcredits.
    pub fn balance(&self) -> Decimal {
        self.debits - self.credits
    }
}

/// Σdebits == Σcredits over a transaction group. An empty group is not balanced.
pub fn is_balanced(entries: &[LedgerEntry]) -> bool {
    !entries.is_empty() && AccountSums::from_entries(entries).balance().is_zero()
}

/// Validate a group before it is written: ≥2 lines, positive amounts, one
/// transaction id, debits equal credits.
pub fn check_balanced(entries: &[LedgerEntry]) -> DomainResult<()> {
    if entries.len() < 2 {
        return Err(DomainError::invariant("a transaction needs at least two entries"));
    }

    let transaction_id = entries[0].transaction_id;
    for line in entries {
        if line.amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be positive"));
        }
        if line.transaction_id != transaction_id {
            return Err(DomainError::invariant("entries span several transactions"));
        }
    }

    if !is_balanced(entries) {
        return Err(DomainError::invariant("debits must equal credits"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(tx: TransactionId, amount: Decimal, side: EntrySide) -> LedgerEntry {
        LedgerEntry {
            id: EntryId::new(),
            account_id: AccountId::new(),
            amount,
            side,
            transaction_id: tx,
            transaction_kind: TransactionKind::Income,
            description: String::new(),
            source_kind: None,
            source_id: None,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn balanced_pair_passes() {
        let tx = TransactionId::new();
        let lines = vec![line(tx, dec!(10.00), EntrySide::Debit), line(tx, dec!(10.00), EntrySide::Credit)];
        assert!(is_balanced(&lines));
        check_balanced(&lines).unwrap();
    }

    #[test]
    fn unbalanced_pair_is_rejected() {
        let tx = TransactionId::new();
        let lines = vec![line(tx, dec!(100), EntrySide::Debit), line(tx, dec!(90), EntrySide::Credit)];
        assert!(!is_balanced(&lines));
        let err = check_balanced(&lines).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("debits must equal credits") => {}
            _ => panic!("Expected invariant violation for unbalanced entry"),
        }
    }

    #[test]
    fn single_line_and_empty_groups_are_rejected() {
        let tx = TransactionId::new();
        assert!(!is_balanced(&[]));
        assert!(check_balanced(&[line(tx, dec!(1), EntrySide::Debit)]).is_err());
    }

    #[test]
    fn mixed_transaction_ids_are_rejected() {
        let lines = vec![
            line(TransactionId::new(), dec!(5), EntrySide::Debit),
            line(TransactionId::new(), dec!(5), EntrySide::Credit),
        ];
        assert!(check_balanced(&lines).is_err());
    }

    #[test]
    fn sums_track_signed_balance() {
        let tx = TransactionId::new();
        let lines = [
            line(tx, dec!(30), EntrySide::Debit),
            line(tx, dec!(12.50), EntrySide::Credit),
        ];
        let sums = AccountSums::from_entries(&lines);
        assert_eq!(sums.debits, dec!(30));
        assert_eq!(sums.credits, dec!(12.50));
        assert_eq!(sums.balance(), dec!(17.50));
        assert_eq!(lines[1].signed_amount(), dec!(-12.50));
    }

    #[test]
    fn kinds_round_trip_through_strings() {
        for kind in TransactionKind::ALL {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert_eq!("credit".parse::<EntrySide>().unwrap(), EntrySide::Credit);
    }
}
