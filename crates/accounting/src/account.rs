use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use adledger_core::{AccountId, ChannelId, Currency, DomainError, DomainResult};

/// Account kind held by every channel.
///
/// CASH and FROZEN carry the channel's money; REVENUE and EXPENSE are the
/// contra accounts that income and outflows are booked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountKind {
    Cash,
    Frozen,
    Revenue,
    Expense,
}

impl AccountKind {
    pub const ALL: [AccountKind; 4] = [
        AccountKind::Cash,
        AccountKind::Frozen,
        AccountKind::Revenue,
        AccountKind::Expense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Cash => "CASH",
            AccountKind::Frozen => "FROZEN",
            AccountKind::Revenue => "REVENUE",
            AccountKind::Expense => "EXPENSE",
        }
    }
}

impl core::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AccountKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CASH" => Ok(AccountKind::Cash),
            "FROZEN" => Ok(AccountKind::Frozen),
            "REVENUE" => Ok(AccountKind::Revenue),
            "EXPENSE" => Ok(AccountKind::Expense),
            other => Err(DomainError::validation(format!("unknown account kind '{other}'"))),
        }
    }
}

/// One bucket of money for one channel in one currency.
///
/// Unique per `(channel_id, kind, currency)`. Never deleted, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub channel_id: ChannelId,
    pub kind: AccountKind,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn open(channel_id: ChannelId, kind: AccountKind, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            channel_id,
            kind,
            currency,
            created_at: now,
        }
    }
}

/// The full set of four accounts of one channel + currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAccounts {
    pub cash: Account,
    pub frozen: Account,
    pub revenue: Account,
    pub expense: Account,
}

impl ChannelAccounts {
    /// Assemble from loaded rows. All four kinds must be present exactly once
    /// and belong to the same channel and currency.
    pub fn from_accounts(accounts: impl IntoIterator<Item = Account>) -> DomainResult<Self> {
        let mut cash = None;
        let mut frozen = None;
        let mut revenue = None;
        let mut expense = None;

        for account in accounts {
            let slot = match account.kind {
                AccountKind::Cash => &mut cash,
                AccountKind::Frozen => &mut frozen,
                AccountKind::Revenue => &mut revenue,
                AccountKind::Expense => &mut expense,
            };
            if slot.is_some() {
                return Err(DomainError::invariant(format!(
                    "duplicate {} account for channel {}",
                    account.kind, account.channel_id
                )));
            }
            *slot = Some(account);
        }

        let missing = |kind: AccountKind| DomainError::invariant(format!("missing {kind} account"));
        let set = Self {
            cash: cash.ok_or_else(|| missing(AccountKind::Cash))?,
            frozen: frozen.ok_or_else(|| missing(AccountKind::Frozen))?,
            revenue: revenue.ok_or_else(|| missing(AccountKind::Revenue))?,
            expense: expense.ok_or_else(|| missing(AccountKind::Expense))?,
        };

        for account in set.iter() {
            if account.channel_id != set.cash.channel_id || account.currency != set.cash.currency {
                return Err(DomainError::invariant(
                    "channel accounts span several channels or currencies",
                ));
            }
        }

        Ok(set)
    }

    pub fn get(&self, kind: AccountKind) -> &Account {
        match kind {
            AccountKind::Cash => &self.cash,
            AccountKind::Frozen => &self.frozen,
            AccountKind::Revenue => &self.revenue,
            AccountKind::Expense => &self.expense,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.cash.channel_id
    }

    pub fn currency(&self) -> &Currency {
        &self.cash.currency
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        [&self.cash, &self.frozen, &self.revenue, &self.expense].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_all(channel_id: ChannelId) -> Vec<Account> {
        AccountKind::ALL
            .iter()
            .map(|k| Account::open(channel_id, *k, Currency::default(), Utc::now()))
            .collect()
    }

    #[test]
    fn assembles_all_four_kinds() {
        let channel_id = ChannelId::new();
        let set = ChannelAccounts::from_accounts(open_all(channel_id)).unwrap();
        assert_eq!(set.channel_id(), channel_id);
        for kind in AccountKind::ALL {
            assert_eq!(set.get(kind).kind, kind);
        }
        assert_eq!(set.iter().count(), 4);
    }

    #[test]
    fn missing_kind_is_an_invariant_violation() {
        let mut accounts = open_all(ChannelId::new());
        accounts.retain(|a| a.kind != AccountKind::Expense);
        let err = ChannelAccounts::from_accounts(accounts).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(msg) if msg.contains("EXPENSE")));
    }

    #[test]
    fn duplicate_kind_is_rejected() {
        let channel_id = ChannelId::new();
        let mut accounts = open_all(channel_id);
        accounts.push(Account::open(channel_id, AccountKind::Cash, Currency::default(), Utc::now()));
        assert!(ChannelAccounts::from_accounts(accounts).is_err());
    }

    #[test]
    fn mixed_channels_are_rejected() {
        let mut accounts = open_all(ChannelId::new());
        accounts[3] = Account::open(ChannelId::new(), AccountKind::Expense, Currency::default(), Utc::now());
        assert!(ChannelAccounts::from_accounts(accounts).is_err());
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("frozen".parse::<AccountKind>().unwrap(), AccountKind::Frozen);
        assert_eq!(AccountKind::Revenue.to_string(), "REVENUE");
        assert!("asset".parse::<AccountKind>().is_err());
    }
}
