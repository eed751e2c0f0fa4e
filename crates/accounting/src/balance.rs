use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use adledger_core::Money;

use crate::entry::AccountSums;

/// Derived balance of one channel (or a roll-up of several).
///
/// Not persisted. All three figures are non-negative and carry two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBalance {
    /// CASH + FROZEN.
    pub balance: Decimal,
    /// `max(FROZEN, 0)`.
    pub frozen: Decimal,
    /// `max(CASH, 0)`; what may currently be paid out.
    pub available: Decimal,
}

impl ChannelBalance {
    pub fn zero() -> Self {
        Self {
            balance: Money::zero(),
            frozen: Money::zero(),
            available: Money::zero(),
        }
    }

    /// Derive from the raw sums of the CASH and FROZEN accounts.
    pub fn derive(cash: AccountSums, frozen: AccountSums) -> Self {
        let cash = cash.balance();
        let frozen = frozen.balance();
        Self {
            balance: Money::clamp_non_negative(cash + frozen),
            frozen: Money::clamp_non_negative(frozen),
            available: Money::clamp_non_negative(cash),
        }
    }

    /// Roll up several channel balances (e.g. all channels of a legal entity).
    ///
    /// `balance` and `frozen` are summed; `available` is re-derived as
    /// `max(balance - frozen, 0)` rather than summed.
    pub fn aggregate<'a>(balances: impl IntoIterator<Item = &'a ChannelBalance>) -> Self {
        let (balance, frozen) = balances
            .into_iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(b, f), cb| (b + cb.balance, f + cb.frozen));

        Self {
            balance: Money::clamp_non_negative(balance),
            frozen: Money::clamp_non_negative(frozen),
            available: Money::clamp_non_negative(balance - frozen),
        }
    }
}

impl Default for ChannelBalance {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn derive_splits_cash_and_frozen() {
        let cash = AccountSums::new(dec!(1000.00), dec!(300.00));
        let frozen = AccountSums::new(dec!(300.00), dec!(0));
        let b = ChannelBalance::derive(cash, frozen);
        assert_eq!(b.balance, dec!(1000.00));
        assert_eq!(b.available, dec!(700.00));
        assert_eq!(b.frozen, dec!(300.00));
        assert_eq!(b.available.to_string(), "700.00");
    }

    #[test]
    fn derive_clamps_negative_components() {
        let cash = AccountSums::new(dec!(0), dec!(50));
        let frozen = AccountSums::new(dec!(20), dec!(0));
        let b = ChannelBalance::derive(cash, frozen);
        assert_eq!(b.available, dec!(0));
        assert_eq!(b.frozen, dec!(20));
        assert_eq!(b.balance, dec!(0));
    }

    #[test]
    fn zero_has_ledger_scale() {
        let z = ChannelBalance::zero();
        assert_eq!(z.balance.to_string(), "0.00");
        assert_eq!(z, ChannelBalance::default());
    }

    #[test]
    fn aggregate_rederives_available() {
        let a = ChannelBalance {
            balance: dec!(500.00),
            frozen: dec!(100.00),
            available: dec!(400.00),
        };
        let b = ChannelBalance {
            balance: dec!(300.00),
            frozen: dec!(0.00),
            available: dec!(300.00),
        };
        let total = ChannelBalance::aggregate([&a, &b]);
        assert_eq!(total.balance, dec!(800.00));
        assert_eq!(total.frozen, dec!(100.00));
        assert_eq!(total.available, dec!(700.00));
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        assert_eq!(ChannelBalance::aggregate(Vec::<ChannelBalance>::new().iter()), ChannelBalance::zero());
    }
}
