//! Denomination Catalog
//!
//! The fixed set of standard coin amounts used by both mixing and zerocoin,
//! and the pure splitting / matching logic over it.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::consensus_params::{Amount, COIN};

/// Denomination error types
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DenominationError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Amount),

    #[error("Amount {0} is below the smallest denomination")]
    BelowSmallestDenomination(Amount),

    #[error("Unknown denomination value: {0}")]
    UnknownDenomination(u64),
}

/// Standard coin amount, in whole coins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Denomination {
    One,
    Five,
    Ten,
    Fifty,
    OneHundred,
    FiveHundred,
    OneThousand,
    FiveThousand,
}

impl Denomination {
    /// Every catalog value, ascending
    pub const ALL: [Denomination; 8] = [
        Denomination::One,
        Denomination::Five,
        Denomination::Ten,
        Denomination::Fifty,
        Denomination::OneHundred,
        Denomination::FiveHundred,
        Denomination::OneThousand,
        Denomination::FiveThousand,
    ];

    /// Smallest catalog value
    pub const SMALLEST: Denomination = Denomination::One;

    /// Iterate the catalog in ascending order
    pub fn all() -> impl DoubleEndedIterator<Item = Denomination> {
        Self::ALL.into_iter()
    }

    /// Value in whole coins
    pub fn value(self) -> u64 {
        match self {
            Denomination::One => 1,
            Denomination::Five => 5,
            Denomination::Ten => 10,
            Denomination::Fifty => 50,
            Denomination::OneHundred => 100,
            Denomination::FiveHundred => 500,
            Denomination::OneThousand => 1000,
            Denomination::FiveThousand => 5000,
        }
    }

    /// Value in base units
    pub fn amount(self) -> Amount {
        self.value() as Amount * COIN
    }

    /// Look up a denomination by its whole-coin value
    pub fn from_value(value: u64) -> Option<Self> {
        Self::all().find(|d| d.value() == value)
    }

    /// Look up a denomination by its exact base-unit amount
    pub fn from_amount(amount: Amount) -> Option<Self> {
        Self::all().find(|d| d.amount() == amount)
    }

    /// Compact storage identifier
    pub fn id(self) -> u16 {
        self.value() as u16
    }

    /// Inverse of [`Denomination::id`]
    pub fn from_id(id: u16) -> Result<Self, DenominationError> {
        Self::from_value(id as u64).ok_or(DenominationError::UnknownDenomination(id as u64))
    }

    /// Next denomination above this one
    pub fn next_higher(self) -> Option<Self> {
        Self::all().find(|d| d.value() > self.value())
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Result of splitting an amount into catalog values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    /// Denominations, largest first
    pub denominations: Vec<Denomination>,
    /// Irreducible dust left unconverted
    pub remainder: Amount,
}

impl Decomposition {
    /// Sum of the denominations
    pub fn total(&self) -> Amount {
        self.denominations.iter().map(|d| d.amount()).sum()
    }
}

/// Greedy largest-first decomposition of a spendable amount
pub fn decompose(amount: Amount) -> Result<Decomposition, DenominationError> {
    if amount <= 0 {
        return Err(DenominationError::InvalidAmount(amount));
    }

    let mut remaining = amount;
    let mut denominations = Vec::new();
    for denom in Denomination::all().rev() {
        let value = denom.amount();
        while remaining >= value {
            denominations.push(denom);
            remaining -= value;
        }
    }

    Ok(Decomposition {
        denominations,
        remainder: remaining,
    })
}

/// Denomination whose amount equals the UTXO value exactly
pub fn matches(utxo_value: Amount) -> Option<Denomination> {
    Denomination::from_amount(utxo_value)
}

/// Count of coins per denomination
pub type DenominationCounts = BTreeMap<Denomination, usize>;

/// Unlimited greedy decomposition into counts, used for change
pub fn change_for(amount: Amount) -> DenominationCounts {
    let mut counts = empty_counts();
    if let Ok(decomposition) = decompose(amount) {
        for denom in decomposition.denominations {
            *counts.entry(denom).or_insert(0) += 1;
        }
    }
    counts
}

/// Greedy largest-first selection limited to the coins actually held
pub fn select_spend_denominations(target: Amount, held: &DenominationCounts) -> DenominationCounts {
    let mut used = empty_counts();
    let mut remaining = target;

    for denom in Denomination::all().rev() {
        let available = held.get(&denom).copied().unwrap_or(0);
        let value = denom.amount();
        let taken = used.entry(denom).or_insert(0);
        while remaining >= value && *taken < available {
            *taken += 1;
            remaining -= value;
        }
    }
    used
}

/// Largest denomination with a nonzero count
pub fn max_denomination_held(held: &DenominationCounts) -> Option<Denomination> {
    Denomination::all()
        .rev()
        .find(|d| held.get(d).copied().unwrap_or(0) > 0)
}

/// Total number of coins in a count map
pub fn coin_count(counts: &DenominationCounts) -> usize {
    counts.values().sum()
}

/// Total value of a count map
pub fn counts_total(counts: &DenominationCounts) -> Amount {
    counts
        .iter()
        .map(|(denom, count)| denom.amount() * *count as Amount)
        .sum()
}

fn empty_counts() -> DenominationCounts {
    Denomination::all().map(|d| (d, 0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coins(n: i64) -> Amount {
        n * COIN
    }

    #[test]
    fn test_decompose_ten_thousand() {
        let result = decompose(coins(10_000)).unwrap();
        assert_eq!(
            result.denominations,
            vec![Denomination::FiveThousand, Denomination::FiveThousand]
        );
        assert_eq!(result.remainder, 0);
    }

    #[test]
    fn test_decompose_leaves_dust() {
        let amount = coins(6_666) + 12_345;
        let result = decompose(amount).unwrap();
        assert_eq!(result.denominations.len(), 8);
        assert_eq!(result.remainder, 12_345);
        assert_eq!(result.total() + result.remainder, amount);
    }

    #[test]
    fn test_decompose_sum_property() {
        for amount in [coins(1), coins(7) + 1, coins(99), coins(1234) + COIN - 1, coins(55_555)] {
            let result = decompose(amount).unwrap();
            assert_eq!(result.total(), amount - result.remainder);
            assert!(result.remainder < Denomination::SMALLEST.amount());
        }
    }

    #[test]
    fn test_decompose_rejects_non_positive() {
        assert_eq!(decompose(0), Err(DenominationError::InvalidAmount(0)));
        assert_eq!(decompose(-5), Err(DenominationError::InvalidAmount(-5)));
    }

    #[test]
    fn test_matches() {
        assert_eq!(matches(coins(50)), Some(Denomination::Fifty));
        assert_eq!(matches(coins(50) + 1), None);
        assert_eq!(matches(coins(2)), None);
    }

    #[test]
    fn test_select_spend_limited_by_held() {
        let mut held = DenominationCounts::new();
        held.insert(Denomination::Ten, 4);
        held.insert(Denomination::Five, 1);

        let used = select_spend_denominations(coins(26), &held);
        assert_eq!(used[&Denomination::Ten], 2);
        assert_eq!(used[&Denomination::Five], 1);
        assert_eq!(counts_total(&used), coins(25));
        assert_eq!(max_denomination_held(&held), Some(Denomination::Ten));
    }

    #[test]
    fn test_change_for() {
        let change = change_for(coins(16));
        assert_eq!(change[&Denomination::Ten], 1);
        assert_eq!(change[&Denomination::Five], 1);
        assert_eq!(change[&Denomination::One], 1);
        assert_eq!(coin_count(&change), 3);
    }

    #[test]
    fn test_id_and_ordering() {
        assert_eq!(Denomination::from_id(100), Ok(Denomination::OneHundred));
        assert!(Denomination::from_id(3).is_err());
        assert_eq!(Denomination::Fifty.next_higher(), Some(Denomination::OneHundred));
        assert_eq!(Denomination::FiveThousand.next_higher(), None);
        assert!(Denomination::One < Denomination::FiveThousand);
    }
}
