//! Rules Engine
//!
//! Pure sweep policy: given a balance snapshot and the estimated gas price,
//! decide whether an account is worth sweeping right now.

use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::info;

use crate::config::SweepSettings;
use crate::types::{display_amount, BalanceSnapshot, SweepDecision};

/// Reference-unit price of an asset. No price feed: every asset is 1:1.
pub fn reference_price(_asset: &str) -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    max_gas_price: U256,
    minimum_amount: Decimal,
}

impl SweepPolicy {
    pub fn new(max_gas_price: U256, minimum_amount: Decimal) -> Self {
        Self {
            max_gas_price,
            minimum_amount,
        }
    }

    pub fn from_settings(settings: &SweepSettings) -> Self {
        Self::new(settings.max_gas_price(), settings.minimum_amount_usd)
    }

    /// Total snapshot value in reference units. Amounts too large for a
    /// `Decimal` saturate, which can only push the total over the minimum.
    pub fn total_value(snapshot: &BalanceSnapshot) -> Decimal {
        snapshot.entries.iter().fold(Decimal::ZERO, |acc, entry| {
            let units = Decimal::from_str(&display_amount(entry.amount, entry.decimals))
                .unwrap_or(Decimal::MAX);
            let value = units
                .checked_mul(reference_price(&entry.asset))
                .unwrap_or(Decimal::MAX);
            acc.checked_add(value).unwrap_or(Decimal::MAX)
        })
    }

    /// Gas price is checked first: an expensive network skips regardless of balance.
    pub fn should_sweep(&self, snapshot: &BalanceSnapshot, est_gas_price: U256) -> SweepDecision {
        if est_gas_price > self.max_gas_price {
            info!(
                gas_price = %est_gas_price,
                max_gas_price = %self.max_gas_price,
                "Gas too expensive, skipping"
            );
            return SweepDecision::SkipTooExpensive {
                gas_price: est_gas_price,
                max_gas_price: self.max_gas_price,
            };
        }

        let total = Self::total_value(snapshot);
        if total < self.minimum_amount {
            info!(
                total = %total,
                minimum = %self.minimum_amount,
                "Balance below minimum, skipping"
            );
            return SweepDecision::SkipBelowMinimum {
                total_value: total.to_string(),
                minimum: self.minimum_amount.to_string(),
            };
        }

        SweepDecision::Sweep
    }
}
