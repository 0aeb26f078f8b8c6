use chrono::Duration;
use serde::{Deserialize, Serialize};

/// A booking must fit inside one day.
pub const MAX_DURATION_MINUTES: i64 = 24 * 60;
/// Roughly five years.
pub const MAX_ADVANCE_MINUTES: i64 = 5 * 366 * 24 * 60;
/// Minor currency units.
pub const MAX_PRICE: i64 = 100_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub studio_id: String,
    pub name: String,
    pub duration_minutes: i64,
    /// Minor currency units.
    pub price: i64,
    pub requires_deposit: bool,
    pub deposit_percentage: i64,
    pub min_advance_minutes: i64,
    pub max_advance_minutes: i64,
    pub active: bool,
}

impl Service {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.duration_minutes > 0 && self.duration_minutes <= MAX_DURATION_MINUTES,
            "duration must be within 1..={MAX_DURATION_MINUTES} minutes"
        );
        anyhow::ensure!(
            (0..=MAX_PRICE).contains(&self.price),
            "price must be within 0..={MAX_PRICE}"
        );
        if self.requires_deposit {
            anyhow::ensure!(
                self.deposit_percentage > 0 && self.deposit_percentage <= 100,
                "deposit percentage must be within 1..=100"
            );
        }
        anyhow::ensure!(self.min_advance_minutes >= 0, "minimum advance must not be negative");
        anyhow::ensure!(
            self.max_advance_minutes >= self.min_advance_minutes,
            "maximum advance must not be below minimum advance"
        );
        anyhow::ensure!(
            self.max_advance_minutes <= MAX_ADVANCE_MINUTES,
            "maximum advance must not exceed {MAX_ADVANCE_MINUTES} minutes"
        );
        Ok(())
    }

    /// None when a stored row holds a length chrono cannot represent.
    pub fn duration(&self) -> Option<Duration> {
        Duration::try_minutes(self.duration_minutes)
    }

    pub fn min_advance(&self) -> Option<Duration> {
        Duration::try_minutes(self.min_advance_minutes)
    }

    pub fn max_advance(&self) -> Option<Duration> {
        Duration::try_minutes(self.max_advance_minutes)
    }

    /// Deposit owed up front, rounded up to the next minor unit. Zero when no deposit applies.
    pub fn deposit_required(&self) -> i64 {
        if !self.requires_deposit {
            return 0;
        }
        let deposit = (i128::from(self.price) * i128::from(self.deposit_percentage) + 99) / 100;
        i64::try_from(deposit).unwrap_or(self.price)
    }
}
