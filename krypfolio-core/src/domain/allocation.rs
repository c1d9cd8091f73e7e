//! Allocation: a dated, capped, normalized set of per-asset weights.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One asset's slot in an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub symbol: String,
    pub ranking_metric: f64,
    pub price: f64,
    /// Target weight in `[0, 1]`.
    pub ratio: f64,
}

/// Ordered allocation for a single date, ranked by metric descending.
///
/// Ratios from the allocator sum to one; the engine re-checks the sum before
/// acting on a rebalance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub timestamp: NaiveDate,
    pub entries: Vec<AllocationEntry>,
}

impl Allocation {
    pub fn new(timestamp: NaiveDate, entries: Vec<AllocationEntry>) -> Self {
        Self { timestamp, entries }
    }

    /// An allocation with no entries (no valid assets on this date).
    pub fn empty(timestamp: NaiveDate) -> Self {
        Self {
            timestamp,
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sum of all ratios.
    pub fn ratio_sum(&self) -> f64 {
        self.entries.iter().map(|e| e.ratio).sum()
    }

    /// Value of one unit of capital invested exactly per the ratios at current prices.
    ///
    /// Compared across rebalance events to detect momentum; never used to value
    /// the live portfolio.
    pub fn notional_price(&self) -> f64 {
        self.entries.iter().map(|e| e.price * e.ratio).sum()
    }

    pub fn get(&self, symbol: &str) -> Option<&AllocationEntry> {
        self.entries.iter().find(|e| e.symbol == symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    /// Price of `symbol` on this date, if it is part of the allocation.
    pub fn price_of(&self, symbol: &str) -> Option<f64> {
        self.get(symbol).map(|e| e.price)
    }
}
