//! Portfolio: per-asset holdings and their valuation.

use super::allocation::Allocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Units of one asset held, marked at the last known price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub price: f64,
    pub amount: f64,
}

impl Holding {
    pub fn new(symbol: impl Into<String>, price: f64, amount: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            amount,
        }
    }

    pub fn market_value(&self) -> f64 {
        self.price * self.amount
    }
}

/// Ordered holdings, unique by symbol.
///
/// Uninvested cash lives in the backtest state, not here: `balance()` is the
/// marked value of the holdings alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub holdings: Vec<Holding>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target the allocation's weights with `capital`, discarding previous unit counts.
    ///
    /// Holdings absent from the allocation are dropped: their value is part of
    /// the capital being redistributed.
    pub fn reweighted(allocation: &Allocation, capital: f64) -> Self {
        Self {
            holdings: allocation
                .entries
                .iter()
                .map(|e| Holding::new(e.symbol.clone(), e.price, e.ratio * capital / e.price))
                .collect(),
        }
    }

    /// Σ price × amount over all holdings.
    pub fn balance(&self) -> f64 {
        self.holdings.iter().map(Holding::market_value).sum()
    }

    /// Mark holdings to the allocation's prices.
    ///
    /// Holdings whose symbol is absent from the allocation keep their last
    /// known price; a missing quote is not a delisting.
    pub fn update_prices(&mut self, allocation: &Allocation) {
        let quotes: HashMap<&str, f64> = allocation
            .entries
            .iter()
            .map(|e| (e.symbol.as_str(), e.price))
            .collect();
        for holding in &mut self.holdings {
            if let Some(&price) = quotes.get(holding.symbol.as_str()) {
                holding.price = price;
            }
        }
    }

    /// Zero every amount, keeping symbols and prices.
    pub fn liquidate(&mut self) {
        for holding in &mut self.holdings {
            holding.amount = 0.0;
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.symbol == symbol)
    }
}
