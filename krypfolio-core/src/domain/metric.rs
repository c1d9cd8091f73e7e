//! AssetMetric: one asset's ranking input on a single date.

use serde::{Deserialize, Serialize};

/// Per-asset record supplied by the snapshot provider for one date.
///
/// `ranking_metric` is whatever the strategy ranks by: a raw market
/// capitalisation or a smoothed average of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetric {
    pub symbol: String,
    pub ranking_metric: f64,
    pub price: f64,
}

impl AssetMetric {
    pub fn new(symbol: impl Into<String>, ranking_metric: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            ranking_metric,
            price,
        }
    }

    /// An asset is rankable when both its metric and its price are finite and positive.
    ///
    /// Non-positive metrics mark unlisted or dead assets; a non-positive price
    /// would make unit counts undefined at rebalance time.
    pub fn is_rankable(&self) -> bool {
        self.ranking_metric.is_finite()
            && self.ranking_metric > 0.0
            && self.price.is_finite()
            && self.price > 0.0
    }
}
