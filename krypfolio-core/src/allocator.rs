//! Cap-constrained allocator: ranked per-asset metrics to capped, normalized weights.
//!
//! Pipeline per date:
//! 1. Drop unrankable assets, rank by metric descending (stable), keep the top N.
//! 2. Weight each metric (linear or square root) and normalize to ratios.
//! 3. One left-to-right sweep: an entry above the cap is clamped and its overflow
//!    is spread over the entries after it, proportionally to their raw metric.
//!
//! The sweep never revisits an entry: an entry pushed over the cap by upstream
//! overflow is clamped in its own turn and passes the excess further down.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Allocation, AllocationEntry, AssetMetric};

/// Allocation failure for a single date. Sibling dates are unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("{timestamp}: weights sum to {sum}, no valid denominator")]
    NoWeightDenominator { timestamp: NaiveDate, sum: f64 },

    #[error("{timestamp}: weight for '{symbol}' is not finite")]
    NonFiniteWeight { timestamp: NaiveDate, symbol: String },
}

/// Transform applied to a ranking metric before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Weight proportional to the metric.
    Linear,
    /// Weight proportional to the square root of the metric (dampens the leaders).
    SquareRoot,
}

impl Weighting {
    pub fn weight(self, metric: f64) -> f64 {
        match self {
            Self::Linear => metric,
            Self::SquareRoot => metric.sqrt(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::SquareRoot => "square_root",
        }
    }
}

/// Allocator parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Number of top-ranked assets kept.
    pub top_n: usize,
    /// Maximum ratio for any single asset, in `(0, 1]`.
    pub cap: f64,
    pub weighting: Weighting,
}

impl AllocatorConfig {
    pub fn new(top_n: usize, cap: f64, weighting: Weighting) -> Self {
        Self {
            top_n,
            cap,
            weighting,
        }
    }

    /// Whether `top_n` assets at the cap can hold the full unit of capital.
    ///
    /// The allocator does not check this itself; callers reject configs where it fails.
    pub fn can_saturate(&self) -> bool {
        self.top_n as f64 * self.cap >= 1.0
    }
}

/// Stateless allocator bound to one configuration.
#[derive(Debug, Clone)]
pub struct Allocator {
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate one date's snapshot using the configured weighting.
    pub fn allocate(
        &self,
        timestamp: NaiveDate,
        snapshot: &[AssetMetric],
    ) -> Result<Allocation, DataError> {
        let weighting = self.config.weighting;
        allocate_with(timestamp, snapshot, self.config.top_n, self.config.cap, |m| {
            weighting.weight(m)
        })
    }
}

/// Allocate with an arbitrary metric transform.
///
/// Returns an empty allocation when no asset is rankable.
pub fn allocate_with<F>(
    timestamp: NaiveDate,
    snapshot: &[AssetMetric],
    top_n: usize,
    cap: f64,
    weight_fn: F,
) -> Result<Allocation, DataError>
where
    F: Fn(f64) -> f64,
{
    let ranked = rank(snapshot, top_n);
    if ranked.is_empty() {
        return Ok(Allocation::empty(timestamp));
    }

    let weights: Vec<f64> = ranked.iter().map(|m| weight_fn(m.ranking_metric)).collect();
    if let Some(i) = weights.iter().position(|w| !w.is_finite()) {
        return Err(DataError::NonFiniteWeight {
            timestamp,
            symbol: ranked[i].symbol.clone(),
        });
    }

    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(DataError::NoWeightDenominator {
            timestamp,
            sum: total,
        });
    }

    let raw: Vec<f64> = weights.iter().map(|w| w / total).collect();
    let metrics: Vec<f64> = ranked.iter().map(|m| m.ranking_metric).collect();
    let ratios = cap_ratios(&raw, &metrics, cap);

    let entries = ranked
        .into_iter()
        .zip(ratios)
        .map(|(m, ratio)| AllocationEntry {
            symbol: m.symbol.clone(),
            ranking_metric: m.ranking_metric,
            price: m.price,
            ratio,
        })
        .collect();

    Ok(Allocation::new(timestamp, entries))
}

/// Rankable assets, metric descending, ties in snapshot order, truncated to `top_n`.
pub fn rank(snapshot: &[AssetMetric], top_n: usize) -> Vec<&AssetMetric> {
    let mut ranked: Vec<&AssetMetric> = snapshot.iter().filter(|m| m.is_rankable()).collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.ranking_metric.total_cmp(&a.ranking_metric));
    ranked.truncate(top_n);
    ranked
}

/// Single forward cap sweep over ranked ratios.
///
/// `ratios[i]` above `cap` is clamped; the overflow goes to every `j > i` in
/// proportion to `metrics[j] / Σ_{k>i} metrics[k]`. Entries already passed are
/// final. Overflow at the last index has nowhere to go and is dropped, which
/// only happens when `ratios.len() * cap < 1`.
pub fn cap_ratios(ratios: &[f64], metrics: &[f64], cap: f64) -> Vec<f64> {
    debug_assert_eq!(ratios.len(), metrics.len());
    let n = ratios.len();
    let mut out = ratios.to_vec();

    for i in 0..n {
        if out[i] <= cap {
            continue;
        }
        let overflow = out[i] - cap;
        out[i] = cap;

        let downstream: f64 = metrics[i + 1..].iter().sum();
        if downstream <= 0.0 {
            continue;
        }
        for j in i + 1..n {
            out[j] += overflow * (metrics[j] / downstream);
        }
    }

    out
}
