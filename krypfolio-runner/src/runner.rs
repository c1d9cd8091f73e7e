//! Backtest driver: wires together the snapshot provider, allocator and engine.
//!
//! Two phases:
//! - Allocation: every day of the window is allocated independently on the
//!   rayon pool. Failures and unusable allocations become skipped dates.
//! - Fold: the surviving allocations are tagged by cadence and folded through
//!   the `Rebalancer` in date order.
//!
//! `allocate_window()` is exposed separately because allocations depend only on
//! the strategy, not on stop-loss or cadence; the sweep reuses them.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use krypfolio_core::allocator::Allocator;
use krypfolio_core::domain::Allocation;
use krypfolio_core::engine::{EquityPoint, MarketEvent, Rebalancer, Transition};

use crate::config::{BacktestConfig, ConfigError, RunId};
use crate::data_loader::LoadError;
use crate::provider::SnapshotProvider;
use crate::schedule::{daily_grid, rebalance_dates, tag_events};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("no usable allocation between {start} and {end}")]
    NoAllocations { start: NaiveDate, end: NaiveDate },
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Why a date contributed nothing to the fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The snapshot had no asset with a positive metric and price.
    NoRankableAssets,
    /// The allocation did not include the anchor asset.
    MissingAnchor { anchor: String },
    /// The allocator refused the snapshot.
    DataError { message: String },
    /// The engine refused the allocation.
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedDate {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Allocations for a date window, ready to be tagged and folded.
#[derive(Debug, Clone, Default)]
pub struct AllocationSet {
    /// Ascending by timestamp.
    pub allocations: Vec<Allocation>,
    pub skipped: Vec<SkippedDate>,
}

/// Headline numbers of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// First applied rebalance (first event if none was applied).
    pub start_date: NaiveDate,
    /// Last applied event.
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    /// Holdings plus uninvested capital after the last applied event.
    pub end_balance: f64,
    pub portfolio_multiple: f64,
    /// Anchor price at `end_date` over its price at `start_date`.
    pub benchmark_multiple: Option<f64>,
}

/// Complete result of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub config: BacktestConfig,
    pub summary: Summary,
    pub equity_curve: Vec<EquityPoint>,
    pub transitions: Vec<Transition>,
    pub skipped: Vec<SkippedDate>,
    pub rebalance_count: usize,
    pub stop_loss_count: usize,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Run a full backtest: allocate every day of the window, then fold.
pub fn run_backtest(
    config: &BacktestConfig,
    provider: &dyn SnapshotProvider,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    info!(
        provider = provider.name(),
        start = %config.backtest.start_date,
        end = %config.backtest.end_date,
        top_n = config.strategy.top_n,
        cap = config.strategy.cap,
        weighting = config.strategy.weighting.name(),
        "starting backtest"
    );

    let set = allocate_window(config, provider);
    run_with_allocations(config, &set)
}

/// Allocation phase only. Depends on the date window and the strategy section.
pub fn allocate_window(config: &BacktestConfig, provider: &dyn SnapshotProvider) -> AllocationSet {
    let allocator = Allocator::new(config.allocator_config());
    let anchor = config.strategy.anchor_symbol.as_deref();
    let dates = daily_grid(config.backtest.start_date, config.backtest.end_date);

    let outcomes: Vec<Result<Allocation, SkippedDate>> = dates
        .par_iter()
        .map(|&date| allocate_date(&allocator, provider, date, anchor))
        .collect();

    let mut set = AllocationSet::default();
    for outcome in outcomes {
        match outcome {
            Ok(allocation) => set.allocations.push(allocation),
            Err(skip) => set.skipped.push(skip),
        }
    }
    set.allocations.sort_by_key(|a| a.timestamp);

    debug!(
        allocated = set.allocations.len(),
        skipped = set.skipped.len(),
        "allocation phase complete"
    );
    set
}

fn allocate_date(
    allocator: &Allocator,
    provider: &dyn SnapshotProvider,
    date: NaiveDate,
    anchor: Option<&str>,
) -> Result<Allocation, SkippedDate> {
    let snapshot = provider.snapshot_at(date);
    let allocation = allocator.allocate(date, &snapshot).map_err(|e| {
        warn!(%date, error = %e, "allocation failed, date skipped");
        SkippedDate {
            date,
            reason: SkipReason::DataError {
                message: e.to_string(),
            },
        }
    })?;

    if allocation.is_empty() {
        debug!(%date, "no rankable assets");
        return Err(SkippedDate {
            date,
            reason: SkipReason::NoRankableAssets,
        });
    }
    if let Some(anchor) = anchor {
        if !allocation.contains(anchor) {
            warn!(%date, anchor, "anchor asset missing from allocation, date skipped");
            return Err(SkippedDate {
                date,
                reason: SkipReason::MissingAnchor {
                    anchor: anchor.to_string(),
                },
            });
        }
    }
    Ok(allocation)
}

/// Fold phase over precomputed allocations, no provider access.
///
/// Used by the sweep to fold many (stop-loss, cadence) pairs over one
/// allocation set.
pub fn run_with_allocations(
    config: &BacktestConfig,
    set: &AllocationSet,
) -> Result<BacktestResult, RunError> {
    let (start, end) = (config.backtest.start_date, config.backtest.end_date);
    if set.allocations.is_empty() {
        return Err(RunError::NoAllocations { start, end });
    }

    let rebalance_on = rebalance_dates(start, end, config.backtest.rebalance_weeks);
    let events = tag_events(set.allocations.clone(), &rebalance_on);
    let engine = Rebalancer::new(config.engine_config());
    let result = engine.run(&events);

    let mut skipped = set.skipped.clone();
    skipped.extend(result.rejected.iter().map(|r| SkippedDate {
        date: r.date,
        reason: SkipReason::Rejected {
            message: r.error.to_string(),
        },
    }));
    skipped.sort_by_key(|s| s.date);

    let summary = summarize(config, &events, &result.transitions, result.end_balance())
        .ok_or(RunError::NoAllocations { start, end })?;

    info!(
        end_balance = summary.end_balance,
        multiple = summary.portfolio_multiple,
        rebalances = result.rebalance_count(),
        stop_losses = result.stop_loss_count(),
        skipped = skipped.len(),
        "backtest complete"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id: config.run_id()?,
        config: config.clone(),
        summary,
        rebalance_count: result.rebalance_count(),
        stop_loss_count: result.stop_loss_count(),
        equity_curve: result.state.equity_curve,
        transitions: result.transitions,
        skipped,
    })
}

/// `None` when no event was applied.
fn summarize(
    config: &BacktestConfig,
    events: &[MarketEvent],
    transitions: &[Transition],
    end_balance: f64,
) -> Option<Summary> {
    let first = transitions.first()?;
    let last = transitions.last()?;
    let start_date = transitions
        .iter()
        .find(|t| t.is_rebalance())
        .map_or(first.date, |t| t.date);
    let end_date = last.date;

    let anchor_price = |date: NaiveDate| -> Option<f64> {
        let anchor = config.strategy.anchor_symbol.as_deref()?;
        events
            .iter()
            .find(|e| e.timestamp() == date)
            .and_then(|e| e.allocation().price_of(anchor))
    };
    let benchmark_multiple = match (anchor_price(start_date), anchor_price(end_date)) {
        (Some(start), Some(end)) => Some(end / start),
        _ => None,
    };

    let initial_capital = config.backtest.initial_capital;
    Some(Summary {
        start_date,
        end_date,
        initial_capital,
        end_balance,
        portfolio_multiple: end_balance / initial_capital,
        benchmark_multiple,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BacktestSection, RankingSource, StrategyConfig};
    use crate::provider::InMemorySnapshots;
    use krypfolio_core::allocator::Weighting;
    use krypfolio_core::domain::AssetMetric;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, day).unwrap()
    }

    fn config(start: u32, end: u32) -> BacktestConfig {
        BacktestConfig {
            backtest: BacktestSection {
                start_date: d(start),
                end_date: d(end),
                initial_capital: 1_000.0,
                stop_loss: 0.2,
                rebalance_weeks: 1,
            },
            strategy: StrategyConfig {
                top_n: 2,
                cap: 1.0,
                weighting: Weighting::Linear,
                anchor_symbol: Some("bitcoin".into()),
                ranking: RankingSource::MarketCap,
            },
        }
    }

    fn provider(days: &[(u32, f64, f64)]) -> InMemorySnapshots {
        days.iter()
            .flat_map(|&(day, btc, eth)| {
                vec![
                    (d(day), AssetMetric::new("bitcoin", 3.0, btc)),
                    (d(day), AssetMetric::new("ethereum", 1.0, eth)),
                ]
            })
            .collect()
    }

    #[test]
    fn missing_days_are_skipped_not_fatal() {
        let provider = provider(&[(1, 100.0, 10.0), (3, 110.0, 11.0)]);
        let result = run_backtest(&config(1, 3), &provider).unwrap();

        assert_eq!(result.equity_curve.len(), 2);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].date, d(2));
        assert_eq!(result.skipped[0].reason, SkipReason::NoRankableAssets);
    }

    #[test]
    fn anchor_is_required() {
        let mut snapshots = provider(&[(1, 100.0, 10.0)]);
        snapshots.insert(d(2), AssetMetric::new("ethereum", 1.0, 10.0));
        let result = run_backtest(&config(1, 2), &snapshots).unwrap();

        assert_eq!(result.transitions.len(), 1);
        assert!(matches!(
            result.skipped[0].reason,
            SkipReason::MissingAnchor { .. }
        ));
    }

    #[test]
    fn nothing_allocatable_is_an_error() {
        let err = run_backtest(&config(1, 5), &InMemorySnapshots::new()).unwrap_err();
        assert!(matches!(err, RunError::NoAllocations { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_before_any_work() {
        let mut cfg = config(1, 2);
        cfg.strategy.cap = 0.2;
        let err = run_backtest(&cfg, &provider(&[(1, 100.0, 10.0)])).unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::UnsaturatableCap { .. })));
    }

    #[test]
    fn summary_tracks_benchmark_and_multiple() {
        let provider = provider(&[(1, 100.0, 10.0), (2, 150.0, 10.0)]);
        let result = run_backtest(&config(1, 2), &provider).unwrap();
        let s = &result.summary;

        assert_eq!(s.start_date, d(1));
        assert_eq!(s.end_date, d(2));
        assert_eq!(s.benchmark_multiple, Some(1.5));
        // 20% injected at 0.75 btc / 0.25 eth; btc +50% → +0.2 * 0.75 * 0.5 = +7.5%
        assert!((s.portfolio_multiple - 1.075).abs() < 1e-9);
        assert_eq!(result.rebalance_count, 1);
        assert_eq!(result.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn result_round_trips_through_json() {
        let provider = provider(&[(1, 100.0, 10.0), (2, 90.0, 10.0)]);
        let result = run_backtest(&config(1, 2), &provider).unwrap();

        let json = serde_json::to_string(&result).unwrap();
        let back: BacktestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, result.run_id);
        assert_eq!(back.equity_curve, result.equity_curve);
        assert_eq!(back.summary.start_date, result.summary.start_date);
        assert_eq!(back.skipped, result.skipped);
    }
}
