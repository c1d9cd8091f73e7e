//! Grid search over stop-loss and rebalance cadence.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{BacktestConfig, RunId};
use crate::provider::SnapshotProvider;
use crate::runner::{allocate_window, run_with_allocations, AllocationSet, BacktestResult, RunError};

/// Stop-loss × cadence grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepGrid {
    pub stop_losses: Vec<f64>,
    pub rebalance_weeks: Vec<u32>,
}

impl Default for SweepGrid {
    /// Stop-loss 5%..=35% in 1% steps, cadence 1..=6 weeks.
    fn default() -> Self {
        Self {
            stop_losses: (5..=35u32).map(|pct| f64::from(pct) / 100.0).collect(),
            rebalance_weeks: (1..=6).collect(),
        }
    }
}

impl SweepGrid {
    /// Returns the total number of configurations in this grid.
    pub fn size(&self) -> usize {
        self.stop_losses.len() * self.rebalance_weeks.len()
    }

    /// Generates all configurations in the grid, validated.
    pub fn generate_configs(&self, base: &BacktestConfig) -> Result<Vec<BacktestConfig>, RunError> {
        let mut configs = Vec::with_capacity(self.size());
        for &stop_loss in &self.stop_losses {
            for &weeks in &self.rebalance_weeks {
                let mut config = base.clone();
                config.backtest.stop_loss = stop_loss;
                config.backtest.rebalance_weeks = weeks;
                config.validate()?;
                configs.push(config);
            }
        }
        Ok(configs)
    }
}

/// One grid cell's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub run_id: RunId,
    pub stop_loss: f64,
    pub rebalance_weeks: u32,
    pub end_balance: f64,
    pub portfolio_multiple: f64,
    pub rebalance_count: usize,
    pub stop_loss_count: usize,
}

impl From<&BacktestResult> for SweepPoint {
    fn from(result: &BacktestResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            stop_loss: result.config.backtest.stop_loss,
            rebalance_weeks: result.config.backtest.rebalance_weeks,
            end_balance: result.summary.end_balance,
            portfolio_multiple: result.summary.portfolio_multiple,
            rebalance_count: result.rebalance_count,
            stop_loss_count: result.stop_loss_count,
        }
    }
}

/// Run every grid cell, best end balance first.
///
/// Allocations are computed once for the shared window and strategy; each
/// cell only re-tags and re-folds them.
pub fn run_sweep(
    base: &BacktestConfig,
    provider: &dyn SnapshotProvider,
    grid: &SweepGrid,
) -> Result<Vec<SweepPoint>, RunError> {
    base.validate()?;
    let configs = grid.generate_configs(base)?;
    info!(cells = configs.len(), "starting sweep");

    let set = allocate_window(base, provider);
    sweep_allocations(&configs, &set)
}

/// Fold each config over a shared allocation set in parallel.
pub fn sweep_allocations(
    configs: &[BacktestConfig],
    set: &AllocationSet,
) -> Result<Vec<SweepPoint>, RunError> {
    let mut points = configs
        .par_iter()
        .map(|config| run_with_allocations(config, set).map(|r| SweepPoint::from(&r)))
        .collect::<Result<Vec<_>, _>>()?;

    points.sort_by(|a, b| b.end_balance.total_cmp(&a.end_balance));
    Ok(points)
}
