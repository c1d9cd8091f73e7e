//! Engine configuration, mutable state, and run result types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::rebalancer::{Transition, ValidationError};
use crate::domain::Portfolio;

/// Configuration for a single backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_capital: f64,
    /// Drawdown fraction from the high-water mark that triggers liquidation.
    pub stop_loss: f64,
    /// Allowed deviation of an allocation's ratio sum from 1.
    pub ratio_tolerance: f64,
}

impl EngineConfig {
    pub const DEFAULT_RATIO_TOLERANCE: f64 = 1e-3;

    pub fn new(initial_capital: f64, stop_loss: f64) -> Self {
        Self {
            initial_capital,
            stop_loss,
            ratio_tolerance: Self::DEFAULT_RATIO_TOLERANCE,
        }
    }
}

/// Total value (holdings + uninvested capital) on one date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Mutable state that evolves date-by-date during the fold.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestState {
    pub portfolio: Portfolio,
    /// Notional price recorded at each applied rebalance.
    pub price_history: Vec<f64>,
    /// Highest balance since the last stop-loss reset. `None` means no
    /// observation yet (negative infinity).
    pub high_water_mark: Option<f64>,
    /// Uninvested capital.
    pub investment: f64,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            portfolio: Portfolio::new(),
            price_history: Vec::new(),
            high_water_mark: None,
            investment: initial_capital,
            equity_curve: Vec::new(),
        }
    }

    /// Marked value of the holdings.
    pub fn balance(&self) -> f64 {
        self.portfolio.balance()
    }

    /// Holdings plus uninvested capital.
    pub fn total_value(&self) -> f64 {
        self.balance() + self.investment
    }

    /// Drawdown of `balance` from the high-water mark, as a fraction.
    ///
    /// `None` before the first observation or while the mark is zero.
    pub fn drawdown(&self, balance: f64) -> Option<f64> {
        self.high_water_mark
            .filter(|&hwm| hwm > 0.0)
            .map(|hwm| (hwm - balance) / hwm)
    }
}

/// An event the engine refused to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEvent {
    pub date: NaiveDate,
    pub error: ValidationError,
}

/// Result of folding a full event sequence.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub state: BacktestState,
    /// One entry per applied event, in order.
    pub transitions: Vec<Transition>,
    /// Events skipped by validation; state was carried forward unchanged.
    pub rejected: Vec<RejectedEvent>,
}

impl RunResult {
    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.state.equity_curve
    }

    /// Holdings plus uninvested capital after the last applied event.
    pub fn end_balance(&self) -> f64 {
        self.state.total_value()
    }

    pub fn rebalance_count(&self) -> usize {
        self.transitions.iter().filter(|t| t.is_rebalance()).count()
    }

    pub fn stop_loss_count(&self) -> usize {
        self.transitions.iter().filter(|t| t.stop_loss).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Holding;

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::new(1_000.0, 0.2);
        assert_eq!(config.initial_capital, 1_000.0);
        assert_eq!(config.stop_loss, 0.2);
        assert_eq!(config.ratio_tolerance, 1e-3);
    }

    #[test]
    fn initial_state_is_all_cash() {
        let state = BacktestState::new(1_000.0);
        assert_eq!(state.investment, 1_000.0);
        assert_eq!(state.balance(), 0.0);
        assert_eq!(state.total_value(), 1_000.0);
        assert!(state.high_water_mark.is_none());
        assert!(state.price_history.is_empty());
        assert!(state.equity_curve.is_empty());
    }

    #[test]
    fn drawdown_from_high_water_mark() {
        let mut state = BacktestState::new(0.0);
        assert_eq!(state.drawdown(50.0), None);

        state.high_water_mark = Some(1_000.0);
        state.portfolio.holdings.push(Holding::new("bitcoin", 790.0, 1.0));
        let dd = state.drawdown(state.balance()).unwrap();
        assert!((dd - 0.21).abs() < 1e-12);
    }
}
