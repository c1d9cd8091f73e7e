//! Rebalancer: the per-date state transition and the sequential fold.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::injection::{select_injection, InjectionStage};
use super::state::{BacktestState, EngineConfig, EquityPoint, RejectedEvent, RunResult};
use crate::domain::{Allocation, Portfolio};

/// Why a rebalance allocation was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{timestamp}: ratios sum to {sum:.6}, outside 1 ± {tolerance}")]
    RatioSum {
        timestamp: NaiveDate,
        sum: f64,
        tolerance: f64,
    },

    #[error("{timestamp}: price for '{symbol}' is not a positive number")]
    NonPositivePrice { timestamp: NaiveDate, symbol: String },

    #[error("{timestamp}: symbol '{symbol}' appears more than once")]
    DuplicateSymbol { timestamp: NaiveDate, symbol: String },
}

/// Whether a date re-weights the portfolio or only marks it to market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Rebalance,
    PassThrough,
}

impl EventKind {
    pub fn with(self, allocation: Allocation) -> MarketEvent {
        match self {
            Self::Rebalance => MarketEvent::Rebalance(allocation),
            Self::PassThrough => MarketEvent::PassThrough(allocation),
        }
    }
}

/// One dated input to the fold, tagged once by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// Re-weight to this allocation's ratios.
    Rebalance(Allocation),
    /// Use this allocation's prices only.
    PassThrough(Allocation),
}

impl MarketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Rebalance(_) => EventKind::Rebalance,
            Self::PassThrough(_) => EventKind::PassThrough,
        }
    }

    pub fn allocation(&self) -> &Allocation {
        match self {
            Self::Rebalance(a) | Self::PassThrough(a) => a,
        }
    }

    pub fn timestamp(&self) -> NaiveDate {
        self.allocation().timestamp
    }
}

/// What one applied event did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub date: NaiveDate,
    pub kind: EventKind,
    pub injection: Option<InjectionStage>,
    /// Capital moved from uninvested into holdings.
    pub fund: f64,
    /// Holdings value used for the stop-loss check.
    pub balance: f64,
    /// Uninvested capital after the event.
    pub investment: f64,
    pub stop_loss: bool,
}

impl Transition {
    pub fn is_rebalance(&self) -> bool {
        self.kind == EventKind::Rebalance
    }
}

/// Drives `BacktestState` through tagged market events.
#[derive(Debug, Clone)]
pub struct Rebalancer {
    config: EngineConfig,
}

impl Rebalancer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn initial_state(&self) -> BacktestState {
        BacktestState::new(self.config.initial_capital)
    }

    /// Check a rebalance allocation before any state is touched.
    pub fn validate(&self, allocation: &Allocation) -> Result<(), ValidationError> {
        let timestamp = allocation.timestamp;
        let sum = allocation.ratio_sum();
        // NaN sums fail this comparison too
        if !((sum - 1.0).abs() <= self.config.ratio_tolerance) {
            return Err(ValidationError::RatioSum {
                timestamp,
                sum,
                tolerance: self.config.ratio_tolerance,
            });
        }

        let mut seen = HashSet::new();
        for entry in &allocation.entries {
            if !(entry.price.is_finite() && entry.price > 0.0) {
                return Err(ValidationError::NonPositivePrice {
                    timestamp,
                    symbol: entry.symbol.clone(),
                });
            }
            if !seen.insert(entry.symbol.as_str()) {
                return Err(ValidationError::DuplicateSymbol {
                    timestamp,
                    symbol: entry.symbol.clone(),
                });
            }
        }
        Ok(())
    }

    /// Apply one event in place.
    ///
    /// On `Err` the state is untouched: validation runs before any mutation.
    pub fn apply(
        &self,
        state: &mut BacktestState,
        event: &MarketEvent,
    ) -> Result<Transition, ValidationError> {
        match event {
            MarketEvent::Rebalance(allocation) => {
                self.validate(allocation)?;
                Ok(self.rebalance(state, allocation))
            }
            MarketEvent::PassThrough(allocation) => Ok(self.pass_through(state, allocation)),
        }
    }

    /// Pure transition: returns the next state, leaving `state` as it was.
    pub fn step(
        &self,
        state: &BacktestState,
        event: &MarketEvent,
    ) -> Result<(BacktestState, Transition), ValidationError> {
        let mut next = state.clone();
        let transition = self.apply(&mut next, event)?;
        Ok((next, transition))
    }

    /// Fold a date-ordered event sequence from the initial state.
    ///
    /// Rejected events are logged and recorded; the fold carries on with the
    /// previous state.
    pub fn run<'a, I>(&self, events: I) -> RunResult
    where
        I: IntoIterator<Item = &'a MarketEvent>,
    {
        let mut state = self.initial_state();
        let mut transitions = Vec::new();
        let mut rejected = Vec::new();

        for event in events {
            match self.apply(&mut state, event) {
                Ok(transition) => transitions.push(transition),
                Err(error) => {
                    warn!(date = %event.timestamp(), %error, "allocation rejected, state carried forward");
                    rejected.push(RejectedEvent {
                        date: event.timestamp(),
                        error,
                    });
                }
            }
        }

        RunResult {
            state,
            transitions,
            rejected,
        }
    }

    fn rebalance(&self, state: &mut BacktestState, allocation: &Allocation) -> Transition {
        state.portfolio.update_prices(allocation);
        let mut balance = state.portfolio.balance();
        let notional = allocation.notional_price();

        let injection = select_injection(&state.price_history, notional, balance, state.investment);
        let fund = injection.map_or(0.0, |stage| stage.fraction() * state.investment);
        balance += fund;
        state.investment -= fund;
        debug!(
            date = %allocation.timestamp,
            stage = injection.map_or("none", InjectionStage::name),
            fund,
            leftover = state.investment,
            "investment injection"
        );

        state.portfolio = Portfolio::reweighted(allocation, balance);
        state.price_history.push(notional);
        state.equity_curve.push(EquityPoint {
            date: allocation.timestamp,
            value: balance + state.investment,
        });

        let stop_loss = self.trail(state, allocation.timestamp, balance);
        Transition {
            date: allocation.timestamp,
            kind: EventKind::Rebalance,
            injection,
            fund,
            balance,
            investment: state.investment,
            stop_loss,
        }
    }

    fn pass_through(&self, state: &mut BacktestState, allocation: &Allocation) -> Transition {
        state.portfolio.update_prices(allocation);
        let balance = state.portfolio.balance();
        state.equity_curve.push(EquityPoint {
            date: allocation.timestamp,
            value: balance + state.investment,
        });

        let stop_loss = self.trail(state, allocation.timestamp, balance);
        Transition {
            date: allocation.timestamp,
            kind: EventKind::PassThrough,
            injection: None,
            fund: 0.0,
            balance,
            investment: state.investment,
            stop_loss,
        }
    }

    /// Raise the high-water mark, then liquidate if the drawdown exceeds the stop-loss.
    fn trail(&self, state: &mut BacktestState, date: NaiveDate, balance: f64) -> bool {
        let hwm = state
            .high_water_mark
            .map_or(balance, |prev| prev.max(balance));
        state.high_water_mark = Some(hwm);

        let triggered = balance != 0.0
            && state
                .drawdown(balance)
                .is_some_and(|dd| dd > self.config.stop_loss);
        if triggered {
            info!(%date, balance, high_water_mark = hwm, "stop loss, liquidating");
            state.portfolio.liquidate();
            state.investment += balance;
            state.high_water_mark = None;
        }
        triggered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AllocationEntry, Holding};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, day).unwrap()
    }

    fn allocation(day: u32, entries: &[(&str, f64, f64)]) -> Allocation {
        Allocation::new(
            date(day),
            entries
                .iter()
                .map(|&(symbol, price, ratio)| AllocationEntry {
                    symbol: symbol.into(),
                    ranking_metric: 1.0,
                    price,
                    ratio,
                })
                .collect(),
        )
    }

    fn rebalancer() -> Rebalancer {
        Rebalancer::new(EngineConfig::new(1_000.0, 0.2))
    }

    #[test]
    fn first_rebalance_injects_twenty_percent() {
        let engine = rebalancer();
        let mut state = engine.initial_state();
        let event = MarketEvent::Rebalance(allocation(1, &[("btc", 100.0, 0.5), ("eth", 10.0, 0.5)]));

        let t = engine.apply(&mut state, &event).unwrap();

        assert_eq!(t.injection, Some(InjectionStage::First));
        assert!((t.fund - 200.0).abs() < 1e-9);
        assert!((state.investment - 800.0).abs() < 1e-9);
        assert!((state.portfolio.get("btc").unwrap().amount - 1.0).abs() < 1e-12);
        assert!((state.portfolio.get("eth").unwrap().amount - 10.0).abs() < 1e-12);
        assert_eq!(state.price_history, vec![55.0]);
        assert_eq!(state.high_water_mark, Some(200.0));
        assert_eq!(state.equity_curve.len(), 1);
        assert!((state.equity_curve[0].value - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn bad_ratio_sum_is_rejected_without_touching_state() {
        let engine = rebalancer();
        let mut state = engine.initial_state();
        let before = state.clone();
        let event = MarketEvent::Rebalance(allocation(1, &[("btc", 100.0, 0.5), ("eth", 10.0, 0.4)]));

        let err = engine.apply(&mut state, &event).unwrap_err();

        assert!(matches!(err, ValidationError::RatioSum { .. }));
        assert_eq!(state, before);
    }

    #[test]
    fn ratio_sum_within_tolerance_is_accepted() {
        let engine = rebalancer();
        let alloc = allocation(1, &[("btc", 100.0, 0.5), ("eth", 10.0, 0.5005)]);
        assert!(engine.validate(&alloc).is_ok());
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let engine = rebalancer();
        let alloc = allocation(1, &[("btc", 0.0, 1.0)]);
        assert!(matches!(
            engine.validate(&alloc),
            Err(ValidationError::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn duplicate_symbol_is_rejected() {
        let engine = rebalancer();
        let alloc = allocation(1, &[("btc", 10.0, 0.5), ("btc", 10.0, 0.5)]);
        assert!(matches!(
            engine.validate(&alloc),
            Err(ValidationError::DuplicateSymbol { .. })
        ));
    }

    #[test]
    fn pass_through_only_marks_to_market() {
        let engine = rebalancer();
        let mut state = engine.initial_state();
        engine
            .apply(&mut state, &MarketEvent::Rebalance(allocation(1, &[("btc", 100.0, 1.0)])))
            .unwrap();

        let t = engine
            .apply(&mut state, &MarketEvent::PassThrough(allocation(2, &[("btc", 110.0, 0.0)])))
            .unwrap();

        assert_eq!(t.kind, EventKind::PassThrough);
        assert_eq!(t.injection, None);
        assert!((t.balance - 220.0).abs() < 1e-9);
        assert_eq!(state.price_history.len(), 1);
        assert!((state.portfolio.get("btc").unwrap().amount - 2.0).abs() < 1e-12);
        assert!((state.equity_curve[1].value - 1_020.0).abs() < 1e-9);
        assert_eq!(state.high_water_mark, Some(t.balance));
    }

    #[test]
    fn stop_loss_liquidates_and_resets_high_water_mark() {
        let engine = rebalancer();
        let mut state = BacktestState::new(0.0);
        state.portfolio.holdings.push(Holding::new("btc", 1_000.0, 1.0));
        state.high_water_mark = Some(1_000.0);

        let t = engine
            .apply(&mut state, &MarketEvent::PassThrough(allocation(2, &[("btc", 790.0, 0.0)])))
            .unwrap();

        assert!(t.stop_loss);
        assert_eq!(state.portfolio.get("btc").unwrap().amount, 0.0);
        assert!((state.investment - 790.0).abs() < 1e-9);
        assert_eq!(state.high_water_mark, None);
    }

    #[test]
    fn drawdown_at_threshold_does_not_trigger() {
        let engine = rebalancer();
        let mut state = BacktestState::new(0.0);
        state.portfolio.holdings.push(Holding::new("btc", 1_000.0, 1.0));
        state.high_water_mark = Some(1_000.0);

        let t = engine
            .apply(&mut state, &MarketEvent::PassThrough(allocation(2, &[("btc", 850.0, 0.0)])))
            .unwrap();

        assert!(!t.stop_loss);
        assert_eq!(state.high_water_mark, Some(1_000.0));
    }

    #[test]
    fn rebalance_after_liquidation_reseeds_twenty_percent() {
        let engine = rebalancer();
        let mut state = BacktestState::new(1_000.0);
        state.portfolio.holdings.push(Holding::new("btc", 100.0, 0.0));
        state.price_history = vec![50.0, 60.0];

        let t = engine
            .apply(&mut state, &MarketEvent::Rebalance(allocation(3, &[("btc", 100.0, 1.0)])))
            .unwrap();

        assert_eq!(t.injection, Some(InjectionStage::First));
        assert!((t.fund - 200.0).abs() < 1e-9);
    }

    #[test]
    fn rebalance_drops_holdings_missing_from_allocation() {
        let engine = rebalancer();
        let mut state = BacktestState::new(0.0);
        state.portfolio.holdings.push(Holding::new("ltc", 50.0, 2.0));

        engine
            .apply(&mut state, &MarketEvent::Rebalance(allocation(3, &[("btc", 100.0, 1.0)])))
            .unwrap();

        assert!(state.portfolio.get("ltc").is_none());
        assert!((state.portfolio.get("btc").unwrap().amount - 1.0).abs() < 1e-12);
    }

    #[test]
    fn step_is_pure_and_deterministic() {
        let engine = rebalancer();
        let state = engine.initial_state();
        let event = MarketEvent::Rebalance(allocation(1, &[("btc", 100.0, 0.6), ("eth", 10.0, 0.4)]));

        let (a, ta) = engine.step(&state, &event).unwrap();
        let (b, tb) = engine.step(&state, &event).unwrap();

        assert_eq!(a, b);
        assert_eq!(ta, tb);
        assert_eq!(state, engine.initial_state());
    }

    #[test]
    fn run_skips_rejected_events_and_continues() {
        let engine = rebalancer();
        let events = vec![
            MarketEvent::Rebalance(allocation(1, &[("btc", 100.0, 1.0)])),
            MarketEvent::Rebalance(allocation(2, &[("btc", 100.0, 0.5)])),
            MarketEvent::PassThrough(allocation(3, &[("btc", 105.0, 0.0)])),
        ];

        let result = engine.run(&events);

        assert_eq!(result.transitions.len(), 2);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].date, date(2));
        assert_eq!(result.equity_curve().len(), 2);
        assert_eq!(result.rebalance_count(), 1);
    }

    #[test]
    fn transition_serializes_with_snake_case_kind() {
        let engine = rebalancer();
        let mut state = engine.initial_state();
        let t = engine
            .apply(&mut state, &MarketEvent::PassThrough(allocation(4, &[("btc", 1.0, 0.0)])))
            .unwrap();

        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["kind"], "pass_through");
        assert_eq!(json["date"], "2021-01-04");
        assert!(json["injection"].is_null());
    }
}
