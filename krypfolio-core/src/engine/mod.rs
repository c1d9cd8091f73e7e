//! Rebalancing engine: folds dated allocations into an evolving portfolio.
//!
//! Each event is either a rebalance (inject staged capital, re-weight every
//! holding to the allocation) or a pass-through (mark to market only). Both
//! end with the trailing stop-loss check against the high-water mark.
//!
//! The fold is strictly sequential: every transition reads the state left by
//! the previous date.

pub mod injection;
pub mod rebalancer;
pub mod state;

pub use injection::{injection_stage, select_injection, InjectionStage};
pub use rebalancer::{EventKind, MarketEvent, Rebalancer, Transition, ValidationError};
pub use state::{BacktestState, EngineConfig, EquityPoint, RejectedEvent, RunResult};
