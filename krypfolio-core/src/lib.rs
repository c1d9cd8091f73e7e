//! Krypfolio Core: allocator, domain types, and the rebalancing engine.
//!
//! This crate contains the algorithmic heart of the backtester:
//! - Domain types (asset metrics, allocations, holdings, portfolios)
//! - Cap-constrained allocator (rank, weight, single-pass overflow sweep)
//! - Time-aware EWMA smoothing for ranking metrics
//! - Rebalancing state machine with staged injection and trailing stop-loss
//!
//! Nothing here performs I/O. Snapshots are supplied by the caller.

pub mod allocator;
pub mod domain;
pub mod engine;
pub mod smoothing;

pub use allocator::{allocate_with, Allocator, AllocatorConfig, DataError, Weighting};
pub use domain::{Allocation, AllocationEntry, AssetMetric, Holding, Portfolio};
pub use engine::{
    BacktestState, EngineConfig, EquityPoint, EventKind, InjectionStage, MarketEvent, Rebalancer,
    RunResult, Transition, ValidationError,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: allocation inputs and engine types cross thread boundaries.
    ///
    /// The driver allocates dates on a rayon pool and folds sweeps in parallel.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<AssetMetric>();
        require_sync::<AssetMetric>();
        require_send::<Allocation>();
        require_sync::<Allocation>();
        require_send::<Allocator>();
        require_sync::<Allocator>();
        require_send::<DataError>();
        require_sync::<DataError>();

        require_send::<MarketEvent>();
        require_sync::<MarketEvent>();
        require_send::<Rebalancer>();
        require_sync::<Rebalancer>();
        require_send::<BacktestState>();
        require_sync::<BacktestState>();
        require_send::<RunResult>();
        require_sync::<RunResult>();
    }
}
