//! Krypfolio Runner: backtest driver, configuration, data loading, sweeps.
//!
//! This crate builds on `krypfolio-core` to provide:
//! - TOML configuration with validation and strategy presets
//! - Snapshot provider seam plus CSV loaders (long format or per-symbol files)
//! - Daily date grid and rebalance cadence tagging
//! - Parallel allocation phase and sequential engine fold
//! - Stop-loss × cadence grid sweep
//! - JSON/CSV artifact export

pub mod config;
pub mod data_loader;
pub mod export;
pub mod provider;
pub mod runner;
pub mod schedule;
pub mod sweep;

pub use config::{
    BacktestConfig, BacktestSection, ConfigError, RankingSource, RunId, StrategyConfig,
    StrategyPreset,
};
pub use data_loader::{load_snapshot_dir, load_snapshots_csv, LoadError, LoadedSnapshots};
pub use export::{save_artifacts, write_equity_csv};
pub use provider::{InMemorySnapshots, SnapshotProvider};
pub use runner::{
    allocate_window, run_backtest, run_with_allocations, AllocationSet, BacktestResult, RunError,
    SkipReason, SkippedDate, Summary, SCHEMA_VERSION,
};
pub use sweep::{run_sweep, SweepGrid, SweepPoint};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
        assert_send::<StrategyPreset>();
        assert_sync::<StrategyPreset>();
    }

    #[test]
    fn in_memory_snapshots_is_send_sync() {
        assert_send::<InMemorySnapshots>();
        assert_sync::<InMemorySnapshots>();
    }

    #[test]
    fn allocation_set_is_send_sync() {
        assert_send::<AllocationSet>();
        assert_sync::<AllocationSet>();
    }

    #[test]
    fn backtest_result_is_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<RunError>();
        assert_sync::<RunError>();
        assert_send::<LoadError>();
        assert_sync::<LoadError>();
    }
}
