//! Domain types for Krypfolio

pub mod allocation;
pub mod metric;
pub mod portfolio;

pub use allocation::{Allocation, AllocationEntry};
pub use metric::AssetMetric;
pub use portfolio::{Holding, Portfolio};
