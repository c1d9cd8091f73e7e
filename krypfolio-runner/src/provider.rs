//! Snapshot provider seam.
//!
//! The driver asks a provider for one date's asset metrics at a time. The
//! provider decides where they come from; the allocator never sees I/O.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use krypfolio_core::domain::AssetMetric;

/// Source of per-date asset metrics.
///
/// Shared across the rayon pool during the allocation phase.
pub trait SnapshotProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// All metrics for `date`. Empty when the provider has nothing for that day.
    fn snapshot_at(&self, date: NaiveDate) -> Vec<AssetMetric>;

    /// Every date with at least one record, ascending.
    fn dates(&self) -> Vec<NaiveDate>;
}

/// Snapshots held in memory, keyed by date.
///
/// Records within a date are kept ordered by symbol so that the allocator's
/// stable sort breaks metric ties the same way on every run.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshots {
    snapshots: BTreeMap<NaiveDate, Vec<AssetMetric>>,
}

impl InMemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one record, keeping the date's records ordered by symbol.
    pub fn insert(&mut self, date: NaiveDate, metric: AssetMetric) {
        let records = self.snapshots.entry(date).or_default();
        let at = records.partition_point(|m| m.symbol < metric.symbol);
        records.insert(at, metric);
    }

    pub fn len(&self) -> usize {
        self.snapshots.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.snapshots.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.snapshots.keys().next_back().copied()
    }
}

impl FromIterator<(NaiveDate, AssetMetric)> for InMemorySnapshots {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, AssetMetric)>>(iter: T) -> Self {
        let mut snapshots = Self::new();
        for (date, metric) in iter {
            snapshots.insert(date, metric);
        }
        snapshots
    }
}

impl SnapshotProvider for InMemorySnapshots {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn snapshot_at(&self, date: NaiveDate) -> Vec<AssetMetric> {
        self.snapshots.get(&date).cloned().unwrap_or_default()
    }

    fn dates(&self) -> Vec<NaiveDate> {
        self.snapshots.keys().copied().collect()
    }
}
