//! Date grid and rebalance cadence.
//!
//! The driver evaluates every calendar day in the window. Rebalance days
//! fall on the weekly grid anchored at the start date, thinned to every
//! `weeks`-th week. Every other day only marks the book to market.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;

use krypfolio_core::domain::Allocation;
use krypfolio_core::engine::{EventKind, MarketEvent};

/// Every calendar day from `start` to `end` inclusive.
pub fn daily_grid(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Weekly dates from `start`, keeping indices `i % weeks == 0`.
pub fn rebalance_dates(start: NaiveDate, end: NaiveDate, weeks: u32) -> BTreeSet<NaiveDate> {
    let step = Duration::weeks(i64::from(weeks.max(1)));
    let mut dates = BTreeSet::new();
    let mut date = start;
    while date <= end {
        dates.insert(date);
        date += step;
    }
    dates
}

/// Tag each allocation exactly once as a rebalance or a pass-through.
pub fn tag_events(allocations: Vec<Allocation>, rebalance_on: &BTreeSet<NaiveDate>) -> Vec<MarketEvent> {
    allocations
        .into_iter()
        .map(|allocation| {
            let kind = if rebalance_on.contains(&allocation.timestamp) {
                EventKind::Rebalance
            } else {
                EventKind::PassThrough
            };
            kind.with(allocation)
        })
        .collect()
}
