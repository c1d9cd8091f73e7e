//! Snapshot loading from cleaned market data.
//!
//! Two layouts are accepted:
//! 1. A single long-format CSV with `date,symbol,close,market_cap` columns.
//! 2. A directory of per-symbol CSV files (`<symbol>.csv`) with
//!    `timestamp,close,market_cap` columns; other columns are ignored.
//!
//! Rows whose market cap is missing or non-positive are dropped before the
//! ranking source is applied, so an EWMA never smooths over them. Remaining
//! rows become `AssetMetric`s in an `InMemorySnapshots`.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use krypfolio_core::domain::AssetMetric;
use krypfolio_core::smoothing::ewma_by_halflife;

use crate::config::RankingSource;
use crate::provider::InMemorySnapshots;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("{path}: unparseable date '{value}'")]
    BadDate { path: String, value: String },

    #[error("{path}: duplicate row for '{symbol}' on {date}")]
    DuplicateRow {
        path: String,
        symbol: String,
        date: NaiveDate,
    },

    #[error("no usable rows in {path}")]
    Empty { path: String },

    #[error("EWMA halflife must be positive, got {0} days")]
    InvalidHalflife(f64),
}

/// Snapshots plus provenance.
#[derive(Debug, Clone)]
pub struct LoadedSnapshots {
    pub snapshots: InMemorySnapshots,
    /// BLAKE3 over every kept row in symbol/date order.
    pub dataset_hash: String,
    pub symbol_count: usize,
    /// Rows discarded for a missing or non-positive market cap.
    pub dropped_rows: usize,
    /// Exact repeats of an already kept `(date, symbol)` row.
    pub duplicate_rows: usize,
}

#[derive(Debug, Deserialize)]
struct LongRow {
    date: String,
    symbol: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    close: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SymbolRow {
    timestamp: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    close: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    market_cap: Option<f64>,
}

/// One symbol's observation on one date.
#[derive(Debug, Clone, Copy)]
struct Observation {
    date: NaiveDate,
    close: f64,
    market_cap: f64,
}

impl Observation {
    fn same_values(&self, other: &Self) -> bool {
        self.close.to_bits() == other.close.to_bits()
            && self.market_cap.to_bits() == other.market_cap.to_bits()
    }
}

type SeriesBySymbol = BTreeMap<String, Vec<Observation>>;

/// Load a long-format CSV (`date,symbol,close,market_cap`).
pub fn load_snapshots_csv(path: &Path, ranking: RankingSource) -> Result<LoadedSnapshots, LoadError> {
    check_ranking(ranking)?;
    let display = path.display().to_string();
    let mut reader = csv::Reader::from_path(path).map_err(|source| csv_error(&display, source))?;

    let mut series = SeriesBySymbol::new();
    let mut dropped = 0;
    for row in reader.deserialize::<LongRow>() {
        let row = row.map_err(|source| csv_error(&display, source))?;
        let date = parse_date(&display, &row.date)?;
        match observation(date, row.close, row.market_cap) {
            Some(obs) => series.entry(row.symbol).or_default().push(obs),
            None => dropped += 1,
        }
    }

    build(&display, series, dropped, ranking)
}

/// Load a directory of per-symbol CSV files named `<symbol>.csv`.
pub fn load_snapshot_dir(dir: &Path, ranking: RankingSource) -> Result<LoadedSnapshots, LoadError> {
    check_ranking(ranking)?;
    let display = dir.display().to_string();
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: display.clone(),
        source,
    })?;

    let mut series = SeriesBySymbol::new();
    let mut dropped = 0;
    for entry in entries {
        let entry = entry.map_err(|source| LoadError::Io {
            path: display.clone(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(symbol) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let file = path.display().to_string();
        let mut reader = csv::Reader::from_path(&path).map_err(|source| csv_error(&file, source))?;
        let mut observations = Vec::new();
        for row in reader.deserialize::<SymbolRow>() {
            let row = row.map_err(|source| csv_error(&file, source))?;
            let date = parse_date(&file, &row.timestamp)?;
            match observation(date, row.close, row.market_cap) {
                Some(obs) => observations.push(obs),
                None => dropped += 1,
            }
        }
        debug!(symbol = %symbol, rows = observations.len(), "loaded symbol file");
        series.insert(symbol, observations);
    }

    build(&display, series, dropped, ranking)
}

fn build(
    path: &str,
    mut series: SeriesBySymbol,
    dropped_rows: usize,
    ranking: RankingSource,
) -> Result<LoadedSnapshots, LoadError> {
    series.retain(|_, obs| !obs.is_empty());
    if series.is_empty() {
        return Err(LoadError::Empty {
            path: path.to_string(),
        });
    }

    let mut hasher = blake3::Hasher::new();
    let mut snapshots = InMemorySnapshots::new();
    let mut duplicate_rows = 0;

    for (symbol, observations) in &mut series {
        observations.sort_by_key(|o| o.date);
        if let Some(pair) = observations
            .windows(2)
            .find(|w| w[0].date == w[1].date && !w[0].same_values(&w[1]))
        {
            return Err(LoadError::DuplicateRow {
                path: path.to_string(),
                symbol: symbol.clone(),
                date: pair[0].date,
            });
        }
        let before = observations.len();
        observations.dedup_by(|a, b| a.date == b.date);
        duplicate_rows += before - observations.len();

        let metrics = ranking_metrics(observations, ranking);
        hasher.update(symbol.as_bytes());
        for (obs, metric) in observations.iter().zip(metrics) {
            hasher.update(obs.date.to_string().as_bytes());
            hasher.update(&obs.close.to_le_bytes());
            hasher.update(&obs.market_cap.to_le_bytes());
            snapshots.insert(obs.date, AssetMetric::new(symbol.clone(), metric, obs.close));
        }
    }

    info!(
        path,
        symbols = series.len(),
        records = snapshots.len(),
        dropped_rows,
        duplicate_rows,
        "snapshots loaded"
    );

    Ok(LoadedSnapshots {
        snapshots,
        dataset_hash: hasher.finalize().to_hex().to_string(),
        symbol_count: series.len(),
        dropped_rows,
        duplicate_rows,
    })
}

fn check_ranking(ranking: RankingSource) -> Result<(), LoadError> {
    match ranking {
        RankingSource::EwmaMarketCap { halflife_days }
            if !(halflife_days.is_finite() && halflife_days > 0.0) =>
        {
            Err(LoadError::InvalidHalflife(halflife_days))
        }
        _ => Ok(()),
    }
}

/// Ranking metric per observation, chronologically.
fn ranking_metrics(observations: &[Observation], ranking: RankingSource) -> Vec<f64> {
    let caps: Vec<f64> = observations.iter().map(|o| o.market_cap).collect();
    match ranking {
        RankingSource::MarketCap => caps,
        RankingSource::EwmaMarketCap { halflife_days } => {
            let dates: Vec<NaiveDate> = observations.iter().map(|o| o.date).collect();
            ewma_by_halflife(&dates, &caps, halflife_days)
        }
    }
}

fn observation(date: NaiveDate, close: Option<f64>, market_cap: Option<f64>) -> Option<Observation> {
    let market_cap = market_cap.filter(|c| c.is_finite() && *c > 0.0)?;
    Some(Observation {
        date,
        close: close.unwrap_or(f64::NAN),
        market_cap,
    })
}

/// Accepts `YYYY-MM-DD` with an optional time suffix.
fn parse_date(path: &str, value: &str) -> Result<NaiveDate, LoadError> {
    let day = value.trim().get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| LoadError::BadDate {
        path: path.to_string(),
        value: value.to_string(),
    })
}

fn csv_error(path: &str, source: csv::Error) -> LoadError {
    LoadError::Csv {
        path: path.to_string(),
        source,
    }
}
