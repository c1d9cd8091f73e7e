//! Serializable backtest configuration and strategy presets.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use krypfolio_core::allocator::{AllocatorConfig, Weighting};
use krypfolio_core::engine::EngineConfig;

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

/// Errors from reading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("top_n = {top_n} at cap = {cap} cannot hold the full portfolio (top_n * cap < 1)")]
    UnsaturatableCap { top_n: usize, cap: f64 },

    #[error("cap must be in (0, 1], got {0}")]
    InvalidCap(f64),

    #[error("top_n must be at least 1")]
    InvalidTopN,

    #[error("stop_loss must be in (0, 1], got {0}")]
    InvalidStopLoss(f64),

    #[error("initial_capital must be positive and finite, got {0}")]
    InvalidCapital(f64),

    #[error("rebalance_weeks must be at least 1, got {0}")]
    InvalidCadence(u32),

    #[error("start_date {start} is after end_date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("EWMA halflife must be positive, got {0} days")]
    InvalidHalflife(f64),

    #[error("unknown strategy preset '{0}' (expected hodl20, hodl30 or cci30)")]
    UnknownPreset(String),
}

/// Top-level config file: `[backtest]` and `[strategy]` sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub backtest: BacktestSection,
    pub strategy: StrategyConfig,
}

/// Run window, capital and the engine's two tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    /// Drawdown fraction from the high-water mark that triggers liquidation.
    pub stop_loss: f64,
    /// Rebalance every this many weeks.
    pub rebalance_weeks: u32,
}

/// How assets are ranked and weighted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub top_n: usize,
    pub cap: f64,
    pub weighting: Weighting,
    /// Asset every valid allocation must contain; also the benchmark.
    #[serde(default)]
    pub anchor_symbol: Option<String>,
    #[serde(default)]
    pub ranking: RankingSource,
}

/// Which series feeds `AssetMetric::ranking_metric`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RankingSource {
    /// Raw market capitalisation.
    #[default]
    MarketCap,
    /// Per-symbol time-aware EWMA of market capitalisation.
    EwmaMarketCap { halflife_days: f64 },
}

impl BacktestConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from a preset and run parameters, validated.
    pub fn from_preset(preset: StrategyPreset, backtest: BacktestSection) -> Result<Self, ConfigError> {
        let config = Self {
            backtest,
            strategy: preset.to_strategy(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.backtest;
        if !(b.initial_capital.is_finite() && b.initial_capital > 0.0) {
            return Err(ConfigError::InvalidCapital(b.initial_capital));
        }
        if !(b.stop_loss > 0.0 && b.stop_loss <= 1.0) {
            return Err(ConfigError::InvalidStopLoss(b.stop_loss));
        }
        if b.rebalance_weeks == 0 {
            return Err(ConfigError::InvalidCadence(b.rebalance_weeks));
        }
        if b.start_date > b.end_date {
            return Err(ConfigError::InvalidDateRange {
                start: b.start_date,
                end: b.end_date,
            });
        }

        let s = &self.strategy;
        if s.top_n == 0 {
            return Err(ConfigError::InvalidTopN);
        }
        if !(s.cap > 0.0 && s.cap <= 1.0) {
            return Err(ConfigError::InvalidCap(s.cap));
        }
        if !self.allocator_config().can_saturate() {
            return Err(ConfigError::UnsaturatableCap {
                top_n: s.top_n,
                cap: s.cap,
            });
        }
        if let RankingSource::EwmaMarketCap { halflife_days } = s.ranking {
            if !(halflife_days.is_finite() && halflife_days > 0.0) {
                return Err(ConfigError::InvalidHalflife(halflife_days));
            }
        }
        Ok(())
    }

    /// Deterministic hash ID for this configuration.
    ///
    /// Two runs with identical configs share a RunId.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn allocator_config(&self) -> AllocatorConfig {
        AllocatorConfig::new(self.strategy.top_n, self.strategy.cap, self.strategy.weighting)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.backtest.initial_capital, self.backtest.stop_loss)
    }
}

/// Named strategy configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPreset {
    /// Top 20, 10% cap, linear weights on raw market cap.
    Hodl20,
    /// Top 30, 8% cap, square-root weights on 3-day EWMA market cap.
    Hodl30,
    /// Top 30, uncapped, square-root weights on 3-day EWMA market cap.
    Cci30,
}

impl StrategyPreset {
    pub const ANCHOR: &'static str = "bitcoin";

    pub fn all() -> &'static [StrategyPreset] {
        &[Self::Hodl20, Self::Hodl30, Self::Cci30]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Hodl20 => "hodl20",
            Self::Hodl30 => "hodl30",
            Self::Cci30 => "cci30",
        }
    }

    pub fn to_strategy(self) -> StrategyConfig {
        let ewma = RankingSource::EwmaMarketCap { halflife_days: 3.0 };
        let (top_n, cap, weighting, ranking) = match self {
            Self::Hodl20 => (20, 0.10, Weighting::Linear, RankingSource::MarketCap),
            Self::Hodl30 => (30, 0.08, Weighting::SquareRoot, ewma),
            Self::Cci30 => (30, 1.0, Weighting::SquareRoot, ewma),
        };
        StrategyConfig {
            top_n,
            cap,
            weighting,
            anchor_symbol: Some(Self::ANCHOR.to_string()),
            ranking,
        }
    }
}

impl FromStr for StrategyPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[backtest]
start_date = "2020-06-01"
end_date = "2021-06-01"
initial_capital = 1000.0
stop_loss = 0.2
rebalance_weeks = 4

[strategy]
top_n = 20
cap = 0.10
weighting = "linear"
anchor_symbol = "bitcoin"

[strategy.ranking]
type = "ewma_market_cap"
halflife_days = 3.0
"#;

    fn sample() -> BacktestConfig {
        BacktestConfig::from_toml(SAMPLE).unwrap()
    }

    #[test]
    fn parses_full_config() {
        let config = sample();
        assert_eq!(config.backtest.rebalance_weeks, 4);
        assert_eq!(config.strategy.weighting, Weighting::Linear);
        assert_eq!(config.strategy.anchor_symbol.as_deref(), Some("bitcoin"));
        assert_eq!(
            config.strategy.ranking,
            RankingSource::EwmaMarketCap { halflife_days: 3.0 }
        );
    }

    #[test]
    fn ranking_and_anchor_are_optional() {
        let toml = SAMPLE
            .replace("anchor_symbol = \"bitcoin\"\n", "")
            .replace("[strategy.ranking]\ntype = \"ewma_market_cap\"\nhalflife_days = 3.0\n", "");
        let config = BacktestConfig::from_toml(&toml).unwrap();
        assert_eq!(config.strategy.ranking, RankingSource::MarketCap);
        assert!(config.strategy.anchor_symbol.is_none());
    }

    #[test]
    fn unsaturatable_cap_is_rejected() {
        let toml = SAMPLE.replace("cap = 0.10", "cap = 0.04");
        let err = BacktestConfig::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::UnsaturatableCap { top_n: 20, .. }));
    }

    #[test]
    fn semantic_checks() {
        let mut config = sample();
        config.backtest.stop_loss = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStopLoss(_))));

        let mut config = sample();
        config.backtest.rebalance_weeks = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCadence(0))));

        let mut config = sample();
        config.backtest.initial_capital = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCapital(_))));

        let mut config = sample();
        config.backtest.end_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDateRange { .. })));

        let mut config = sample();
        config.strategy.top_n = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTopN)));

        let mut config = sample();
        config.strategy.cap = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCap(_))));

        let mut config = sample();
        config.strategy.ranking = RankingSource::EwmaMarketCap { halflife_days: 0.0 };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHalflife(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = BacktestConfig::from_toml("[backtest]\nstart_date = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn run_id_is_deterministic_and_param_sensitive() {
        let a = sample();
        let mut b = a.clone();
        assert_eq!(a.run_id().unwrap(), b.run_id().unwrap());

        b.backtest.stop_loss = 0.25;
        assert_ne!(a.run_id().unwrap(), b.run_id().unwrap());
    }

    #[test]
    fn presets_validate_and_parse_by_name() {
        let backtest = sample().backtest;
        for &preset in StrategyPreset::all() {
            let config = BacktestConfig::from_preset(preset, backtest.clone()).unwrap();
            assert_eq!(config.strategy.anchor_symbol.as_deref(), Some("bitcoin"));
            assert_eq!(preset.name().parse::<StrategyPreset>().unwrap(), preset);
        }
        assert_eq!(StrategyPreset::Cci30.to_strategy().cap, 1.0);
        assert!(matches!(
            "hodl50".parse::<StrategyPreset>(),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn toml_round_trip() {
        let config = sample();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(BacktestConfig::from_toml(&text).unwrap(), config);
    }
}
