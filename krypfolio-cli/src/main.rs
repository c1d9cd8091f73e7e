//! Krypfolio CLI: backtest, sweep and single-date allocation commands.
//!
//! Commands:
//! - `run`: execute a backtest from a TOML config file or named preset
//! - `sweep`: grid-search stop-loss and rebalance cadence
//! - `allocate`: print the capped allocation for one date

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use krypfolio_core::allocator::Allocator;
use krypfolio_runner::export::{export_sweep_csv, render_summary};
use krypfolio_runner::{
    load_snapshot_dir, load_snapshots_csv, run_backtest, run_sweep, save_artifacts,
    write_equity_csv, BacktestConfig, BacktestSection, LoadedSnapshots, RankingSource,
    SnapshotProvider, StrategyPreset, SweepGrid,
};

#[derive(Parser)]
#[command(
    name = "krypfolio",
    about = "Krypfolio CLI: cap-weighted crypto index backtester"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config file or named preset.
    Run {
        #[command(flatten)]
        strategy: StrategyArgs,

        /// Output directory for manifest.json, equity.csv and transitions.csv.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Also write the equity curve to this CSV path.
        #[arg(long)]
        equity_csv: Option<PathBuf>,
    },
    /// Grid-search stop-loss (5%..35%) and rebalance cadence (1..6 weeks).
    Sweep {
        #[command(flatten)]
        strategy: StrategyArgs,

        /// Number of best cells to print.
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Write the full sweep table to this CSV path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the capped allocation for a single date.
    Allocate {
        #[command(flatten)]
        strategy: StrategyArgs,

        /// Date to allocate (YYYY-MM-DD).
        #[arg(long)]
        date: String,
    },
}

/// Strategy and data selection shared by every command.
#[derive(Args)]
struct StrategyArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Named preset: hodl20, hodl30, cci30.
    #[arg(long)]
    preset: Option<String>,

    /// Snapshot data: a long-format CSV or a directory of per-symbol CSVs.
    #[arg(long, default_value = "data/processed")]
    data: PathBuf,

    /// Start date (YYYY-MM-DD), preset only. Defaults to 2015-01-01.
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYY-MM-DD), preset only. Defaults to today.
    #[arg(long)]
    end: Option<String>,

    /// Initial capital, preset only.
    #[arg(long, default_value_t = 1000.0)]
    capital: f64,

    /// Trailing stop-loss fraction, preset only.
    #[arg(long, default_value_t = 0.2)]
    stop_loss: f64,

    /// Rebalance cadence in weeks, preset only.
    #[arg(long, default_value_t = 4)]
    rebalance_weeks: u32,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            strategy,
            output_dir,
            equity_csv,
        } => run_backtest_cmd(&strategy, &output_dir, equity_csv.as_deref()),
        Commands::Sweep {
            strategy,
            top,
            output,
        } => run_sweep_cmd(&strategy, top, output.as_deref()),
        Commands::Allocate { strategy, date } => run_allocate_cmd(&strategy, &date),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_backtest_cmd(args: &StrategyArgs, output_dir: &Path, equity_csv: Option<&Path>) -> Result<()> {
    let config = build_config(args)?;
    let loaded = load_data(&args.data, config.strategy.ranking)?;

    let result = run_backtest(&config, &loaded.snapshots)?;
    print!("{}", render_summary(&result));

    let run_dir = save_artifacts(&result, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());

    if let Some(path) = equity_csv {
        write_equity_csv(path, &result.equity_curve)?;
        println!("Equity curve written to: {}", path.display());
    }
    Ok(())
}

fn run_sweep_cmd(args: &StrategyArgs, top: usize, output: Option<&Path>) -> Result<()> {
    let config = build_config(args)?;
    let loaded = load_data(&args.data, config.strategy.ranking)?;

    let grid = SweepGrid::default();
    let points = run_sweep(&config, &loaded.snapshots, &grid)?;

    println!("{:>6} {:>6} {:>12} {:>9} {:>6}", "loss", "weeks", "end", "multiple", "stops");
    for p in points.iter().take(top) {
        println!(
            "{:>6.2} {:>6} {:>12.2} {:>8.3}x {:>6}",
            p.stop_loss, p.rebalance_weeks, p.end_balance, p.portfolio_multiple, p.stop_loss_count
        );
    }

    if let Some(path) = output {
        let csv = export_sweep_csv(&points)?;
        std::fs::write(path, csv)
            .with_context(|| format!("failed to write sweep CSV {}", path.display()))?;
        println!("Sweep table written to: {}", path.display());
    }
    Ok(())
}

fn run_allocate_cmd(args: &StrategyArgs, date: &str) -> Result<()> {
    let config = build_config(args)?;
    let date = parse_date(date)?;
    let loaded = load_data(&args.data, config.strategy.ranking)?;

    let allocator = Allocator::new(config.allocator_config());
    let allocation = allocator.allocate(date, &loaded.snapshots.snapshot_at(date))?;
    if allocation.is_empty() {
        bail!("no rankable assets on {date}");
    }

    println!("{:<4} {:<20} {:>12} {:>8}", "#", "symbol", "price", "ratio");
    for (i, entry) in allocation.entries.iter().enumerate() {
        println!(
            "{:<4} {:<20} {:>12.4} {:>7.2}%",
            i + 1,
            entry.symbol,
            entry.price,
            entry.ratio * 100.0
        );
    }
    println!("sum of ratios: {:.6}", allocation.ratio_sum());
    Ok(())
}

fn build_config(args: &StrategyArgs) -> Result<BacktestConfig> {
    match (&args.config, &args.preset) {
        (Some(_), Some(_)) => bail!("--config and --preset are mutually exclusive"),
        (None, None) => bail!("one of --config or --preset is required"),
        (Some(path), None) => Ok(BacktestConfig::from_file(path)?),
        (None, Some(name)) => {
            let preset: StrategyPreset = name.parse()?;
            let start_date = args
                .start
                .as_deref()
                .map(parse_date)
                .transpose()?
                .unwrap_or_else(default_start);
            let end_date = args
                .end
                .as_deref()
                .map(parse_date)
                .transpose()?
                .unwrap_or_else(|| chrono::Local::now().date_naive());
            let backtest = BacktestSection {
                start_date,
                end_date,
                initial_capital: args.capital,
                stop_loss: args.stop_loss,
                rebalance_weeks: args.rebalance_weeks,
            };
            Ok(BacktestConfig::from_preset(preset, backtest)?)
        }
    }
}

fn load_data(path: &Path, ranking: RankingSource) -> Result<LoadedSnapshots> {
    let loaded = if path.is_dir() {
        load_snapshot_dir(path, ranking)?
    } else {
        load_snapshots_csv(path, ranking)?
    };
    info!(
        symbols = loaded.symbol_count,
        first = ?loaded.snapshots.first_date(),
        last = ?loaded.snapshots.last_date(),
        dataset_hash = %loaded.dataset_hash,
        "data ready"
    );
    Ok(loaded)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default()
}
