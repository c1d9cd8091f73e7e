//! Result export: JSON manifest, CSV tables, and a plain-text summary.
//!
//! All persisted manifests carry a `schema_version` field. Unknown versions
//! are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use krypfolio_core::engine::EquityPoint;

use crate::runner::{BacktestResult, SCHEMA_VERSION};
use crate::sweep::SweepPoint;

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Equity curve as CSV with `date,value` columns.
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "value"])?;
    for point in equity_curve {
        wtr.write_record([&point.date.to_string(), &format!("{:.4}", point.value)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn write_equity_csv(path: &Path, equity_curve: &[EquityPoint]) -> Result<()> {
    let csv = export_equity_csv(equity_curve)?;
    std::fs::write(path, csv)
        .with_context(|| format!("failed to write equity CSV {}", path.display()))
}

/// Per-event log: kind, injection stage, fund moved, balance and stop-loss flag.
pub fn export_transitions_csv(result: &BacktestResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "kind", "injection", "fund", "balance", "investment", "stop_loss"])?;
    for t in &result.transitions {
        let kind = if t.is_rebalance() { "rebalance" } else { "pass_through" };
        wtr.write_record([
            t.date.to_string(),
            kind.to_string(),
            t.injection.map_or("", |s| s.name()).to_string(),
            format!("{:.4}", t.fund),
            format!("{:.4}", t.balance),
            format!("{:.4}", t.investment),
            t.stop_loss.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Sweep table in the order given (best first when straight from `run_sweep`).
pub fn export_sweep_csv(points: &[SweepPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for point in points {
        wtr.serialize(point)?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a single backtest run.
///
/// Creates `{run_id prefix}/` under `output_dir` containing:
/// - `manifest.json`: the full `BacktestResult`
/// - `equity.csv`: daily equity curve
/// - `transitions.csv`: per-event log
///
/// Returns the path to the created directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let prefix = result.run_id.get(..12).unwrap_or(&result.run_id);
    let run_dir = output_dir.join(prefix);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("manifest.json"), export_json(result)?)?;
    write_equity_csv(&run_dir.join("equity.csv"), &result.equity_curve)?;
    std::fs::write(run_dir.join("transitions.csv"), export_transitions_csv(result)?)?;

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory's manifest.json.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Text summary ───────────────────────────────────────────────────

/// Human-readable run summary for terminal output.
pub fn render_summary(result: &BacktestResult) -> String {
    let s = &result.summary;
    let strategy = &result.config.strategy;
    let mut out = String::new();
    out.push_str(&format!("run            {}\n", result.run_id));
    out.push_str(&format!(
        "strategy       top {} / cap {:.2} / {}\n",
        strategy.top_n,
        strategy.cap,
        strategy.weighting.name()
    ));
    out.push_str(&format!("window         {} .. {}\n", s.start_date, s.end_date));
    out.push_str(&format!("start balance  {:.2}\n", s.initial_capital));
    out.push_str(&format!("end balance    {:.2}\n", s.end_balance));
    out.push_str(&format!("multiple       {:.3}x\n", s.portfolio_multiple));
    if let Some(bench) = s.benchmark_multiple {
        let anchor = strategy.anchor_symbol.as_deref().unwrap_or("anchor");
        out.push_str(&format!("{:<15}{:.3}x\n", anchor, bench));
    }
    out.push_str(&format!(
        "rebalances     {} ({} stop-loss exits, {} skipped dates)\n",
        result.rebalance_count,
        result.stop_loss_count,
        result.skipped.len()
    ));
    out
}
