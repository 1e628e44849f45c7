// =============================================================================
// performance — report CLI over the engine's trade logs
// =============================================================================
//
//   performance --window weekly --start 2025-01-06 --end 2025-01-12 --export md
//   performance --backfill --start 2025-01-01 --end 2025-01-31
//
// Summaries print to stdout (diagnostics go to stderr). Exit code 0 on
// success; 1 on an unrecoverable read or parse failure with a plain message.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use meridian_bot::audit::AuditLogger;
use meridian_bot::performance::{
    export, summary, AlertEvaluator, AlertTargets, PerformanceStore, PerformanceSummary,
    SummaryWindow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Md,
}

#[derive(Debug, Parser)]
#[command(name = "performance", about = "Trade-log performance reports")]
struct Args {
    /// Aggregation window: daily, weekly, or monthly.
    #[arg(long, default_value = "daily")]
    window: SummaryWindow,

    /// First date of the range (ISO). Defaults to one window before --end.
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last date of the range (ISO). Defaults to today (UTC).
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Output format.
    #[arg(long, value_enum, default_value = "json")]
    export: ExportFormat,

    /// Rebuild daily aggregates from the source logs before reporting.
    #[arg(long)]
    backfill: bool,

    /// Logs directory (the bot's audit output).
    #[arg(long, default_value = "logs")]
    logs_dir: PathBuf,
}

fn main() {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let end = args.end.unwrap_or_else(|| Utc::now().date_naive());
    let default_span = match args.window {
        SummaryWindow::Daily => 0,
        SummaryWindow::Weekly => 6,
        SummaryWindow::Monthly => 29,
    };
    let start = args
        .start
        .unwrap_or(end - chrono::Duration::days(default_span));
    if start > end {
        anyhow::bail!("--start {start} is after --end {end}");
    }

    let store = PerformanceStore::new(&args.logs_dir);
    if args.backfill {
        let rebuilt = store
            .backfill(start, end)
            .with_context(|| format!("backfill {start}..{end} failed"))?;
        eprintln!("backfill: {rebuilt} daily aggregate(s) rebuilt");
    }

    let mut summaries = Vec::new();
    for (sub_start, sub_end) in summary::partition(args.window, start, end) {
        let composed = summary::compose(&store, args.window, sub_start, sub_end)
            .with_context(|| format!("composing {sub_start}..{sub_end} failed"))?;
        summaries.push(composed);
    }

    evaluate_alerts(&args.logs_dir, &summaries);

    match args.export {
        ExportFormat::Json => {
            let values = summaries
                .iter()
                .map(export::summary_to_json)
                .collect::<Result<Vec<_>, _>>()
                .context("summary export failed")?;
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        ExportFormat::Md => {
            for s in &summaries {
                println!("{}", export::summary_to_markdown(s));
            }
        }
    }
    Ok(())
}

/// Alert targets are optional environment keys; with none set, evaluation is
/// skipped entirely.
fn evaluate_alerts(logs_dir: &PathBuf, summaries: &[PerformanceSummary]) {
    let targets = AlertTargets {
        target_win_rate: decimal_env("PERFORMANCE_TARGET_WIN_RATE"),
        target_drawdown: decimal_env("PERFORMANCE_TARGET_DRAWDOWN"),
        target_net_pl: decimal_env("PERFORMANCE_TARGET_NET_PL"),
    };
    if targets.target_win_rate.is_none()
        && targets.target_drawdown.is_none()
        && targets.target_net_pl.is_none()
    {
        return;
    }

    let rolling_window = std::env::var("PERFORMANCE_ALERT_ROLLING_WINDOW")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(20);
    let evaluator = AlertEvaluator::new(
        targets,
        rolling_window,
        Arc::new(AuditLogger::new(logs_dir)),
    );
    for summary in summaries {
        for alert in evaluator.evaluate(summary) {
            eprintln!(
                "alert: {} {} (target {}) over {}",
                alert.metric, alert.observed, alert.threshold, alert.window
            );
        }
    }
}

fn decimal_env(key: &str) -> Option<Decimal> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
