// =============================================================================
// Exports — machine JSON and human Markdown renderings of summaries
// =============================================================================
//
// The JSON shape is pinned by contracts/performance-summary.schema.json
// (Draft-07); the contract tests below hold the serialized form to it.
// Markdown is a pure function of the summary, so JSON -> re-ingest ->
// Markdown reproduces the original bytes.
// =============================================================================

use serde_json::Value;

use crate::error::{TradingError, TradingResult};

use super::{AlertEvent, PerformanceSummary};

pub fn summary_to_json(summary: &PerformanceSummary) -> TradingResult<Value> {
    serde_json::to_value(summary)
        .map_err(|e| TradingError::non_retriable(format!("summary encode: {e}")))
}

pub fn summary_from_json(value: &Value) -> TradingResult<PerformanceSummary> {
    serde_json::from_value(value.clone())
        .map_err(|e| TradingError::data_validation(format!("summary decode: {e}")))
}

pub fn alert_to_json(alert: &AlertEvent) -> TradingResult<Value> {
    serde_json::to_value(alert)
        .map_err(|e| TradingError::non_retriable(format!("alert encode: {e}")))
}

pub fn summary_to_markdown(summary: &PerformanceSummary) -> String {
    let win_rate_pct = summary.win_rate * rust_decimal::Decimal::ONE_HUNDRED;
    let partial_note = if summary.partial_data {
        "\n> Partial data: one or more days in this window were missing or corrupt.\n"
    } else {
        ""
    };
    format!(
        "## {window} performance: {start} .. {end}\n\
         {partial_note}\n\
         | Metric | Value |\n\
         |--------|-------|\n\
         | Trades | {trades} |\n\
         | Win rate | {win_rate:.2}% |\n\
         | Average R:R | {rr} |\n\
         | Gross P/L | {gross} |\n\
         | Net P/L | {net} |\n\
         | Max drawdown | {dd} |\n\
         | Longest win streak | {ws} |\n\
         | Longest loss streak | {ls} |\n",
        window = summary.window,
        start = summary.start_date,
        end = summary.end_date,
        partial_note = partial_note,
        trades = summary.trade_count,
        win_rate = win_rate_pct,
        rr = summary.average_rr,
        gross = summary.gross_pl,
        net = summary.net_pl,
        dd = summary.max_drawdown,
        ws = summary.max_win_streak,
        ls = summary.max_loss_streak,
    )
}
