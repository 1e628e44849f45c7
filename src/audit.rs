// =============================================================================
// Audit logger — newline-delimited JSON records with credential masking
// =============================================================================
//
// Event domains map to files under the logs directory:
//
//   trading_bot.jsonl          engine decisions and safety evaluations
//   health_check.jsonl         session-health probe events
//   performance-alerts.jsonl   threshold alert events
//   YYYY-MM-DD.jsonl           one TradeRecord per line, per UTC date
//
// Every record carries a UTC ISO-8601 timestamp (Z-suffixed), an `event`
// name, and a correlation id where one applies. Decimal fields serialize as
// strings so precision survives. Trade-log rotation is time-based: the file
// name is the UTC date of the record.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{TradingError, TradingResult};
use crate::models::TradeRecord;

/// The only representation a password ever gets on a log surface.
pub const MASKED_PASSWORD: &str = "********";

/// First three characters of the local part survive; the domain is kept so
/// an operator can still tell accounts apart.
pub fn mask_username(username: &str) -> String {
    match username.split_once('@') {
        Some((local, domain)) => {
            let keep: String = local.chars().take(3).collect();
            format!("{keep}***@{domain}")
        }
        None => {
            let keep: String = username.chars().take(3).collect();
            format!("{keep}***")
        }
    }
}

/// Challenge secrets are masked entirely.
pub fn mask_secret(_secret: &str) -> String {
    MASKED_PASSWORD.to_string()
}

/// Device tokens keep an 8-character prefix for correlation.
pub fn mask_device_token(token: &str) -> String {
    let keep: String = token.chars().take(8).collect();
    format!("{keep}***")
}

// ---------------------------------------------------------------------------
// Domains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDomain {
    Bot,
    Health,
    Alerts,
}

impl LogDomain {
    fn file_name(&self) -> &'static str {
        match self {
            Self::Bot => "trading_bot.jsonl",
            Self::Health => "health_check.jsonl",
            Self::Alerts => "performance-alerts.jsonl",
        }
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Append-only JSONL writer. One instance per process; writes are serialized
/// under a mutex so concurrent tasks never interleave partial lines.
#[derive(Debug)]
pub struct AuditLogger {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "could not create logs directory");
        }
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the trade log for `date`.
    pub fn trade_log_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Emit one event record. `payload` must be a JSON object; its fields are
    /// merged alongside `timestamp`, `event`, and `correlation_id`.
    ///
    /// Audit write failures are logged and swallowed: a full disk must not
    /// take the engine down mid-decision.
    pub fn event(
        &self,
        domain: LogDomain,
        event: &str,
        correlation_id: Option<&str>,
        payload: Value,
    ) {
        let mut record = json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "event": event,
        });
        if let Some(id) = correlation_id {
            record["correlation_id"] = json!(id);
        }
        if let (Some(map), Some(extra)) = (record.as_object_mut(), payload.as_object()) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }

        let path = self.dir.join(domain.file_name());
        if let Err(e) = self.write_line(&path, &record) {
            warn!(path = %path.display(), error = %e, "audit event write failed");
        }
    }

    /// Append one TradeRecord line to the UTC-dated trade log.
    pub fn append_trade(&self, record: &TradeRecord) -> TradingResult<()> {
        let path = self.trade_log_path(record.decided_at.date_naive());
        let value = serde_json::to_value(record)
            .map_err(|e| TradingError::non_retriable(format!("trade record encode: {e}")))?;
        self.write_line(&path, &value)
            .map_err(|e| TradingError::non_retriable(format!("trade log append: {e}")))
    }

    fn write_line(&self, path: &Path, value: &Value) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.flush()
    }
}
