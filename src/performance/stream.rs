// =============================================================================
// Trade-log streaming reader
// =============================================================================
//
// The trade log is append-only JSONL written by a live process; a reader may
// observe a truncated final line mid-write. Such a tail is tolerated and
// excluded from `bytes_consumed`, so the next scan picks it up once the
// writer finishes. A malformed line that *is* newline-terminated is real
// corruption: it is skipped with a warning but still counted as consumed.
// =============================================================================

use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::warn;

use crate::error::{TradingError, TradingResult};
use crate::models::TradeRecord;

#[derive(Debug, Clone)]
pub struct TradeLogScan {
    pub records: Vec<TradeRecord>,
    /// Byte offset up to which the log has been durably consumed.
    pub bytes_consumed: u64,
}

pub fn read_trade_log(path: &Path) -> TradingResult<TradeLogScan> {
    let file = std::fs::File::open(path).map_err(|e| {
        TradingError::non_retriable(format!("cannot open trade log {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut bytes_consumed: u64 = 0;
    let mut buf = String::new();

    loop {
        buf.clear();
        let read = reader.read_line(&mut buf).map_err(|e| {
            TradingError::non_retriable(format!("trade log read failed: {e}"))
        })?;
        if read == 0 {
            break;
        }
        let terminated = buf.ends_with('\n');
        let line = buf.trim_end();
        if line.is_empty() {
            bytes_consumed += read as u64;
            continue;
        }

        match serde_json::from_str::<TradeRecord>(line) {
            Ok(record) => {
                records.push(record);
                bytes_consumed += read as u64;
            }
            Err(e) if !terminated => {
                // Truncated tail: a writer is mid-append. Leave it for the
                // next scan.
                warn!(path = %path.display(), error = %e, "truncated trailing line left unconsumed");
                break;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping malformed trade log line");
                bytes_consumed += read as u64;
            }
        }
    }

    Ok(TradeLogScan {
        records,
        bytes_consumed,
    })
}
