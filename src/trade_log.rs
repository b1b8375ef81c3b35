// =============================================================================
// Trade Log — append-only daily record of executed orders
// =============================================================================
//
// One JSON-lines file per HK trading day at `<root>/trades/YYYY-MM-DD.json`.
// The log is the engine's persistent memory across restarts: the cooldown
// tracker hydrates from today's file on boot, and protective-clearance sells
// are tagged so the cooldown can refuse same-direction re-entries.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::hktime;
use crate::types::{Direction, OrderSide};

/// One executed-order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub executed_at_ms: i64,
    #[serde(default)]
    pub executed_price: f64,
    #[serde(default)]
    pub executed_qty: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_protective_clearance: bool,
}

/// Append-only writer/reader for the daily files.
pub struct TradeLog {
    root: PathBuf,
}

impl TradeLog {
    /// `root` is the log directory; files land under `<root>/trades/`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn day_path(&self, day_key: &str) -> PathBuf {
        self.root.join("trades").join(format!("{day_key}.json"))
    }

    /// Append one record to the day file derived from its executed time.
    pub fn append(&self, record: &TradeLogRecord) -> Result<()> {
        let day_key = hktime::hk_date_key(record.executed_at_ms);
        let path = self.day_path(&day_key);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create trade-log dir {}", parent.display()))?;
        }

        let line = serde_json::to_string(record).context("failed to serialise trade record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open trade log {}", path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append trade log {}", path.display()))?;

        debug!(order_id = %record.order_id, day = %day_key, "trade logged");
        Ok(())
    }

    /// Read every record of the given day. A missing file yields an empty
    /// vec; unparsable lines are skipped with a warning.
    pub fn read_day(&self, day_key: &str) -> Result<Vec<TradeLogRecord>> {
        let path = self.day_path(day_key);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read trade log {}", path.display()))
            }
        };

        let mut records = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeLogRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) => warn!(line = i + 1, error = %e, "skipping malformed trade-log line"),
            }
        }
        Ok(records)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, at_ms: i64, protective: bool) -> TradeLogRecord {
        TradeLogRecord {
            order_id: id.to_string(),
            symbol: "69001.HK".into(),
            side: OrderSide::Sell,
            executed_at_ms: at_ms,
            executed_price: 1.1,
            executed_qty: 500,
            direction: Some(Direction::Long),
            is_protective_clearance: protective,
        }
    }

    fn temp_log() -> (TradeLog, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("victoria-test-{}", uuid::Uuid::new_v4()));
        (TradeLog::new(&dir), dir)
    }

    #[test]
    fn append_then_read_roundtrip() {
        let (log, dir) = temp_log();
        let at = 1_771_200_000_000; // 2026-02-16 HK
        log.append(&record("o1", at, false)).unwrap();
        log.append(&record("o2", at + 1000, true)).unwrap();

        let day_key = hktime::hk_date_key(at);
        let records = log.read_day(&day_key).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].order_id, "o1");
        assert!(records[1].is_protective_clearance);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_day_reads_empty() {
        let (log, dir) = temp_log();
        assert!(log.read_day("1999-01-01").unwrap().is_empty());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn records_split_by_hk_day() {
        let (log, dir) = temp_log();
        let at = 1_771_200_000_000;
        log.append(&record("o1", at, false)).unwrap();
        log.append(&record("o2", at + 24 * 3600 * 1000, false)).unwrap();

        let day1 = hktime::hk_date_key(at);
        let day2 = hktime::hk_date_key(at + 24 * 3600 * 1000);
        assert_eq!(log.read_day(&day1).unwrap().len(), 1);
        assert_eq!(log.read_day(&day2).unwrap().len(), 1);

        std::fs::remove_dir_all(dir).ok();
    }
}
