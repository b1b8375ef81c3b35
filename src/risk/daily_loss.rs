// =============================================================================
// Daily-Loss Tracker — realized intraday P&L per (monitor, direction)
// =============================================================================
//
// Tracks today's filled buys and sells per seat and derives the
// non-positive `daily_loss_offset`:
//
//   offset = min(0, total_sell − total_buy + open_buy_cost)
//
// where `open_buy_cost` is the cost of the day's still-open buys according
// to the smart-close filtering engine. A profitable day yields offset 0; a
// losing day yields the (negative) realized loss, which the unrealized-loss
// tracker folds into its cost basis.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::hktime;
use crate::longport::types::RawOrder;
use crate::orders::ownership::resolve_order_ownership;
use crate::orders::{filtering, recorder::OrderRecorder};
use crate::types::{Direction, OrderRecord, OrderSide};

/// One seat's intraday records.
#[derive(Debug, Clone, Default)]
pub struct DayState {
    pub buys: Vec<OrderRecord>,
    pub sells: Vec<OrderRecord>,
    /// Derived realized loss, ≤ 0 (0 when profitable).
    pub daily_loss_offset: f64,
}

struct Inner {
    day_key: String,
    states: HashMap<(String, Direction), DayState>,
}

/// The daily-loss tracker. One instance per engine.
pub struct DailyLossTracker {
    inner: RwLock<Inner>,
}

impl DailyLossTracker {
    pub fn new(now_ms: i64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                day_key: hktime::hk_date_key(now_ms),
                states: HashMap::new(),
            }),
        }
    }

    /// Record a fill that belongs to today (by HK date key on its update
    /// time); fills from other days are ignored.
    pub fn record_fill(
        &self,
        monitor: &str,
        direction: Direction,
        side: OrderSide,
        record: OrderRecord,
    ) {
        let at_ms = record.updated_at_ms.unwrap_or(record.executed_at_ms);
        let mut inner = self.inner.write();
        if hktime::hk_date_key(at_ms) != inner.day_key {
            debug!(
                monitor,
                order_id = %record.order_id,
                "fill outside current day — not counted for daily loss"
            );
            return;
        }

        let state = inner
            .states
            .entry((monitor.to_string(), direction))
            .or_default();
        match side {
            OrderSide::Buy => state.buys.push(record),
            OrderSide::Sell => state.sells.push(record),
        }
        state.daily_loss_offset = Self::compute_offset(state);
    }

    /// The current non-positive loss offset for a seat (0 if untracked).
    pub fn offset(&self, monitor: &str, direction: Direction) -> f64 {
        self.inner
            .read()
            .states
            .get(&(monitor.to_string(), direction))
            .map(|s| s.daily_loss_offset)
            .unwrap_or(0.0)
    }

    /// Snapshot of a seat's day state.
    pub fn state(&self, monitor: &str, direction: Direction) -> Option<DayState> {
        self.inner
            .read()
            .states
            .get(&(monitor.to_string(), direction))
            .cloned()
    }

    /// Midnight clear: advance the day key and drop all states.
    pub fn reset_all(&self, now_ms: i64) {
        let mut inner = self.inner.write();
        inner.day_key = hktime::hk_date_key(now_ms);
        inner.states.clear();
        info!(day_key = %inner.day_key, "daily-loss tracker reset");
    }

    /// Open rebuild: regroup the full broker snapshot by ownership and
    /// rebuild every per-seat state from today's fills. Unmatched filled
    /// rows are surfaced as diagnostics (count plus up to 3 samples).
    pub fn recalculate_from_all_orders(
        &self,
        raw: &[RawOrder],
        monitors: &[MonitorConfig],
        now_ms: i64,
    ) {
        let day_key = hktime::hk_date_key(now_ms);
        let mut grouped: HashMap<(String, Direction), Vec<&RawOrder>> = HashMap::new();
        let mut unmatched = 0usize;
        let mut samples: Vec<String> = Vec::new();

        for row in raw {
            if row.status != crate::types::OrderStatus::Filled {
                continue;
            }
            if hktime::hk_date_key(row.updated_at_ms) != day_key {
                continue;
            }
            match resolve_order_ownership(&row.stock_name, monitors) {
                Some((monitor, direction)) => {
                    grouped.entry((monitor, direction)).or_default().push(row);
                }
                None => {
                    unmatched += 1;
                    if samples.len() < 3 {
                        samples.push(row.stock_name.clone());
                    }
                }
            }
        }

        if unmatched > 0 {
            warn!(
                unmatched,
                samples = ?samples,
                "filled orders with unresolved ownership during daily-loss rebuild"
            );
        }

        let mut inner = self.inner.write();
        inner.day_key = day_key;
        inner.states.clear();

        for ((monitor, direction), rows) in grouped {
            let owned: Vec<RawOrder> = rows.into_iter().cloned().collect();
            let classified = OrderRecorder::classify_and_convert(&owned);
            let mut state = DayState {
                buys: classified.buys,
                sells: classified.sells,
                daily_loss_offset: 0.0,
            };
            state.daily_loss_offset = Self::compute_offset(&state);
            debug!(
                monitor = %monitor,
                direction = %direction,
                buys = state.buys.len(),
                sells = state.sells.len(),
                offset = state.daily_loss_offset,
                "daily-loss state rebuilt"
            );
            inner.states.insert((monitor, direction), state);
        }
    }

    /// `min(0, total_sell − total_buy + open_buy_cost)` over the day's
    /// records.
    fn compute_offset(state: &DayState) -> f64 {
        let total_buy: f64 = state
            .buys
            .iter()
            .map(|b| b.executed_price * b.executed_qty as f64)
            .sum();
        let total_sell: f64 = state
            .sells
            .iter()
            .map(|s| s.executed_price * s.executed_qty as f64)
            .sum();
        let open_buy_cost: f64 = filtering::unrealized_buy_orders(&state.buys, &state.sells)
            .iter()
            .map(|b| b.executed_price * b.executed_qty as f64)
            .sum();

        (total_sell - total_buy + open_buy_cost).min(0.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, OrderType};

    const DAY_MS: i64 = 1_771_200_000_000; // 2026-02-16 08:00 HK

    fn record(id: &str, price: f64, qty: u64, at: i64) -> OrderRecord {
        OrderRecord {
            order_id: id.to_string(),
            symbol: "69001.HK".into(),
            executed_price: price,
            executed_qty: qty,
            executed_at_ms: at,
            submitted_at_ms: None,
            updated_at_ms: Some(at),
        }
    }

    #[test]
    fn profitable_day_has_zero_offset() {
        let tracker = DailyLossTracker::new(DAY_MS);
        tracker.record_fill(
            "HSI.HK",
            Direction::Long,
            OrderSide::Buy,
            record("b1", 1.0, 1000, DAY_MS + 1000),
        );
        tracker.record_fill(
            "HSI.HK",
            Direction::Long,
            OrderSide::Sell,
            record("s1", 1.2, 1000, DAY_MS + 2000),
        );
        assert!((tracker.offset("HSI.HK", Direction::Long) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn losing_day_yields_negative_offset() {
        let tracker = DailyLossTracker::new(DAY_MS);
        // Buy 1000 @ 1.0 = 1000; sell all @ 0.9 = 900 => loss 100.
        tracker.record_fill(
            "HSI.HK",
            Direction::Long,
            OrderSide::Buy,
            record("b1", 1.0, 1000, DAY_MS + 1000),
        );
        tracker.record_fill(
            "HSI.HK",
            Direction::Long,
            OrderSide::Sell,
            record("s1", 0.9, 1000, DAY_MS + 2000),
        );
        assert!((tracker.offset("HSI.HK", Direction::Long) + 100.0).abs() < 1e-9);
    }

    #[test]
    fn open_lots_do_not_count_as_loss() {
        let tracker = DailyLossTracker::new(DAY_MS);
        // Only a buy today: open cost cancels the spend, offset stays 0.
        tracker.record_fill(
            "HSI.HK",
            Direction::Long,
            OrderSide::Buy,
            record("b1", 1.0, 1000, DAY_MS + 1000),
        );
        assert!((tracker.offset("HSI.HK", Direction::Long)).abs() < 1e-9);
    }

    #[test]
    fn fills_from_other_days_ignored() {
        let tracker = DailyLossTracker::new(DAY_MS);
        tracker.record_fill(
            "HSI.HK",
            Direction::Long,
            OrderSide::Sell,
            record("s0", 0.5, 1000, DAY_MS - 24 * 3600 * 1000),
        );
        assert!(tracker.state("HSI.HK", Direction::Long).is_none());
    }

    #[test]
    fn reset_all_clears_states() {
        let tracker = DailyLossTracker::new(DAY_MS);
        tracker.record_fill(
            "HSI.HK",
            Direction::Short,
            OrderSide::Buy,
            record("b1", 1.0, 100, DAY_MS + 1000),
        );
        tracker.reset_all(DAY_MS + 24 * 3600 * 1000);
        assert!(tracker.state("HSI.HK", Direction::Short).is_none());
    }

    #[test]
    fn rebuild_groups_by_ownership_and_reports_unmatched() {
        let monitors: Vec<MonitorConfig> = vec![serde_json::from_value(serde_json::json!({
            "symbol": "HSI.HK",
            "ownership_keys": ["HSI"],
        }))
        .unwrap()];

        let mk_raw = |id: &str, name: &str, side: OrderSide, price: f64, qty: u64| RawOrder {
            order_id: id.to_string(),
            symbol: "69001.HK".into(),
            stock_name: name.to_string(),
            side,
            status: OrderStatus::Filled,
            order_type: OrderType::Lo,
            price,
            quantity: qty,
            executed_qty: qty,
            executed_price: price,
            submitted_at_ms: DAY_MS + 500,
            updated_at_ms: DAY_MS + 1000,
        };

        let raw = vec![
            mk_raw("b1", "HSI RC2606A", OrderSide::Buy, 1.0, 1000),
            mk_raw("s1", "HSI RC2606A", OrderSide::Sell, 0.9, 1000),
            mk_raw("x1", "MYSTERY 2606", OrderSide::Buy, 1.0, 100),
        ];

        let tracker = DailyLossTracker::new(DAY_MS);
        tracker.recalculate_from_all_orders(&raw, &monitors, DAY_MS);

        let state = tracker.state("HSI.HK", Direction::Long).unwrap();
        assert_eq!(state.buys.len(), 1);
        assert_eq!(state.sells.len(), 1);
        assert!((state.daily_loss_offset + 100.0).abs() < 1e-9);
    }
}
