// =============================================================================
// Unrealized-Loss Tracker — protective liquidation on floating losses
// =============================================================================
//
// Per (warrant, direction) the tracker caches:
//
//   base_r1  = Σ price × qty over unrealized-held buys (filtering engine)
//   n1       = Σ qty
//   r1       = base_r1 − min(daily_loss_offset, 0)
//
// The daily-loss offset is non-positive; subtracting it raises the cost
// basis, so a monitor already losing money today trips protection earlier.
//
// Check: unrealized P&L = current × n1 − r1. Liquidation triggers strictly
// below −threshold; exactly −threshold does not trigger.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::orders::recorder::OrderRecorder;
use crate::types::Direction;

/// Cached cost basis for one seat.
#[derive(Debug, Clone, Default)]
pub struct UnrealizedState {
    /// Adjusted cost basis (`base_r1 − min(daily_loss_offset, 0)`).
    pub r1: f64,
    /// Held quantity.
    pub n1: u64,
    /// Unadjusted cost basis.
    pub base_r1: f64,
    /// Daily realized loss at refresh time, ≤ 0.
    pub daily_loss_offset: f64,
    pub last_update_ms: i64,
}

/// Advice returned by the unrealized-loss check.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationAdvice {
    pub quantity: u64,
    pub reason: String,
}

/// Per-seat unrealized-loss caches.
pub struct UnrealizedLossTracker {
    states: RwLock<HashMap<(String, Direction), UnrealizedState>>,
}

impl UnrealizedLossTracker {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the cache for a seat from the recorder's held lots.
    /// Called after fills and on the scheduled refresh.
    pub fn refresh(
        &self,
        recorder: &OrderRecorder,
        symbol: &str,
        direction: Direction,
        daily_loss_offset: f64,
        now_ms: i64,
    ) {
        let held = recorder.get_buy_orders_for_symbol(symbol, direction);
        let base_r1: f64 = held
            .iter()
            .map(|b| b.executed_price * b.executed_qty as f64)
            .sum();
        let n1: u64 = held.iter().map(|b| b.executed_qty).sum();
        let offset = daily_loss_offset.min(0.0);
        let r1 = base_r1 - offset;

        debug!(
            symbol,
            direction = %direction,
            n1,
            base_r1,
            offset,
            "unrealized-loss cache refreshed"
        );

        self.states.write().insert(
            (symbol.to_string(), direction),
            UnrealizedState {
                r1,
                n1,
                base_r1,
                daily_loss_offset: offset,
                last_update_ms: now_ms,
            },
        );
    }

    /// Check the floating loss against the configured maximum.
    ///
    /// `max_loss <= 0` disables the check. The boundary is strict: a loss of
    /// exactly `max_loss` does not liquidate.
    pub fn check(
        &self,
        symbol: &str,
        direction: Direction,
        current_price: f64,
        max_loss: f64,
    ) -> Option<LiquidationAdvice> {
        if max_loss <= 0.0 || current_price <= 0.0 {
            return None;
        }

        let states = self.states.read();
        let state = states.get(&(symbol.to_string(), direction))?;
        if state.n1 == 0 {
            return None;
        }

        let unrealized = current_price * state.n1 as f64 - state.r1;
        if unrealized < -max_loss {
            let advice = LiquidationAdvice {
                quantity: state.n1,
                reason: format!(
                    "unrealized loss {:.2} exceeds limit {:.2} (n1={}, r1={:.2}, px={:.3})",
                    unrealized, max_loss, state.n1, state.r1, current_price
                ),
            };
            info!(symbol, direction = %direction, reason = %advice.reason, "protective liquidation advised");
            Some(advice)
        } else {
            None
        }
    }

    /// Snapshot of a seat's cached state.
    pub fn state(&self, symbol: &str, direction: Direction) -> Option<UnrealizedState> {
        self.states
            .read()
            .get(&(symbol.to_string(), direction))
            .cloned()
    }

    /// Drop every cached state (midnight clear, doomsday).
    pub fn clear_all(&self) {
        self.states.write().clear();
    }
}

impl Default for UnrealizedLossTracker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderRecord;

    fn recorder_with_lots(lots: &[(f64, u64)]) -> OrderRecorder {
        let recorder = OrderRecorder::new();
        for (i, &(price, qty)) in lots.iter().enumerate() {
            recorder.record_filled_buy(
                Direction::Long,
                OrderRecord {
                    order_id: format!("b{i}"),
                    symbol: "69001.HK".into(),
                    executed_price: price,
                    executed_qty: qty,
                    executed_at_ms: (i as i64 + 1) * 1000,
                    submitted_at_ms: None,
                    updated_at_ms: None,
                },
            );
        }
        recorder
    }

    #[test]
    fn refresh_sums_held_lots() {
        let recorder = recorder_with_lots(&[(1.0, 500), (1.2, 500)]);
        let tracker = UnrealizedLossTracker::new();
        tracker.refresh(&recorder, "69001.HK", Direction::Long, 0.0, 1);

        let s = tracker.state("69001.HK", Direction::Long).unwrap();
        assert_eq!(s.n1, 1000);
        assert!((s.base_r1 - 1100.0).abs() < 1e-9);
        assert!((s.r1 - 1100.0).abs() < 1e-9);
    }

    #[test]
    fn daily_loss_offset_raises_cost_basis() {
        let recorder = recorder_with_lots(&[(1.0, 1000)]);
        let tracker = UnrealizedLossTracker::new();
        tracker.refresh(&recorder, "69001.HK", Direction::Long, -200.0, 1);

        let s = tracker.state("69001.HK", Direction::Long).unwrap();
        assert!((s.base_r1 - 1000.0).abs() < 1e-9);
        assert!((s.r1 - 1200.0).abs() < 1e-9);

        // A positive "offset" must be clamped to zero.
        tracker.refresh(&recorder, "69001.HK", Direction::Long, 300.0, 2);
        let s = tracker.state("69001.HK", Direction::Long).unwrap();
        assert!((s.r1 - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn boundary_is_strict() {
        // r1 = 1000, n1 = 1000: at price 0.9, loss is exactly -100.
        let recorder = recorder_with_lots(&[(1.0, 1000)]);
        let tracker = UnrealizedLossTracker::new();
        tracker.refresh(&recorder, "69001.HK", Direction::Long, 0.0, 1);

        // Exactly at the limit: no liquidation.
        assert!(tracker.check("69001.HK", Direction::Long, 0.9, 100.0).is_none());
        // A hair past the limit: liquidate the full held quantity.
        let advice = tracker
            .check("69001.HK", Direction::Long, 0.9 - 1e-6, 100.0)
            .unwrap();
        assert_eq!(advice.quantity, 1000);
    }

    #[test]
    fn disabled_when_limit_not_positive() {
        let recorder = recorder_with_lots(&[(1.0, 1000)]);
        let tracker = UnrealizedLossTracker::new();
        tracker.refresh(&recorder, "69001.HK", Direction::Long, 0.0, 1);
        assert!(tracker.check("69001.HK", Direction::Long, 0.1, 0.0).is_none());
    }

    #[test]
    fn empty_position_never_liquidates() {
        let tracker = UnrealizedLossTracker::new();
        let recorder = OrderRecorder::new();
        tracker.refresh(&recorder, "69001.HK", Direction::Long, 0.0, 1);
        assert!(tracker.check("69001.HK", Direction::Long, 0.01, 100.0).is_none());
    }
}
