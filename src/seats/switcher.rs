// =============================================================================
// Seat Switcher — distance-driven warrant rotation
// =============================================================================
//
// A READY seat whose live distance-to-recall leaves the configured band is
// rotated out:
//
//   1. Seat → SWITCHING (version bump fences out in-flight signals).
//   2. Pending verifications and queued buys for the old warrant are
//      cancelled; open broker orders on it are cancelled.
//   3. A market sell closes any held position.
//   4. Once flat, the seat is cleared and a fresh search binds a new
//      warrant; `should_rebuy` re-enters an equivalent notional.
//
// Same-day suppression: a symbol switched away from today is excluded from
// searches until the midnight clear, so the engine cannot flap back onto it.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::hktime;
use crate::longport::QuoteTransport;
use crate::orders::monitor::OrderMonitor;
use crate::orders::recorder::OrderRecorder;
use crate::queues::{BuyTask, BuyTaskKind, BuyTaskQueue, SellTask, SellTaskQueue};
use crate::risk::distance::{directional_distance_pct, within_switch_band};
use crate::signals::verifier::DelayedSignalVerifier;
use crate::signals::Signal;
use crate::types::{Direction, SignalAction};

use super::finder::AutoSymbolFinder;
use super::{SeatRegistry, SeatStatus};

/// Symbols switched away from, keyed to the HK day they were dropped.
pub struct SwitchSuppression {
    inner: RwLock<HashMap<String, String>>,
}

impl SwitchSuppression {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, symbol: &str, day_key: &str) {
        self.inner
            .write()
            .insert(symbol.to_string(), day_key.to_string());
    }

    /// Symbols still suppressed for the given day.
    pub fn excluded_for(&self, day_key: &str) -> HashSet<String> {
        self.inner
            .read()
            .iter()
            .filter(|(_, d)| d.as_str() == day_key)
            .map(|(s, _)| s.clone())
            .collect()
    }

    pub fn is_suppressed(&self, symbol: &str, day_key: &str) -> bool {
        self.inner
            .read()
            .get(symbol)
            .map_or(false, |d| d == day_key)
    }

    pub fn clear_all(&self) {
        self.inner.write().clear();
    }
}

impl Default for SwitchSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrates distance switches and seat searches.
pub struct SeatSwitcher {
    registry: Arc<SeatRegistry>,
    finder: Arc<AutoSymbolFinder>,
    verifier: Arc<DelayedSignalVerifier>,
    order_monitor: Arc<OrderMonitor>,
    recorder: Arc<OrderRecorder>,
    quote: Arc<dyn QuoteTransport>,
    buy_queue: Arc<BuyTaskQueue>,
    sell_queue: Arc<SellTaskQueue>,
    suppression: SwitchSuppression,
}

impl SeatSwitcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SeatRegistry>,
        finder: Arc<AutoSymbolFinder>,
        verifier: Arc<DelayedSignalVerifier>,
        order_monitor: Arc<OrderMonitor>,
        recorder: Arc<OrderRecorder>,
        quote: Arc<dyn QuoteTransport>,
        buy_queue: Arc<BuyTaskQueue>,
        sell_queue: Arc<SellTaskQueue>,
    ) -> Self {
        Self {
            registry,
            finder,
            verifier,
            order_monitor,
            recorder,
            quote,
            buy_queue,
            sell_queue,
            suppression: SwitchSuppression::new(),
        }
    }

    pub fn suppression(&self) -> &SwitchSuppression {
        &self.suppression
    }

    /// Check a READY seat's live distance against the switch band and
    /// initiate a switch when it has drifted out. Returns whether a switch
    /// was started.
    pub async fn maybe_switch_on_distance(
        &self,
        cfg: &MonitorConfig,
        direction: Direction,
        underlying_price: f64,
        now_ms: i64,
    ) -> Result<bool> {
        let Some(band) = cfg.auto_search.switch_distance_range else {
            return Ok(false);
        };
        let Some(seat) = self.registry.get(&cfg.symbol, direction) else {
            return Ok(false);
        };
        if seat.status != SeatStatus::Ready {
            return Ok(false);
        }
        let (Some(symbol), Some(recall)) = (seat.symbol.clone(), seat.recall_price) else {
            return Ok(false);
        };
        let Some(distance) = directional_distance_pct(underlying_price, recall, direction) else {
            return Ok(false);
        };
        if within_switch_band(distance, band) {
            return Ok(false);
        }

        info!(
            monitor = %cfg.symbol,
            direction = %direction,
            symbol = %symbol,
            distance = format!("{distance:.3}"),
            band = ?band,
            "distance out of band — switching seat"
        );

        let new_version = self.registry.begin_switch(&cfg.symbol, direction, now_ms);
        self.suppression
            .record(&symbol, &hktime::hk_date_key(now_ms));

        // Nothing queued for the old warrant may survive the switch.
        self.verifier.cancel_all_for_symbol(&symbol);
        let dropped = self.buy_queue.remove_tasks(
            |t| t.signal.symbol == symbol,
            |t| debug!(signal_id = %t.signal.id, "queued buy dropped by switch"),
        );
        if dropped > 0 {
            debug!(symbol = %symbol, dropped, "buy queue purged for switching seat");
        }
        self.order_monitor.cancel_pending(&symbol, None).await;

        // Close any held position at market; the sell carries the
        // post-switch version so the sell processor accepts it.
        let held = self.recorder.held_qty(&symbol, direction);
        if held > 0 {
            let action = if direction.is_long() {
                SignalAction::SellCall
            } else {
                SignalAction::SellPut
            };
            let mut signal = Signal::new(
                &cfg.symbol,
                &symbol,
                action,
                "distance switch close",
                new_version,
                now_ms,
            );
            signal.quantity = Some(held);
            signal.use_market_order = true;
            self.sell_queue.push(SellTask { signal });
        }

        Ok(true)
    }

    /// Advance a SWITCHING seat: once the old position is flat and no sell
    /// is pending, clear the seat and search for its replacement.
    pub async fn continue_switch(
        &self,
        cfg: &MonitorConfig,
        direction: Direction,
        underlying_price: f64,
        now_ms: i64,
        is_half_day: bool,
    ) -> Result<()> {
        let Some(seat) = self.registry.get(&cfg.symbol, direction) else {
            return Ok(());
        };
        if seat.status != SeatStatus::Switching {
            return Ok(());
        }
        let Some(old_symbol) = seat.symbol.clone() else {
            // Already cleared; fall through to the search.
            return self
                .run_search(cfg, direction, underlying_price, now_ms, is_half_day, true)
                .await
                .map(|_| ());
        };

        if !self.order_monitor.get_pending_sell_orders(&old_symbol).is_empty() {
            debug!(monitor = %cfg.symbol, direction = %direction, "switch waiting for pending sells");
            return Ok(());
        }
        if self.recorder.held_qty(&old_symbol, direction) > 0 {
            debug!(monitor = %cfg.symbol, direction = %direction, "switch waiting for position close");
            return Ok(());
        }

        self.registry.clear_seat(&cfg.symbol, direction, now_ms);
        if let Err(e) = self.quote.unsubscribe(&[old_symbol.clone()]).await {
            warn!(symbol = %old_symbol, error = %e, "unsubscribe after switch failed");
        }

        self.run_search(cfg, direction, underlying_price, now_ms, is_half_day, true)
            .await
            .map(|_| ())
    }

    /// Search for and bind a warrant to an EMPTY/SEARCHING seat. Returns
    /// whether a symbol was bound. `rebuy_after_switch` re-enters a position
    /// when the monitor's `should_rebuy` is set.
    pub async fn run_search(
        &self,
        cfg: &MonitorConfig,
        direction: Direction,
        underlying_price: f64,
        now_ms: i64,
        is_half_day: bool,
        rebuy_after_switch: bool,
    ) -> Result<bool> {
        let day_key = hktime::hk_date_key(now_ms);
        let Some(seat) = self.registry.get(&cfg.symbol, direction) else {
            return Ok(false);
        };
        if seat.frozen_trading_day_key.as_deref() == Some(day_key.as_str()) {
            debug!(monitor = %cfg.symbol, direction = %direction, "seat frozen — search skipped");
            return Ok(false);
        }

        self.registry.begin_search(&cfg.symbol, direction, now_ms);

        let exclusions = self.suppression.excluded_for(&day_key);
        let found = self
            .finder
            .find_best_warrant(
                self.quote.as_ref(),
                cfg,
                direction,
                underlying_price,
                now_ms,
                is_half_day,
                &exclusions,
            )
            .await;

        let candidate = match found {
            Ok(c) => c,
            Err(e) => {
                warn!(monitor = %cfg.symbol, direction = %direction, error = %e, "warrant search errored");
                None
            }
        };

        match candidate {
            Some(warrant) => {
                let version = self.registry.bind_symbol(
                    &cfg.symbol,
                    direction,
                    &warrant.symbol,
                    Some(warrant.call_price),
                    now_ms,
                );
                if let Err(e) = self.quote.subscribe(&[warrant.symbol.clone()]).await {
                    warn!(symbol = %warrant.symbol, error = %e, "subscribe after bind failed");
                }

                if rebuy_after_switch && cfg.auto_search.should_rebuy && cfg.target_notional > 0.0 {
                    let action = if direction.is_long() {
                        SignalAction::BuyCall
                    } else {
                        SignalAction::BuyPut
                    };
                    let mut signal = Signal::new(
                        &cfg.symbol,
                        &warrant.symbol,
                        action,
                        "post-switch re-entry",
                        version,
                        now_ms,
                    );
                    signal.symbol_name = Some(warrant.name.clone());
                    self.buy_queue.push(BuyTask {
                        signal,
                        kind: BuyTaskKind::SwitchRebuy,
                    });
                }
                Ok(true)
            }
            None => {
                self.registry.mark_search_failed(
                    &cfg.symbol,
                    direction,
                    cfg.auto_search.max_search_failures_per_day,
                    &day_key,
                );
                Ok(false)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_is_per_day() {
        let sup = SwitchSuppression::new();
        sup.record("A.HK", "2026-02-16");

        assert!(sup.is_suppressed("A.HK", "2026-02-16"));
        assert!(!sup.is_suppressed("A.HK", "2026-02-17"));
        assert!(sup.excluded_for("2026-02-16").contains("A.HK"));
        assert!(sup.excluded_for("2026-02-17").is_empty());

        sup.clear_all();
        assert!(!sup.is_suppressed("A.HK", "2026-02-16"));
    }
}
