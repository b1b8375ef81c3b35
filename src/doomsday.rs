// =============================================================================
// Doomsday Protection — close-window cancel-then-liquidate safety net
// =============================================================================
//
// CBBCs held past the close carry overnight knock-out risk, so two windows
// run against the session close (16:00, or 12:00 on half-days):
//
// - Close − 15 min: cancel every pending buy order, once per day.
// - Close − 5 min: for each monitor whose seats are both READY, synthesize
//   market-order SELLCALL/SELLPUT clearance signals for the held positions,
//   clear the recorder's buy lots, and drop the account/position caches.
//
// Both windows are idempotent via a day-key guard; clearance sells are
// tagged protective so the cooldown tracker refuses same-direction
// re-entries after the fills land in the trade log.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::hktime;
use crate::market_data::AccountCaches;
use crate::orders::monitor::OrderMonitor;
use crate::orders::recorder::OrderRecorder;
use crate::queues::{SellTask, SellTaskQueue};
use crate::seats::SeatRegistry;
use crate::signals::Signal;
use crate::types::{Direction, SignalAction};

/// Minutes before close for the buy-cancel sweep.
const CANCEL_WINDOW_MIN: u32 = 15;
/// Minutes before close for the clearance liquidation.
const CLEAR_WINDOW_MIN: u32 = 5;

pub struct DoomsdayProtector {
    config: Arc<EngineConfig>,
    registry: Arc<SeatRegistry>,
    recorder: Arc<OrderRecorder>,
    order_monitor: Arc<OrderMonitor>,
    sell_queue: Arc<SellTaskQueue>,
    account_caches: Arc<AccountCaches>,
    last_cancel_day: Mutex<Option<String>>,
    last_clear_day: Mutex<Option<String>>,
}

impl DoomsdayProtector {
    pub fn new(
        config: Arc<EngineConfig>,
        registry: Arc<SeatRegistry>,
        recorder: Arc<OrderRecorder>,
        order_monitor: Arc<OrderMonitor>,
        sell_queue: Arc<SellTaskQueue>,
        account_caches: Arc<AccountCaches>,
    ) -> Self {
        Self {
            config,
            registry,
            recorder,
            order_monitor,
            sell_queue,
            account_caches,
            last_cancel_day: Mutex::new(None),
            last_clear_day: Mutex::new(None),
        }
    }

    /// Evaluate both windows for this tick.
    pub async fn tick(&self, now_ms: i64, is_half_day: bool) {
        let Some(minutes_left) = hktime::minutes_until_close(now_ms, is_half_day) else {
            return;
        };
        let day_key = hktime::hk_date_key(now_ms);

        if minutes_left <= CANCEL_WINDOW_MIN {
            self.run_buy_cancel_sweep(&day_key).await;
        }
        if minutes_left <= CLEAR_WINDOW_MIN {
            self.run_clearance(&day_key, now_ms).await;
        }
    }

    /// Close − 15 min: cancel all pending buys, once per day.
    async fn run_buy_cancel_sweep(&self, day_key: &str) {
        {
            let mut last = self.last_cancel_day.lock();
            if last.as_deref() == Some(day_key) {
                return;
            }
            *last = Some(day_key.to_string());
        }

        let cancelled = self.order_monitor.cancel_all_pending_buys().await;
        info!(day = day_key, cancelled, "doomsday: pending buys cancelled before close");
    }

    /// Close − 5 min: liquidate held positions on monitors with both seats
    /// READY, then drop recorder buys and account caches. Once per day.
    async fn run_clearance(&self, day_key: &str, now_ms: i64) {
        {
            let mut last = self.last_clear_day.lock();
            if last.as_deref() == Some(day_key) {
                return;
            }
            *last = Some(day_key.to_string());
        }

        let mut signals = 0usize;
        for cfg in &self.config.monitors {
            let long = self.registry.snapshot(&cfg.symbol, Direction::Long);
            let short = self.registry.snapshot(&cfg.symbol, Direction::Short);
            if !long.usable || !short.usable {
                warn!(
                    monitor = %cfg.symbol,
                    "doomsday: seats not both READY — clearance skipped"
                );
                continue;
            }

            for (seat, action) in [
                (&long, SignalAction::SellCall),
                (&short, SignalAction::SellPut),
            ] {
                let Some(symbol) = seat.symbol.clone() else {
                    continue;
                };
                let direction = seat.direction;
                let held = self.recorder.held_qty(&symbol, direction);
                if held == 0 {
                    continue;
                }

                let mut signal = Signal::new(
                    &cfg.symbol,
                    &symbol,
                    action,
                    "doomsday clearance before close",
                    seat.version,
                    now_ms,
                )
                .protective();
                signal.quantity = Some(held);

                info!(
                    monitor = %cfg.symbol,
                    symbol = %symbol,
                    action = %action,
                    qty = held,
                    "doomsday: clearance sell synthesized"
                );
                self.sell_queue.push(SellTask { signal });
                signals += 1;

                self.recorder.clear_buy_orders(&symbol, direction);
            }
        }

        self.account_caches.clear();
        info!(day = day_key, signals, "doomsday clearance complete — account caches dropped");
    }
}
