// =============================================================================
// Startup Gate — holding the main loop until the market is tradeable
// =============================================================================
//
// Strict mode blocks until three conditions hold: today is a trading day,
// the current HK time is inside a continuous session, and the configured
// open-protection window has elapsed (the first minutes after the open are
// too noisy to trade). Skip mode returns immediately for tests and replays.
//
// The gate polls on an interval and deduplicates its state-change logs: the
// same blocking reason is logged once, not every poll.
// =============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::config::{GateConfig, GateMode};
use crate::hktime;
use crate::market_data::CalendarCache;

pub struct StartupGate {
    config: GateConfig,
    last_logged: Mutex<Option<String>>,
}

impl StartupGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            last_logged: Mutex::new(None),
        }
    }

    /// Pure check: `Ok(())` when trading may start, `Err(reason)` otherwise.
    pub fn check(&self, calendar: &CalendarCache, now_ms: i64) -> Result<(), String> {
        if self.config.mode == GateMode::Skip {
            return Ok(());
        }

        let day_key = hktime::hk_date_key(now_ms);
        if !calendar.is_trading_day(&day_key) {
            return Err(format!("{day_key} is not a trading day"));
        }

        let is_half_day = calendar.is_half_day(&day_key);
        if !hktime::in_continuous_session(now_ms, is_half_day) {
            return Err("outside continuous trading session".to_string());
        }

        let minutes = hktime::trading_minutes_since_open(now_ms, is_half_day);
        if minutes < self.config.open_protection_minutes {
            return Err(format!(
                "open protection active ({minutes}/{} min)",
                self.config.open_protection_minutes
            ));
        }

        Ok(())
    }

    /// Block until the gate opens, polling on the configured interval.
    pub async fn wait_until_open(&self, calendar: &CalendarCache) {
        loop {
            match self.check(calendar, hktime::now_ms()) {
                Ok(()) => {
                    info!("startup gate open — trading session active");
                    return;
                }
                Err(reason) => {
                    // Log each distinct reason once.
                    let mut last = self.last_logged.lock();
                    if last.as_deref() != Some(reason.as_str()) {
                        info!(reason = %reason, "startup gate blocked");
                        *last = Some(reason);
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(self.config.poll_secs.max(1))).await;
        }
    }
}
