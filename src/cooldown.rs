// =============================================================================
// Cooldown Tracker — refusing hasty re-entries per (symbol, direction)
// =============================================================================
//
// After a position closes, new entries on the same (symbol, direction) are
// refused for the monitor's configured window: a fixed number of minutes,
// half a day (twelve hours), or until the HK date rolls.
//
// Protective-clearance sells (doomsday) are recorded from the trade log, so
// a restart inside the cooldown window keeps refusing re-entries.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::CooldownRule;
use crate::hktime;
use crate::trade_log::TradeLog;
use crate::types::{Direction, OrderSide};

/// One recorded close.
#[derive(Debug, Clone, Copy)]
pub struct CooldownEntry {
    pub executed_at_ms: i64,
    pub is_protective: bool,
}

/// Per-seat cooldown state.
pub struct CooldownTracker {
    entries: RwLock<HashMap<(String, Direction), CooldownEntry>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record an executed close. Later executions overwrite earlier ones.
    pub fn record(&self, symbol: &str, direction: Direction, executed_at_ms: i64, protective: bool) {
        debug!(symbol, direction = %direction, protective, "cooldown recorded");
        self.entries.write().insert(
            (symbol.to_string(), direction),
            CooldownEntry {
                executed_at_ms,
                is_protective: protective,
            },
        );
    }

    /// Milliseconds of cooldown remaining for a seat; 0 when clear.
    pub fn remaining_ms(
        &self,
        symbol: &str,
        direction: Direction,
        rule: &CooldownRule,
        now_ms: i64,
    ) -> i64 {
        let Some(entry) = self
            .entries
            .read()
            .get(&(symbol.to_string(), direction))
            .copied()
        else {
            return 0;
        };

        let elapsed = now_ms - entry.executed_at_ms;
        match rule {
            CooldownRule::None => 0,
            CooldownRule::Minutes(m) => ((*m as i64) * 60_000 - elapsed).max(0),
            CooldownRule::HalfDay => (12 * 3_600_000 - elapsed).max(0),
            CooldownRule::OneDay => {
                (hktime::next_hk_midnight_ms(entry.executed_at_ms) - now_ms).max(0)
            }
        }
    }

    /// Whether an entry is currently blocked.
    pub fn is_blocked(
        &self,
        symbol: &str,
        direction: Direction,
        rule: &CooldownRule,
        now_ms: i64,
    ) -> bool {
        self.remaining_ms(symbol, direction, rule, now_ms) > 0
    }

    /// Rebuild today's cooldowns from the trade log (post-restart).
    /// Only sell records count — a sell is what closes a position.
    pub fn hydrate_from_log(&self, log: &TradeLog, day_key: &str) {
        let records = match log.read_day(day_key) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "cooldown hydration failed — starting cold");
                return;
            }
        };

        let mut hydrated = 0usize;
        for r in &records {
            if r.side != OrderSide::Sell {
                continue;
            }
            let Some(direction) = r.direction else {
                continue;
            };
            self.record(
                &r.symbol,
                direction,
                r.executed_at_ms,
                r.is_protective_clearance,
            );
            hydrated += 1;
        }
        if hydrated > 0 {
            info!(hydrated, day = day_key, "cooldowns hydrated from trade log");
        }
    }

    /// Drop every entry (midnight clear).
    pub fn clear_all(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}
