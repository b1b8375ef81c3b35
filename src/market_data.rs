// =============================================================================
// Market Data — quote book, trading calendar, K-line fingerprint cache
// =============================================================================
//
// Thin caches between the broker transport and the per-second loop:
//
// - `QuoteBook`: latest quote per symbol, fed by batch fetches and pushes.
// - `CalendarCache`: trading/half days from the broker calendar, with a
//   weekday fallback when the calendar has not loaded.
// - `KlineCache`: skips indicator recomputation when a monitor's K-lines
//   have not changed, using a `length_lastClose` fingerprint; also keeps the
//   previous snapshot for cross conditions.
// - `AccountCaches`: last-known account balance and positions, dropped by
//   the doomsday clearance and refreshed post-trade.
// =============================================================================

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::IndicatorPeriods;
use crate::indicators::{compute_snapshot, IndicatorSnapshot};
use crate::longport::types::{AccountBalance, QuoteSnapshot, StockPosition, TradingDays};
use crate::types::Kline;

// =============================================================================
// Quote book
// =============================================================================

/// Latest quote per symbol.
pub struct QuoteBook {
    quotes: RwLock<HashMap<String, QuoteSnapshot>>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
        }
    }

    pub fn update(&self, quote: QuoteSnapshot) {
        self.quotes.write().insert(quote.symbol.clone(), quote);
    }

    pub fn update_all(&self, quotes: Vec<QuoteSnapshot>) {
        let mut map = self.quotes.write();
        for q in quotes {
            map.insert(q.symbol.clone(), q);
        }
    }

    pub fn get(&self, symbol: &str) -> Option<QuoteSnapshot> {
        self.quotes.read().get(symbol).cloned()
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.quotes
            .read()
            .get(symbol)
            .map(|q| q.last_done)
            .filter(|p| *p > 0.0)
    }

    /// Price map for the order monitor's replace pass.
    pub fn price_map(&self) -> HashMap<String, f64> {
        self.quotes
            .read()
            .iter()
            .filter(|(_, q)| q.last_done > 0.0)
            .map(|(s, q)| (s.clone(), q.last_done))
            .collect()
    }

    pub fn clear(&self) {
        self.quotes.write().clear();
    }
}

impl Default for QuoteBook {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Trading calendar
// =============================================================================

struct CalendarInner {
    trading_days: HashSet<String>,
    half_days: HashSet<String>,
    loaded: bool,
}

/// Trading-calendar cache with a weekday fallback before first load.
pub struct CalendarCache {
    inner: RwLock<CalendarInner>,
}

impl CalendarCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CalendarInner {
                trading_days: HashSet::new(),
                half_days: HashSet::new(),
                loaded: false,
            }),
        }
    }

    /// Install a freshly fetched calendar.
    pub fn install(&self, days: TradingDays) {
        let mut inner = self.inner.write();
        inner.trading_days = days.trading_days.into_iter().collect();
        // Half days are trading days too.
        for d in &days.half_trading_days {
            inner.trading_days.insert(d.clone());
        }
        inner.half_days = days.half_trading_days.into_iter().collect();
        inner.loaded = true;
        debug!(
            trading_days = inner.trading_days.len(),
            half_days = inner.half_days.len(),
            "trading calendar installed"
        );
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().loaded
    }

    /// Whether `day_key` is a trading day. Falls back to Monday–Friday when
    /// the calendar never loaded (logged once per call site at warn).
    pub fn is_trading_day(&self, day_key: &str) -> bool {
        let inner = self.inner.read();
        if inner.loaded {
            return inner.trading_days.contains(day_key);
        }
        drop(inner);
        warn!(day_key, "trading calendar not loaded — weekday fallback");
        match NaiveDate::parse_from_str(day_key, "%Y-%m-%d") {
            Ok(date) => !matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
            Err(_) => false,
        }
    }

    pub fn is_half_day(&self, day_key: &str) -> bool {
        self.inner.read().half_days.contains(day_key)
    }
}

impl Default for CalendarCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// K-line fingerprint cache
// =============================================================================

/// Snapshot produced for a tick, with whether it is new this tick.
pub struct TickSnapshot {
    pub snapshot: IndicatorSnapshot,
    pub prev: Option<IndicatorSnapshot>,
    pub changed: bool,
}

struct KlineEntry {
    fingerprint: (usize, f64),
    current: IndicatorSnapshot,
    prev: Option<IndicatorSnapshot>,
}

/// Per-monitor indicator computation with change detection.
pub struct KlineCache {
    entries: RwLock<HashMap<String, KlineEntry>>,
}

impl KlineCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Compute (or reuse) the monitor's snapshot for this tick.
    ///
    /// When the `length_lastClose` fingerprint is unchanged, the previous
    /// snapshot is reused and `changed` is false; otherwise all configured
    /// indicators are recomputed and the prior snapshot is retained for
    /// cross conditions.
    pub fn snapshot_for(
        &self,
        monitor: &str,
        bars: &[Kline],
        periods: &IndicatorPeriods,
    ) -> Option<TickSnapshot> {
        let last_close = bars.last()?.close;
        let fingerprint = (bars.len(), last_close);

        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(monitor) {
                if entry.fingerprint == fingerprint {
                    return Some(TickSnapshot {
                        snapshot: entry.current.clone(),
                        prev: entry.prev.clone(),
                        changed: false,
                    });
                }
            }
        }

        let snapshot = compute_snapshot(bars, periods)?;
        let mut entries = self.entries.write();
        let prev = entries.remove(monitor).map(|e| e.current);
        entries.insert(
            monitor.to_string(),
            KlineEntry {
                fingerprint,
                current: snapshot.clone(),
                prev: prev.clone(),
            },
        );
        Some(TickSnapshot {
            snapshot,
            prev,
            changed: true,
        })
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for KlineCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Account / position caches
// =============================================================================

/// Last-known account state; `None` / empty until the first refresh.
pub struct AccountCaches {
    account: RwLock<Option<AccountBalance>>,
    positions: RwLock<Vec<StockPosition>>,
}

impl AccountCaches {
    pub fn new() -> Self {
        Self {
            account: RwLock::new(None),
            positions: RwLock::new(Vec::new()),
        }
    }

    pub fn set_account(&self, account: AccountBalance) {
        *self.account.write() = Some(account);
    }

    pub fn account(&self) -> Option<AccountBalance> {
        self.account.read().clone()
    }

    pub fn set_positions(&self, positions: Vec<StockPosition>) {
        *self.positions.write() = positions;
    }

    pub fn positions(&self) -> Vec<StockPosition> {
        self.positions.read().clone()
    }

    pub fn position_qty(&self, symbol: &str) -> u64 {
        self.positions
            .read()
            .iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }

    /// Doomsday clearance: drop both caches.
    pub fn clear(&self) {
        *self.account.write() = None;
        self.positions.write().clear();
    }
}

impl Default for AccountCaches {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch and install a fresh calendar spanning ±90 days.
pub async fn refresh_calendar(
    quote: &dyn crate::longport::QuoteTransport,
    calendar: &CalendarCache,
    now_ms: i64,
) -> Result<()> {
    let begin = crate::hktime::hk_date_key(now_ms - 90 * 24 * 3600 * 1000);
    let end = crate::hktime::hk_date_key(now_ms + 90 * 24 * 3600 * 1000);
    let days = quote.trading_days("HK", &begin, &end).await?;
    calendar.install(days);
    Ok(())
}
