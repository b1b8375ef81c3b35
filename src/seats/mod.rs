// =============================================================================
// Seat Registry — binding (monitor, direction) slots to live warrants
// =============================================================================
//
// A seat is the slot holding the currently-active warrant for one side of a
// monitor. The registry exclusively owns all seat entries and enforces the
// state machine:
//
//   EMPTY ⇄ SEARCHING → READY → SWITCHING → SEARCHING → …
//
// Version discipline: every change of the bound symbol strictly increments
// the seat version. Signals and tasks carry the version observed at
// emission; consumers drop anything stale. A seat is usable for trading iff
// it is READY with a symbol and not frozen for today.
// =============================================================================

pub mod finder;
pub mod switcher;

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::types::Direction;

/// Seat lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeatStatus {
    Empty,
    Searching,
    Ready,
    Switching,
}

impl std::fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Empty => "EMPTY",
            Self::Searching => "SEARCHING",
            Self::Ready => "READY",
            Self::Switching => "SWITCHING",
        };
        write!(f, "{s}")
    }
}

/// One seat entry.
#[derive(Debug, Clone, Serialize)]
pub struct Seat {
    pub symbol: Option<String>,
    pub status: SeatStatus,
    /// Monotonically increasing; bumped on every symbol change.
    pub version: u64,
    pub recall_price: Option<f64>,
    pub last_switch_ms: Option<i64>,
    pub last_search_ms: Option<i64>,
    pub last_ready_ms: Option<i64>,
    pub search_fail_count_today: u32,
    /// Non-null ⇒ frozen for that HK date; no further searches until the
    /// midnight clear.
    pub frozen_trading_day_key: Option<String>,
}

impl Seat {
    fn new_empty() -> Self {
        Self {
            symbol: None,
            status: SeatStatus::Empty,
            version: 1,
            recall_price: None,
            last_switch_ms: None,
            last_search_ms: None,
            last_ready_ms: None,
            search_fail_count_today: 0,
            frozen_trading_day_key: None,
        }
    }

    /// Usable for trading: READY with a symbol and not frozen.
    pub fn is_usable(&self) -> bool {
        self.status == SeatStatus::Ready
            && self.symbol.as_deref().map_or(false, |s| !s.is_empty())
            && self.frozen_trading_day_key.is_none()
    }
}

/// Lightweight seat view handed to the strategy and processors.
#[derive(Debug, Clone, Serialize)]
pub struct SeatSnapshot {
    pub symbol: Option<String>,
    pub version: u64,
    pub usable: bool,
    pub direction: Direction,
    pub recall_price: Option<f64>,
}

/// The seat registry. One instance per engine.
pub struct SeatRegistry {
    seats: RwLock<HashMap<(String, Direction), Seat>>,
}

impl SeatRegistry {
    pub fn new() -> Self {
        Self {
            seats: RwLock::new(HashMap::new()),
        }
    }

    /// Create both seats for a monitor. Auto-search monitors start EMPTY and
    /// find their own warrants; static monitors start READY on the
    /// configured codes.
    pub fn init_monitor(&self, cfg: &MonitorConfig, now_ms: i64) {
        let mut seats = self.seats.write();
        for direction in Direction::both() {
            let static_symbol = match direction {
                Direction::Long => cfg.long_symbol.clone(),
                Direction::Short => cfg.short_symbol.clone(),
            };

            let mut seat = Seat::new_empty();
            if !cfg.auto_search.enabled {
                if let Some(symbol) = static_symbol.filter(|s| !s.is_empty()) {
                    seat.symbol = Some(symbol);
                    seat.status = SeatStatus::Ready;
                    seat.last_ready_ms = Some(now_ms);
                }
            }

            info!(
                monitor = %cfg.symbol,
                direction = %direction,
                status = %seat.status,
                symbol = seat.symbol.as_deref().unwrap_or("-"),
                "seat initialised"
            );
            seats.insert((cfg.symbol.clone(), direction), seat);
        }
    }

    /// Clone of a seat entry.
    pub fn get(&self, monitor: &str, direction: Direction) -> Option<Seat> {
        self.seats
            .read()
            .get(&(monitor.to_string(), direction))
            .cloned()
    }

    /// View for strategy/processors.
    pub fn snapshot(&self, monitor: &str, direction: Direction) -> SeatSnapshot {
        match self.get(monitor, direction) {
            Some(seat) => SeatSnapshot {
                usable: seat.is_usable(),
                symbol: seat.symbol,
                version: seat.version,
                direction,
                recall_price: seat.recall_price,
            },
            None => SeatSnapshot {
                symbol: None,
                version: 0,
                usable: false,
                direction,
                recall_price: None,
            },
        }
    }

    /// Validate that a signal's captured (symbol, version) still matches the
    /// live seat and the seat is usable.
    pub fn validate_for_execution(
        &self,
        monitor: &str,
        direction: Direction,
        symbol: &str,
        version: u64,
    ) -> Result<(), String> {
        let Some(seat) = self.get(monitor, direction) else {
            return Err(format!("no seat for {monitor}/{direction}"));
        };
        if !seat.is_usable() {
            return Err(format!(
                "seat {monitor}/{direction} not usable (status={})",
                seat.status
            ));
        }
        if seat.symbol.as_deref() != Some(symbol) {
            return Err(format!(
                "seat symbol changed: signal={} seat={}",
                symbol,
                seat.symbol.as_deref().unwrap_or("-")
            ));
        }
        if seat.version != version {
            return Err(format!(
                "seat version changed: signal={} seat={}",
                version, seat.version
            ));
        }
        Ok(())
    }

    /// Bind a warrant to a seat and mark it READY. Bumps the version iff the
    /// symbol actually changed.
    pub fn bind_symbol(
        &self,
        monitor: &str,
        direction: Direction,
        symbol: &str,
        recall_price: Option<f64>,
        now_ms: i64,
    ) -> u64 {
        let mut seats = self.seats.write();
        let seat = seats
            .entry((monitor.to_string(), direction))
            .or_insert_with(Seat::new_empty);

        if seat.symbol.as_deref() != Some(symbol) {
            seat.version += 1;
        }
        seat.symbol = Some(symbol.to_string());
        seat.recall_price = recall_price;
        seat.status = SeatStatus::Ready;
        seat.last_ready_ms = Some(now_ms);

        info!(
            monitor,
            direction = %direction,
            symbol,
            version = seat.version,
            "seat bound and READY"
        );
        seat.version
    }

    /// Move a seat into SEARCHING (from EMPTY, or after a clear).
    pub fn begin_search(&self, monitor: &str, direction: Direction, now_ms: i64) {
        let mut seats = self.seats.write();
        if let Some(seat) = seats.get_mut(&(monitor.to_string(), direction)) {
            seat.status = SeatStatus::Searching;
            seat.last_search_ms = Some(now_ms);
        }
    }

    /// Record a failed search: back to EMPTY, failure count up, freeze for
    /// the day once the cap is reached.
    pub fn mark_search_failed(
        &self,
        monitor: &str,
        direction: Direction,
        max_failures: u32,
        day_key: &str,
    ) {
        let mut seats = self.seats.write();
        if let Some(seat) = seats.get_mut(&(monitor.to_string(), direction)) {
            seat.status = SeatStatus::Empty;
            seat.search_fail_count_today += 1;
            if seat.search_fail_count_today >= max_failures {
                seat.frozen_trading_day_key = Some(day_key.to_string());
                warn!(
                    monitor,
                    direction = %direction,
                    failures = seat.search_fail_count_today,
                    "seat frozen for the day after repeated search failures"
                );
            } else {
                debug!(
                    monitor,
                    direction = %direction,
                    failures = seat.search_fail_count_today,
                    "warrant search failed"
                );
            }
        }
    }

    /// Enter SWITCHING: the seat keeps its old symbol (pending orders are
    /// being cancelled, a close may be in flight) but the version bump
    /// fences out every signal emitted before the switch.
    pub fn begin_switch(&self, monitor: &str, direction: Direction, now_ms: i64) -> u64 {
        let mut seats = self.seats.write();
        let Some(seat) = seats.get_mut(&(monitor.to_string(), direction)) else {
            return 0;
        };
        seat.status = SeatStatus::Switching;
        seat.version += 1;
        seat.last_switch_ms = Some(now_ms);
        info!(
            monitor,
            direction = %direction,
            symbol = seat.symbol.as_deref().unwrap_or("-"),
            version = seat.version,
            "seat SWITCHING"
        );
        seat.version
    }

    /// Drop the bound symbol (close confirmed) and move to SEARCHING.
    /// Bumps the version — the symbol changed from `Some` to `None`.
    pub fn clear_seat(&self, monitor: &str, direction: Direction, now_ms: i64) -> u64 {
        let mut seats = self.seats.write();
        let Some(seat) = seats.get_mut(&(monitor.to_string(), direction)) else {
            return 0;
        };
        if seat.symbol.is_some() {
            seat.version += 1;
        }
        seat.symbol = None;
        seat.recall_price = None;
        seat.status = SeatStatus::Searching;
        seat.last_search_ms = Some(now_ms);
        debug!(monitor, direction = %direction, version = seat.version, "seat cleared");
        seat.version
    }

    /// Refresh the cached recall price for a bound seat.
    pub fn update_recall_price(&self, monitor: &str, direction: Direction, recall_price: f64) {
        let mut seats = self.seats.write();
        if let Some(seat) = seats.get_mut(&(monitor.to_string(), direction)) {
            seat.recall_price = Some(recall_price);
        }
    }

    /// Midnight clear: unfreeze, reset failure counts, normalise transient
    /// states (a seat with a symbol returns READY, without one EMPTY).
    pub fn midnight_clear(&self) {
        let mut seats = self.seats.write();
        for seat in seats.values_mut() {
            seat.search_fail_count_today = 0;
            seat.frozen_trading_day_key = None;
            seat.status = if seat.symbol.is_some() {
                SeatStatus::Ready
            } else {
                SeatStatus::Empty
            };
        }
        info!("seat registry midnight clear complete");
    }

    /// Every bound symbol across all seats (for quote subscriptions).
    pub fn bound_symbols(&self) -> Vec<String> {
        self.seats
            .read()
            .values()
            .filter_map(|s| s.symbol.clone())
            .collect()
    }
}

impl Default for SeatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
