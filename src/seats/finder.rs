// =============================================================================
// Auto-Symbol Finder — picking the best live warrant for a seat
// =============================================================================
//
// Candidate selection over the broker's warrant list:
//
//   1. Expiry buckets derived from the monitor's `expiry_min_months` floor.
//   2. Keep status=Normal rows with a positive recall price and
//      to-call-price.
//   3. Signed-distance filter: bulls above their (positive) minimum, bears
//      below their (negative) minimum.
//   4. Turnover filter, active only once the session is past the post-open
//      delay: `turnover ≥ min_turnover_per_minute × trading_minutes`.
//   5. Order by |distance| ascending (closer to recall ⇒ higher gearing),
//      tie-break by turnover-per-minute descending.
//
// Warrant lists are served from a ~3 s TTL cache with per-key in-flight
// dedup so a burst of seat refreshes produces a single broker call.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::hktime;
use crate::longport::types::{derive_expiry_filters, ExpiryFilter, WarrantInfo, WarrantStatus, WarrantType};
use crate::longport::QuoteTransport;
use crate::risk::distance::signed_distance_pct;
use crate::types::Direction;

/// Warrant-list cache TTL.
const CACHE_TTL: Duration = Duration::from_secs(3);

type CacheKey = (String, WarrantType, Vec<ExpiryFilter>);

struct CacheEntry {
    at: Instant,
    rows: Arc<Vec<WarrantInfo>>,
}

/// TTL cache with per-key in-flight dedup.
pub struct WarrantListCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl WarrantListCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Serve from cache when fresh; otherwise fetch, with concurrent callers
    /// for the same key serialised behind one request.
    pub async fn get_or_fetch(
        &self,
        quote: &dyn QuoteTransport,
        monitor: &str,
        warrant_type: WarrantType,
        expiry: Vec<ExpiryFilter>,
    ) -> Result<Arc<Vec<WarrantInfo>>> {
        let key: CacheKey = (monitor.to_string(), warrant_type, expiry.clone());

        if let Some(rows) = self.fresh(&key) {
            return Ok(rows);
        }

        // Per-key async lock: the first caller fetches, the rest find the
        // fresh cache entry when the lock frees up.
        let gate = {
            let mut in_flight = self.in_flight.lock();
            in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        if let Some(rows) = self.fresh(&key) {
            return Ok(rows);
        }

        let rows = Arc::new(quote.warrant_list(monitor, warrant_type, &expiry).await?);
        debug!(
            monitor,
            warrant_type = %warrant_type,
            count = rows.len(),
            "warrant list fetched into cache"
        );
        self.entries.lock().insert(
            key,
            CacheEntry {
                at: Instant::now(),
                rows: rows.clone(),
            },
        );
        Ok(rows)
    }

    fn fresh(&self, key: &CacheKey) -> Option<Arc<Vec<WarrantInfo>>> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|e| e.at.elapsed() < CACHE_TTL)
            .map(|e| e.rows.clone())
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for WarrantListCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Finder
// =============================================================================

/// Stateless candidate selection over a cached warrant list.
pub struct AutoSymbolFinder {
    cache: WarrantListCache,
}

impl AutoSymbolFinder {
    pub fn new() -> Self {
        Self {
            cache: WarrantListCache::new(),
        }
    }

    pub fn cache(&self) -> &WarrantListCache {
        &self.cache
    }

    /// Find the best candidate for a seat, or `None` when nothing qualifies.
    ///
    /// `exclusions` carries the same-day suppression set: symbols switched
    /// away from today must not be re-adopted.
    pub async fn find_best_warrant(
        &self,
        quote: &dyn QuoteTransport,
        cfg: &MonitorConfig,
        direction: Direction,
        underlying_price: f64,
        now_ms: i64,
        is_half_day: bool,
        exclusions: &HashSet<String>,
    ) -> Result<Option<WarrantInfo>> {
        let warrant_type = if direction.is_long() {
            WarrantType::Bull
        } else {
            WarrantType::Bear
        };
        let expiry = derive_expiry_filters(cfg.auto_search.expiry_min_months);

        let rows = self
            .cache
            .get_or_fetch(quote, &cfg.symbol, warrant_type, expiry)
            .await?;

        let candidates = Self::select(
            &rows,
            cfg,
            direction,
            underlying_price,
            now_ms,
            is_half_day,
            exclusions,
        );

        match candidates.first() {
            Some(best) => {
                info!(
                    monitor = %cfg.symbol,
                    direction = %direction,
                    symbol = %best.symbol,
                    call_price = best.call_price,
                    "warrant search picked a candidate"
                );
                Ok(Some(best.clone()))
            }
            None => {
                debug!(monitor = %cfg.symbol, direction = %direction, "warrant search found no candidate");
                Ok(None)
            }
        }
    }

    /// Pure filter + ordering, separated for testability.
    fn select(
        rows: &[WarrantInfo],
        cfg: &MonitorConfig,
        direction: Direction,
        underlying_price: f64,
        now_ms: i64,
        is_half_day: bool,
        exclusions: &HashSet<String>,
    ) -> Vec<WarrantInfo> {
        let min_distance = if direction.is_long() {
            cfg.auto_search.long_min_distance_pct
        } else {
            cfg.auto_search.short_min_distance_pct
        };

        let minutes = hktime::trading_minutes_since_open(now_ms, is_half_day);
        let turnover_active = minutes > cfg.auto_search.post_open_delay_minutes
            && cfg.auto_search.min_turnover_per_minute > 0.0;
        let min_turnover = cfg.auto_search.min_turnover_per_minute * minutes as f64;

        let mut scored: Vec<(f64, f64, WarrantInfo)> = rows
            .iter()
            .filter(|w| w.status == WarrantStatus::Normal)
            .filter(|w| w.call_price > 0.0 && w.to_call_price > 0.0)
            .filter(|w| !exclusions.contains(&w.symbol))
            .filter_map(|w| {
                let distance = signed_distance_pct(underlying_price, w.call_price)?;
                let keep = if direction.is_long() {
                    distance > min_distance
                } else {
                    distance < min_distance
                };
                if !keep {
                    return None;
                }
                if turnover_active && w.turnover < min_turnover {
                    return None;
                }
                let per_minute = if minutes > 0 {
                    w.turnover / minutes as f64
                } else {
                    w.turnover
                };
                Some((distance.abs(), per_minute, w.clone()))
            })
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
        });

        scored.into_iter().map(|(_, _, w)| w).collect()
    }
}

impl Default for AutoSymbolFinder {
    fn default() -> Self {
        Self::new()
    }
}
