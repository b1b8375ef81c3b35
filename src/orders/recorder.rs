// =============================================================================
// Order Recorder — the engine's authoritative view of fills and held lots
// =============================================================================
//
// Exclusively owns the per-(warrant, direction) buy/sell record maps and the
// pending-sell bookkeeping. Everything else reaches these maps through
// value-taking method calls; no shared mutable references leave this module.
//
// Held lots are maintained incrementally: a confirmed sell removes its
// related buys; a rebuild replays the full broker history through the
// smart-close filtering engine.
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::hktime;
use crate::longport::types::RawOrder;
use crate::longport::TradeTransport;
use crate::types::{Direction, OrderRecord, OrderSide, OrderStatus};

use super::filtering;

/// Key for per-seat record maps.
pub type SeatKey = (String, Direction);

/// How long a fetched order snapshot stays fresh without `force`.
const FETCH_TTL_MS: i64 = 10_000;

/// How far back the history pagination reaches, days.
const HISTORY_LOOKBACK_DAYS: i64 = 30;

/// Bookkeeping for one in-flight sell order.
#[derive(Debug, Clone)]
pub struct SellTracking {
    pub symbol: String,
    pub direction: Direction,
    pub submitted_qty: u64,
    pub filled_qty: u64,
    /// The buy lots this sell is closing; reassigned on market-order
    /// conversion and consumed on fill.
    pub related_buy_ids: Vec<String>,
}

/// Buys and sells split out of a raw order snapshot.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedOrders {
    pub buys: Vec<OrderRecord>,
    pub sells: Vec<OrderRecord>,
}

struct Inner {
    /// Held (unrealized) buy lots per seat.
    buys: HashMap<SeatKey, Vec<OrderRecord>>,
    /// Locally observed sell fills per seat (today's activity).
    sells: HashMap<SeatKey, Vec<OrderRecord>>,
    /// In-flight sells keyed by broker order id.
    pending_sells: HashMap<String, SellTracking>,
}

/// The order recorder. One instance per engine, shared behind `Arc`.
pub struct OrderRecorder {
    inner: RwLock<Inner>,
    /// TTL cache of the last full broker snapshot.
    fetch_cache: Mutex<Option<(i64, Vec<RawOrder>)>>,
}

impl OrderRecorder {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                buys: HashMap::new(),
                sells: HashMap::new(),
                pending_sells: HashMap::new(),
            }),
            fetch_cache: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Broker snapshot
    // -------------------------------------------------------------------------

    /// Fetch every order (paged history plus today), merged and deduplicated.
    ///
    /// The merge prefers today's snapshot for an order present in both, and
    /// otherwise keeps whichever row carries the newer `updated_at`. A fresh
    /// snapshot is served from cache unless `force` is set.
    pub async fn fetch_all_orders(
        &self,
        trade: &dyn TradeTransport,
        force: bool,
    ) -> Result<Vec<RawOrder>> {
        let now = hktime::now_ms();

        if !force {
            let cache = self.fetch_cache.lock();
            if let Some((at, rows)) = cache.as_ref() {
                if now - at < FETCH_TTL_MS {
                    debug!(age_ms = now - at, "serving order snapshot from cache");
                    return Ok(rows.clone());
                }
            }
        }

        let start_at = now - HISTORY_LOOKBACK_DAYS * 24 * 3600 * 1000;
        let history = trade.history_orders(start_at).await?;
        let today = trade.today_orders().await?;

        let merged = Self::merge_order_snapshots(history, today);

        *self.fetch_cache.lock() = Some((now, merged.clone()));
        debug!(count = merged.len(), "order snapshot fetched");
        Ok(merged)
    }

    /// Merge history and today rows: today wins on conflict, otherwise the
    /// newer `updated_at` wins.
    fn merge_order_snapshots(history: Vec<RawOrder>, today: Vec<RawOrder>) -> Vec<RawOrder> {
        let mut by_id: HashMap<String, RawOrder> = HashMap::new();

        for row in history {
            match by_id.get(&row.order_id) {
                Some(existing) if existing.updated_at_ms >= row.updated_at_ms => {}
                _ => {
                    by_id.insert(row.order_id.clone(), row);
                }
            }
        }
        // Today's snapshot always supersedes the historical row.
        for row in today {
            by_id.insert(row.order_id.clone(), row);
        }

        let mut merged: Vec<RawOrder> = by_id.into_values().collect();
        merged.sort_by_key(|o| o.updated_at_ms);
        merged
    }

    /// Retain only fully filled rows with positive economics, split by side.
    pub fn classify_and_convert(raw: &[RawOrder]) -> ClassifiedOrders {
        let mut out = ClassifiedOrders::default();

        for row in raw {
            if row.status != OrderStatus::Filled {
                continue;
            }
            if row.executed_qty == 0 || row.executed_price <= 0.0 {
                continue;
            }
            let executed_at_ms = if row.updated_at_ms > 0 {
                row.updated_at_ms
            } else {
                row.submitted_at_ms
            };
            if executed_at_ms == 0 {
                continue;
            }

            let record = OrderRecord {
                order_id: row.order_id.clone(),
                symbol: row.symbol.clone(),
                executed_price: row.executed_price,
                executed_qty: row.executed_qty,
                executed_at_ms,
                submitted_at_ms: (row.submitted_at_ms > 0).then_some(row.submitted_at_ms),
                updated_at_ms: (row.updated_at_ms > 0).then_some(row.updated_at_ms),
            };

            match row.side {
                OrderSide::Buy => out.buys.push(record),
                OrderSide::Sell => out.sells.push(record),
            }
        }

        out
    }

    // -------------------------------------------------------------------------
    // Buy-side bookkeeping
    // -------------------------------------------------------------------------

    /// Record a confirmed buy fill as a newly held lot.
    pub fn record_filled_buy(&self, direction: Direction, record: OrderRecord) {
        let mut inner = self.inner.write();
        let key = (record.symbol.clone(), direction);
        debug!(
            symbol = %record.symbol,
            direction = %direction,
            qty = record.executed_qty,
            price = record.executed_price,
            "buy fill recorded"
        );
        inner.buys.entry(key).or_default().push(record);
    }

    /// Currently held buy lots for a seat.
    pub fn get_buy_orders_for_symbol(&self, symbol: &str, direction: Direction) -> Vec<OrderRecord> {
        self.inner
            .read()
            .buys
            .get(&(symbol.to_string(), direction))
            .cloned()
            .unwrap_or_default()
    }

    /// Total held quantity for a seat.
    pub fn held_qty(&self, symbol: &str, direction: Direction) -> u64 {
        self.get_buy_orders_for_symbol(symbol, direction)
            .iter()
            .map(|b| b.executed_qty)
            .sum()
    }

    /// Drop every held lot for a seat (doomsday clearance, seat switch).
    pub fn clear_buy_orders(&self, symbol: &str, direction: Direction) {
        let mut inner = self.inner.write();
        if inner.buys.remove(&(symbol.to_string(), direction)).is_some() {
            info!(symbol, direction = %direction, "held buy lots cleared");
        }
    }

    /// Replace a seat's held lots from a full broker replay: the surviving
    /// lots are whatever the smart-close filtering engine leaves.
    pub fn rebuild_seat(
        &self,
        symbol: &str,
        direction: Direction,
        buys: &[OrderRecord],
        sells: &[OrderRecord],
    ) {
        let held = filtering::unrealized_buy_orders(buys, sells);
        let mut inner = self.inner.write();
        let key = (symbol.to_string(), direction);
        debug!(
            symbol,
            direction = %direction,
            total_buys = buys.len(),
            held = held.len(),
            "seat lots rebuilt from broker history"
        );
        inner.buys.insert(key.clone(), held);
        inner.sells.insert(key, sells.to_vec());
    }

    /// Drop every record and pending entry (midnight clear).
    pub fn clear_all(&self) {
        let mut inner = self.inner.write();
        inner.buys.clear();
        inner.sells.clear();
        inner.pending_sells.clear();
        *self.fetch_cache.lock() = None;
        info!("order recorder cleared");
    }

    // -------------------------------------------------------------------------
    // Sell-side bookkeeping
    // -------------------------------------------------------------------------

    /// Register an in-flight sell with the buy lots it is closing.
    pub fn submit_sell_order(
        &self,
        order_id: &str,
        symbol: &str,
        direction: Direction,
        qty: u64,
        related_buy_ids: Vec<String>,
    ) {
        let mut inner = self.inner.write();
        inner.pending_sells.insert(
            order_id.to_string(),
            SellTracking {
                symbol: symbol.to_string(),
                direction,
                submitted_qty: qty,
                filled_qty: 0,
                related_buy_ids,
            },
        );
    }

    /// A sell fully filled: remove its related buys from the held set and
    /// record the sell. Returns the tracking entry, `None` for unknown ids.
    pub fn mark_sell_filled(
        &self,
        order_id: &str,
        filled_qty: u64,
        executed_price: f64,
        executed_at_ms: i64,
    ) -> Option<SellTracking> {
        let mut inner = self.inner.write();
        let mut tracking = inner.pending_sells.remove(order_id)?;
        tracking.filled_qty = filled_qty;

        let key = (tracking.symbol.clone(), tracking.direction);
        if let Some(lots) = inner.buys.get_mut(&key) {
            lots.retain(|b| !tracking.related_buy_ids.contains(&b.order_id));
        }
        inner.sells.entry(key).or_default().push(OrderRecord {
            order_id: order_id.to_string(),
            symbol: tracking.symbol.clone(),
            executed_price,
            executed_qty: filled_qty,
            executed_at_ms,
            submitted_at_ms: None,
            updated_at_ms: Some(executed_at_ms),
        });

        info!(
            order_id,
            symbol = %tracking.symbol,
            direction = %tracking.direction,
            qty = filled_qty,
            "sell fill recorded — related buys released"
        );
        Some(tracking)
    }

    /// A sell partially filled: update the running fill quantity only.
    pub fn mark_sell_partial_filled(&self, order_id: &str, filled_qty: u64) {
        let mut inner = self.inner.write();
        match inner.pending_sells.get_mut(order_id) {
            Some(t) => t.filled_qty = t.filled_qty.max(filled_qty),
            None => warn!(order_id, "partial fill for unknown sell — ignored"),
        }
    }

    /// A sell cancelled or rejected: drop the tracking entry and hand back
    /// the related buy ids so a replacement order can adopt them.
    pub fn mark_sell_cancelled(&self, order_id: &str) -> Vec<String> {
        let mut inner = self.inner.write();
        match inner.pending_sells.remove(order_id) {
            Some(t) => t.related_buy_ids,
            None => Vec::new(),
        }
    }

    /// Update an in-flight sell after a successful replace: new quantity and
    /// a fresh related-buy assignment.
    pub fn update_sell_order(&self, order_id: &str, qty: u64, related_buy_ids: Vec<String>) {
        let mut inner = self.inner.write();
        if let Some(t) = inner.pending_sells.get_mut(order_id) {
            t.submitted_qty = qty;
            t.related_buy_ids = related_buy_ids;
        }
    }

    /// Record a sell observed outside the pending-tracking path (rebuilds,
    /// manual activity).
    pub fn record_local_sell(
        &self,
        symbol: &str,
        direction: Direction,
        qty: u64,
        price: f64,
        executed_at_ms: i64,
    ) {
        let mut inner = self.inner.write();
        let key = (symbol.to_string(), direction);
        inner.sells.entry(key).or_default().push(OrderRecord {
            order_id: format!("local-{}", uuid::Uuid::new_v4()),
            symbol: symbol.to_string(),
            executed_price: price,
            executed_qty: qty,
            executed_at_ms,
            submitted_at_ms: None,
            updated_at_ms: Some(executed_at_ms),
        });
    }

    /// Pick held buy lots FIFO (oldest first) until `qty` is covered, for a
    /// recovery sell that lost its original related-buy assignment.
    pub fn allocate_related_buy_ids_for_recovery(
        &self,
        symbol: &str,
        direction: Direction,
        qty: u64,
    ) -> Vec<String> {
        let mut lots = self.get_buy_orders_for_symbol(symbol, direction);
        lots.sort_by_key(|b| b.executed_at_ms);

        let mut covered = 0u64;
        let mut ids = Vec::new();
        for lot in lots {
            if covered >= qty {
                break;
            }
            covered += lot.executed_qty;
            ids.push(lot.order_id);
        }
        ids
    }

    /// Snapshot of an in-flight sell's tracking entry.
    pub fn pending_sell(&self, order_id: &str) -> Option<SellTracking> {
        self.inner.read().pending_sells.get(order_id).cloned()
    }
}

impl Default for OrderRecorder {
    fn default() -> Self {
        Self::new()
    }
}
