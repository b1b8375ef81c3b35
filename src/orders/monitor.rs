// =============================================================================
// Order Monitor — tracked-order timeouts, price chasing, push handling
// =============================================================================
//
// Every submitted order is tracked here until a terminal push arrives. On
// each quotes tick the monitor:
//
//   1. Cancels buy orders that exceeded their timeout.
//   2. Converts timed-out sell orders to market orders for the remaining
//      quantity, carrying the related-buy assignment across.
//   3. Chases the market on replaceable limit orders whose submitted price
//      drifted beyond the threshold.
//
// Push handling is idempotent per (order id, terminal status): duplicate or
// out-of-order pushes after Filled/Cancelled never mutate state again.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{MonitorConfig, OrderLifecycleConfig};
use crate::longport::types::{OrderChangedEvent, SubmitOrderOptions};
use crate::longport::TradeTransport;
use crate::refresh::{FillBus, FillNotice};
use crate::types::{Direction, OrderRecord, OrderSide, OrderStatus, OrderType, PendingOrder};

use super::ownership::resolve_order_ownership;
use super::recorder::OrderRecorder;

/// Upper bound on remembered terminal order ids.
const TERMINAL_MEMORY: usize = 2048;

/// One order under management.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub submitted_price: f64,
    pub submitted_qty: u64,
    pub executed_qty: u64,
    pub status: OrderStatus,
    pub submitted_at_ms: i64,
    pub last_price_update_ms: i64,
    pub converted_to_market: bool,
    pub is_protective_clearance: bool,
}

impl TrackedOrder {
    pub fn remaining_qty(&self) -> u64 {
        self.submitted_qty.saturating_sub(self.executed_qty)
    }
}

/// Outcome of the sell-merge decision for a new sell signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SellMergeDecision {
    /// New quantity is zero — nothing to do.
    Skip,
    /// No pending sells — submit the new order as-is.
    Submit,
    /// Exactly one well-behaved pending sell — replace it with the merged
    /// quantity at the new price.
    Replace { order_id: String, merged_qty: u64 },
    /// Pending set cannot be replaced in place — cancel everything and
    /// submit one merged order.
    CancelAndSubmit {
        cancel_ids: Vec<String>,
        merged_qty: u64,
    },
}

struct Inner {
    tracked: HashMap<String, TrackedOrder>,
    /// Terminal statuses already applied, for push idempotence.
    terminal: HashMap<String, OrderStatus>,
    terminal_order: VecDeque<String>,
}

/// The order lifecycle manager.
pub struct OrderMonitor {
    trade: Arc<dyn TradeTransport>,
    recorder: Arc<OrderRecorder>,
    config: OrderLifecycleConfig,
    monitors: Vec<MonitorConfig>,
    fills: Arc<FillBus>,
    inner: RwLock<Inner>,
}

impl OrderMonitor {
    pub fn new(
        trade: Arc<dyn TradeTransport>,
        recorder: Arc<OrderRecorder>,
        config: OrderLifecycleConfig,
        monitors: Vec<MonitorConfig>,
        fills: Arc<FillBus>,
    ) -> Self {
        Self {
            trade,
            recorder,
            config,
            monitors,
            fills,
            inner: RwLock::new(Inner {
                tracked: HashMap::new(),
                terminal: HashMap::new(),
                terminal_order: VecDeque::new(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Tracking
    // -------------------------------------------------------------------------

    /// Register an order for quote-driven management.
    pub fn track_order(&self, order: TrackedOrder) {
        debug!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = %order.side,
            qty = order.submitted_qty,
            "order tracked"
        );
        self.inner
            .write()
            .tracked
            .insert(order.order_id.clone(), order);
    }

    pub fn tracked_order(&self, order_id: &str) -> Option<TrackedOrder> {
        self.inner.read().tracked.get(order_id).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.read().tracked.len()
    }

    /// Active pending sells for a symbol, sorted by submit time.
    pub fn get_pending_sell_orders(&self, symbol: &str) -> Vec<PendingOrder> {
        let inner = self.inner.read();
        let mut pending: Vec<PendingOrder> = inner
            .tracked
            .values()
            .filter(|t| {
                t.side == OrderSide::Sell && t.symbol == symbol && t.status.is_active_pending()
            })
            .map(|t| PendingOrder {
                order_id: t.order_id.clone(),
                side: t.side,
                submitted_price: t.submitted_price,
                submitted_qty: t.submitted_qty,
                executed_qty: t.executed_qty,
                status: t.status,
                order_type: t.order_type,
                submitted_at_ms: t.submitted_at_ms,
            })
            .collect();
        pending.sort_by_key(|p| p.submitted_at_ms);
        pending
    }

    /// Cancel every active tracked order for `symbol`, optionally filtered
    /// by side. Transport failures leave the order tracked for the next
    /// attempt. Returns the number of successful cancels.
    pub async fn cancel_pending(&self, symbol: &str, side: Option<OrderSide>) -> usize {
        let targets: Vec<TrackedOrder> = {
            let inner = self.inner.read();
            inner
                .tracked
                .values()
                .filter(|t| {
                    t.symbol == symbol
                        && t.status.is_active_pending()
                        && side.map_or(true, |s| t.side == s)
                })
                .cloned()
                .collect()
        };

        let mut cancelled = 0usize;
        for order in targets {
            match self.trade.cancel_order(&order.order_id).await {
                Ok(()) => {
                    if order.side == OrderSide::Sell {
                        self.recorder.mark_sell_cancelled(&order.order_id);
                    }
                    self.untrack(&order.order_id, OrderStatus::Canceled);
                    cancelled += 1;
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "cancel failed — will retry");
                }
            }
        }
        cancelled
    }

    /// Apply a successful replace request to the tracked snapshot.
    pub fn apply_replace(&self, order_id: &str, qty: u64, price: f64, now_ms: i64) {
        let mut inner = self.inner.write();
        if let Some(t) = inner.tracked.get_mut(order_id) {
            t.submitted_qty = qty;
            t.submitted_price = price;
            t.last_price_update_ms = now_ms;
        }
    }

    /// Cancel one tracked order via the broker. On success the order is
    /// untracked and, for sells, the related buy ids are handed back for
    /// reassignment. A transport failure leaves everything untouched.
    pub async fn cancel_tracked(&self, order_id: &str) -> anyhow::Result<Vec<String>> {
        let side = self.tracked_order(order_id).map(|t| t.side);
        self.trade.cancel_order(order_id).await?;

        let related = if side == Some(OrderSide::Sell) {
            self.recorder.mark_sell_cancelled(order_id)
        } else {
            Vec::new()
        };
        self.untrack(order_id, OrderStatus::Canceled);
        Ok(related)
    }

    /// Cancel every active buy order regardless of symbol (doomsday
    /// pre-close sweep). Returns the number of successful cancels.
    pub async fn cancel_all_pending_buys(&self) -> usize {
        let targets: Vec<String> = {
            let inner = self.inner.read();
            inner
                .tracked
                .values()
                .filter(|t| t.side == OrderSide::Buy && t.status.is_active_pending())
                .map(|t| t.order_id.clone())
                .collect()
        };

        let mut cancelled = 0usize;
        for order_id in targets {
            match self.trade.cancel_order(&order_id).await {
                Ok(()) => {
                    self.untrack(&order_id, OrderStatus::Canceled);
                    cancelled += 1;
                }
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "pre-close buy cancel failed");
                }
            }
        }
        cancelled
    }

    // -------------------------------------------------------------------------
    // Quote-driven tick
    // -------------------------------------------------------------------------

    /// One pass over all tracked orders with the latest quotes.
    pub async fn process_with_latest_quotes(&self, quotes: &HashMap<String, f64>, now_ms: i64) {
        let snapshot: Vec<TrackedOrder> = {
            let inner = self.inner.read();
            inner
                .tracked
                .values()
                .filter(|t| t.status.is_active_pending())
                .cloned()
                .collect()
        };

        for order in snapshot {
            // Re-check liveness; a push may have untracked it mid-pass.
            if self.tracked_order(&order.order_id).is_none() {
                continue;
            }

            let handled = match order.side {
                OrderSide::Buy => self.handle_buy_timeout(&order, now_ms).await,
                OrderSide::Sell => self.handle_sell_timeout(&order, now_ms).await,
            };
            if handled {
                continue;
            }

            self.maybe_replace_price(&order, quotes, now_ms).await;
        }
    }

    /// Cancel a timed-out buy. Returns true when the order was dealt with.
    async fn handle_buy_timeout(&self, order: &TrackedOrder, now_ms: i64) -> bool {
        let age_ms = now_ms - order.submitted_at_ms;
        if age_ms < (self.config.buy_timeout_secs * 1000) as i64 {
            return false;
        }

        info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            age_ms,
            "buy timeout — cancelling"
        );
        match self.trade.cancel_order(&order.order_id).await {
            Ok(()) => {
                self.untrack(&order.order_id, OrderStatus::Canceled);
                true
            }
            Err(e) => {
                // Not assumed cancelled; retried next tick.
                warn!(order_id = %order.order_id, error = %e, "buy cancel failed");
                true
            }
        }
    }

    /// Cancel a timed-out sell and resubmit the remainder as a market order.
    /// Returns true when the order was dealt with this tick.
    async fn handle_sell_timeout(&self, order: &TrackedOrder, now_ms: i64) -> bool {
        if order.converted_to_market {
            return false;
        }
        let age_ms = now_ms - order.submitted_at_ms;
        if age_ms < (self.config.sell_timeout_secs * 1000) as i64 {
            return false;
        }

        info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            age_ms,
            "sell timeout — converting to market order"
        );

        if let Err(e) = self.trade.cancel_order(&order.order_id).await {
            warn!(order_id = %order.order_id, error = %e, "sell cancel failed — retry next tick");
            return true;
        }

        // Reclaim the related-buy assignment for the replacement order.
        let mut related = self.recorder.mark_sell_cancelled(&order.order_id);
        let remaining = order.remaining_qty();
        if related.is_empty() {
            related = self.recorder.allocate_related_buy_ids_for_recovery(
                &order.symbol,
                order.direction,
                remaining,
            );
        }
        self.untrack(&order.order_id, OrderStatus::Canceled);

        if remaining == 0 {
            return true;
        }

        let submit = self
            .trade
            .submit_order(SubmitOrderOptions {
                symbol: order.symbol.clone(),
                side: OrderSide::Sell,
                order_type: OrderType::Mo,
                submitted_qty: remaining,
                submitted_price: None,
                remark: Some("sell-timeout-conversion".to_string()),
            })
            .await;

        match submit {
            Ok(resp) => {
                self.recorder.submit_sell_order(
                    &resp.order_id,
                    &order.symbol,
                    order.direction,
                    remaining,
                    related,
                );
                self.track_order(TrackedOrder {
                    order_id: resp.order_id.clone(),
                    symbol: order.symbol.clone(),
                    direction: order.direction,
                    side: OrderSide::Sell,
                    order_type: OrderType::Mo,
                    submitted_price: 0.0,
                    submitted_qty: remaining,
                    executed_qty: 0,
                    status: OrderStatus::New,
                    submitted_at_ms: now_ms,
                    last_price_update_ms: now_ms,
                    converted_to_market: true,
                    is_protective_clearance: order.is_protective_clearance,
                });
                info!(
                    old_order_id = %order.order_id,
                    new_order_id = %resp.order_id,
                    qty = remaining,
                    "market-order replacement submitted"
                );
            }
            Err(e) => {
                warn!(
                    order_id = %order.order_id,
                    error = %e,
                    "market-order replacement failed — lots remain for recovery"
                );
            }
        }
        true
    }

    /// Chase the market with a replace-price request when allowed.
    async fn maybe_replace_price(
        &self,
        order: &TrackedOrder,
        quotes: &HashMap<String, f64>,
        now_ms: i64,
    ) {
        if !order.order_type.is_replaceable()
            || order.status.is_replace_blocked()
            || order.converted_to_market
        {
            return;
        }
        if now_ms - order.last_price_update_ms < self.config.price_update_interval_ms as i64 {
            return;
        }
        let Some(&quote) = quotes.get(&order.symbol) else {
            return;
        };
        if quote <= 0.0 || (quote - order.submitted_price).abs() < self.config.price_replace_threshold
        {
            return;
        }

        debug!(
            order_id = %order.order_id,
            from = order.submitted_price,
            to = quote,
            "replacing order price"
        );
        let result = self
            .trade
            .replace_order(crate::longport::types::ReplaceOrderOptions {
                order_id: order.order_id.clone(),
                quantity: order.submitted_qty,
                price: quote,
            })
            .await;

        match result {
            Ok(()) => {
                let mut inner = self.inner.write();
                if let Some(t) = inner.tracked.get_mut(&order.order_id) {
                    t.submitted_price = quote;
                    t.last_price_update_ms = now_ms;
                }
            }
            Err(e) => {
                warn!(order_id = %order.order_id, error = %e, "price replace failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Push handling
    // -------------------------------------------------------------------------

    /// Apply one order-changed push. Terminal statuses are applied exactly
    /// once; later duplicates and out-of-order non-terminal pushes are
    /// dropped.
    pub fn handle_order_changed(&self, event: &OrderChangedEvent) {
        {
            let inner = self.inner.read();
            if inner.terminal.contains_key(&event.order_id) {
                debug!(order_id = %event.order_id, status = %event.status, "push after terminal — ignored");
                return;
            }
        }

        match event.status {
            OrderStatus::Filled => self.apply_fill(event),
            OrderStatus::PartialFilled => self.apply_partial(event),
            OrderStatus::Canceled | OrderStatus::Rejected => self.apply_cancel(event),
            _ => {
                // Intermediate statuses just refresh the tracked snapshot.
                let mut inner = self.inner.write();
                if let Some(t) = inner.tracked.get_mut(&event.order_id) {
                    t.status = event.status;
                    t.executed_qty = t.executed_qty.max(event.executed_qty);
                }
            }
        }
    }

    fn apply_fill(&self, event: &OrderChangedEvent) {
        let tracked = self.tracked_order(&event.order_id);
        let side = tracked.as_ref().map(|t| t.side).unwrap_or(event.side);
        let direction = tracked.as_ref().map(|t| t.direction).or_else(|| {
            resolve_order_ownership(&event.stock_name, &self.monitors).map(|(_, d)| d)
        });
        let is_protective = tracked
            .as_ref()
            .map(|t| t.is_protective_clearance)
            .unwrap_or(false);

        match side {
            OrderSide::Buy => {
                if let Some(direction) = direction {
                    self.recorder.record_filled_buy(
                        direction,
                        OrderRecord {
                            order_id: event.order_id.clone(),
                            symbol: event.symbol.clone(),
                            executed_price: event.executed_price,
                            executed_qty: event.executed_qty,
                            executed_at_ms: event.updated_at_ms,
                            submitted_at_ms: None,
                            updated_at_ms: Some(event.updated_at_ms),
                        },
                    );
                } else {
                    warn!(
                        order_id = %event.order_id,
                        stock_name = %event.stock_name,
                        "buy fill with unresolvable ownership — not recorded"
                    );
                }
            }
            OrderSide::Sell => {
                let known = self
                    .recorder
                    .mark_sell_filled(
                        &event.order_id,
                        event.executed_qty,
                        event.executed_price,
                        event.updated_at_ms,
                    )
                    .is_some();
                if !known {
                    if let Some(direction) = direction {
                        self.recorder.record_local_sell(
                            &event.symbol,
                            direction,
                            event.executed_qty,
                            event.executed_price,
                            event.updated_at_ms,
                        );
                    }
                }
            }
        }

        self.untrack(&event.order_id, OrderStatus::Filled);

        let notice = FillNotice {
            order_id: event.order_id.clone(),
            symbol: event.symbol.clone(),
            stock_name: event.stock_name.clone(),
            side,
            direction,
            executed_qty: event.executed_qty,
            executed_price: event.executed_price,
            executed_at_ms: event.updated_at_ms,
            is_protective_clearance: is_protective,
        };
        if !self.fills.publish(notice) {
            warn!("fill consumer dropped — post-trade refresh skipped");
        }
    }

    fn apply_partial(&self, event: &OrderChangedEvent) {
        let mut inner = self.inner.write();
        if let Some(t) = inner.tracked.get_mut(&event.order_id) {
            t.status = OrderStatus::PartialFilled;
            t.executed_qty = t.executed_qty.max(event.executed_qty);
        }
        drop(inner);

        if event.side == OrderSide::Sell {
            self.recorder
                .mark_sell_partial_filled(&event.order_id, event.executed_qty);
        }
    }

    fn apply_cancel(&self, event: &OrderChangedEvent) {
        if event.side == OrderSide::Sell {
            self.recorder.mark_sell_cancelled(&event.order_id);
        }
        self.untrack(&event.order_id, event.status);
        debug!(order_id = %event.order_id, status = %event.status, "order closed by push");
    }

    /// Remove from tracking and remember the terminal status.
    fn untrack(&self, order_id: &str, status: OrderStatus) {
        let mut inner = self.inner.write();
        inner.tracked.remove(order_id);
        if inner.terminal.insert(order_id.to_string(), status).is_none() {
            inner.terminal_order.push_back(order_id.to_string());
            while inner.terminal_order.len() > TERMINAL_MEMORY {
                if let Some(old) = inner.terminal_order.pop_front() {
                    inner.terminal.remove(&old);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Sell-merge decision
    // -------------------------------------------------------------------------

    /// Decide how a new sell interacts with the symbol's open pending sells.
    pub fn decide_sell_merge(
        new_qty: u64,
        new_order_type: OrderType,
        is_protective_liquidation: bool,
        pending: &[PendingOrder],
    ) -> SellMergeDecision {
        if new_qty == 0 {
            return SellMergeDecision::Skip;
        }
        if pending.is_empty() {
            return SellMergeDecision::Submit;
        }

        let pending_remaining: u64 = pending.iter().map(PendingOrder::remaining_qty).sum();
        let merged_qty = new_qty + pending_remaining;

        let any_type_mismatch = pending.iter().any(|p| p.order_type != new_order_type);
        let any_blocked_status = pending.iter().any(|p| p.status.is_replace_blocked());
        let any_non_replaceable_type = pending.iter().any(|p| !p.order_type.is_replaceable());

        if is_protective_liquidation
            || pending.len() > 1
            || any_type_mismatch
            || any_blocked_status
            || any_non_replaceable_type
        {
            return SellMergeDecision::CancelAndSubmit {
                cancel_ids: pending.iter().map(|p| p.order_id.clone()).collect(),
                merged_qty,
            };
        }

        SellMergeDecision::Replace {
            order_id: pending[0].order_id.clone(),
            merged_qty,
        }
    }
}
