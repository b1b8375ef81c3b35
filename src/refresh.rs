// =============================================================================
// Post-Trade Refresh — fill fan-out and the freshness gate
// =============================================================================
//
// Every confirmed fill is announced on an unbounded channel as a
// `FillNotice`. The post-trade refresher consumes notices sequentially:
// daily-loss accounting, cooldown recording, trade-log append, account /
// position / unrealized-loss cache refresh.
//
// `RefreshGate` provides the ordering guarantee risk checks rely on: a
// refresh enqueued at time T completes before any `wait_for_fresh` that
// started after T returns.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

use crate::types::{Direction, OrderSide};

/// Announcement of one confirmed fill.
#[derive(Debug, Clone)]
pub struct FillNotice {
    pub order_id: String,
    pub symbol: String,
    pub stock_name: String,
    pub side: OrderSide,
    /// Seat direction when known at submission time; resolved via ownership
    /// otherwise.
    pub direction: Option<Direction>,
    pub executed_qty: u64,
    pub executed_price: f64,
    pub executed_at_ms: i64,
    /// Set on doomsday clearance sells; consumed by the cooldown tracker.
    pub is_protective_clearance: bool,
}

/// Publisher side of the fill channel. Publishing stamps the refresh gate,
/// so `wait_for_fresh` callers observe every fill announced before they
/// asked.
pub struct FillBus {
    tx: tokio::sync::mpsc::UnboundedSender<FillNotice>,
    gate: std::sync::Arc<RefreshGate>,
}

impl FillBus {
    pub fn new(
        gate: std::sync::Arc<RefreshGate>,
    ) -> (
        std::sync::Arc<Self>,
        tokio::sync::mpsc::UnboundedReceiver<FillNotice>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (std::sync::Arc::new(Self { tx, gate }), rx)
    }

    /// Announce a fill. Returns false when the refresher is gone; the gate
    /// is balanced either way so waiters never wedge.
    pub fn publish(&self, notice: FillNotice) -> bool {
        self.gate.mark_enqueued();
        let ok = self.tx.send(notice).is_ok();
        if !ok {
            self.gate.mark_completed();
        }
        ok
    }

    pub fn gate(&self) -> &std::sync::Arc<RefreshGate> {
        &self.gate
    }
}

/// Sequenced completion gate between fill announcements and risk checks.
pub struct RefreshGate {
    enqueued: AtomicU64,
    completed: AtomicU64,
    notify: Notify,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Stamp a new refresh request; returns its sequence number.
    pub fn mark_enqueued(&self) -> u64 {
        self.enqueued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark one refresh as fully processed and wake waiters.
    pub fn mark_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait until every refresh enqueued before this call has completed.
    pub async fn wait_for_fresh(&self) {
        let target = self.enqueued.load(Ordering::SeqCst);
        loop {
            if self.completed.load(Ordering::SeqCst) >= target {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after arming to avoid a lost wakeup.
            if self.completed.load(Ordering::SeqCst) >= target {
                return;
            }
            notified.await;
        }
    }

    /// Number of refreshes still outstanding.
    pub fn outstanding(&self) -> u64 {
        self.enqueued
            .load(Ordering::SeqCst)
            .saturating_sub(self.completed.load(Ordering::SeqCst))
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}
