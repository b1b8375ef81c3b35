// =============================================================================
// Task Queues — buy/sell FIFOs and the deduplicated monitor-task queue
// =============================================================================
//
// Buy and sell tasks flow through plain FIFO queues with subscriber
// notification; each has its own processor so the buy path's risk checks can
// never block sell execution.
//
// Monitor tasks (seat refresh, liquidation-distance check, unrealized-loss
// check) carry "only the latest matters" data: `schedule_latest` replaces a
// same-key task in place instead of growing the queue.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::signals::Signal;
use crate::types::Direction;

// =============================================================================
// FIFO queue
// =============================================================================

/// A FIFO task queue with async wakeups for its processor.
pub struct TaskQueue<T> {
    inner: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append a task and wake every waiting subscriber.
    pub fn push(&self, task: T) {
        self.inner.lock().push_back(task);
        self.notify.notify_waiters();
    }

    /// Pop the oldest task.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Remove every task matching `predicate`, invoking `on_remove` for each.
    pub fn remove_tasks(
        &self,
        predicate: impl Fn(&T) -> bool,
        mut on_remove: impl FnMut(T),
    ) -> usize {
        let mut inner = self.inner.lock();
        let mut kept = VecDeque::with_capacity(inner.len());
        let mut removed = 0usize;
        for task in inner.drain(..) {
            if predicate(&task) {
                on_remove(task);
                removed += 1;
            } else {
                kept.push_back(task);
            }
        }
        *inner = kept;
        removed
    }

    /// Drain everything, invoking `on_remove` for each task.
    pub fn clear_all(&self, mut on_remove: impl FnMut(T)) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0usize;
        for task in inner.drain(..) {
            on_remove(task);
            removed += 1;
        }
        removed
    }

    /// Wait for a push (or an explicit wake). Returns immediately when the
    /// queue already has work; otherwise returns on the next notification,
    /// which may be a shutdown wake — callers re-check their own state.
    pub async fn wait_for_task(&self) {
        if !self.is_empty() {
            return;
        }
        let notified = self.notify.notified();
        if !self.is_empty() {
            return;
        }
        notified.await;
    }

    /// Wake all waiters without pushing (used for shutdown).
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Buy / sell task payloads
// =============================================================================

/// How a buy task entered the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyTaskKind {
    /// Emitted by the strategy for immediate dispatch.
    Immediate,
    /// Passed the delayed-signal verifier.
    Verified,
    /// Re-entry leg of a distance-driven seat switch.
    SwitchRebuy,
}

#[derive(Debug, Clone)]
pub struct BuyTask {
    pub signal: Signal,
    pub kind: BuyTaskKind,
}

#[derive(Debug, Clone)]
pub struct SellTask {
    pub signal: Signal,
}

pub type BuyTaskQueue = TaskQueue<BuyTask>;
pub type SellTaskQueue = TaskQueue<SellTask>;

// =============================================================================
// Monitor-task queue (deduplicated)
// =============================================================================

/// Kinds of deduplicated monitor work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorTaskKind {
    SeatRefresh,
    LiquidationDistanceCheck,
    UnrealizedLossCheck,
}

impl std::fmt::Display for MonitorTaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SeatRefresh => "SEAT_REFRESH",
            Self::LiquidationDistanceCheck => "LIQUIDATION_DISTANCE_CHECK",
            Self::UnrealizedLossCheck => "UNREALIZED_LOSS_CHECK",
        };
        write!(f, "{s}")
    }
}

/// Tick-fresh data attached to a monitor task; only the latest matters.
#[derive(Debug, Clone, Default)]
pub struct MonitorTaskData {
    /// Latest underlying (monitor) price.
    pub underlying_price: f64,
    /// Latest quote of the seat's warrant, when known.
    pub warrant_price: Option<f64>,
    pub now_ms: i64,
}

#[derive(Debug, Clone)]
pub struct MonitorTask {
    pub kind: MonitorTaskKind,
    pub monitor: String,
    pub direction: Direction,
    /// Seat version observed when the task was scheduled.
    pub seat_version: u64,
    pub data: MonitorTaskData,
}

impl MonitorTask {
    /// Identity for dedup: one slot per (kind, monitor, direction).
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.monitor, self.direction)
    }
}

/// Deduplicated queue: `schedule_latest` replaces the same-key task's data
/// in place, keeping the original queue position.
pub struct MonitorTaskQueue {
    inner: Mutex<VecDeque<MonitorTask>>,
    notify: Notify,
}

impl MonitorTaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Insert, or replace the queued task with the same dedupe key.
    pub fn schedule_latest(&self, task: MonitorTask) {
        let key = task.dedupe_key();
        let mut inner = self.inner.lock();
        match inner.iter_mut().find(|t| t.dedupe_key() == key) {
            Some(existing) => *existing = task,
            None => inner.push_back(task),
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn pop(&self) -> Option<MonitorTask> {
        self.inner.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn clear_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.len();
        inner.clear();
        removed
    }

    /// Same contract as [`TaskQueue::wait_for_task`].
    pub async fn wait_for_task(&self) {
        if !self.is_empty() {
            return;
        }
        let notified = self.notify.notified();
        if !self.is_empty() {
            return;
        }
        notified.await;
    }

    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

impl Default for MonitorTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
