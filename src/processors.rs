// =============================================================================
// Task Processors — buy, sell, and monitor-task execution loops
// =============================================================================
//
// Each processor runs as its own Tokio task, handling one queued task at a
// time. Buys and sells are deliberately separate so the buy path's
// API-calling risk checks can never delay a sell.
//
// Every task passes the same discipline: trading gate, seat-version and
// readiness validation (stale signals are dropped with an info log, never
// executed), then domain logic with errors swallowed so one bad task cannot
// stall the queue. `stop_and_drain` finishes the in-flight task before
// returning.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::cooldown::CooldownTracker;
use crate::hktime;
use crate::lifecycle::LifecycleFlags;
use crate::market_data::{CalendarCache, QuoteBook};
use crate::orders::recorder::OrderRecorder;
use crate::queues::{
    BuyTask, BuyTaskQueue, MonitorTask, MonitorTaskKind, MonitorTaskQueue, SellTask, SellTaskQueue,
};
use crate::refresh::RefreshGate;
use crate::risk::distance::check_liquidation_distance;
use crate::risk::{DailyLossTracker, UnrealizedLossTracker};
use crate::seats::switcher::SeatSwitcher;
use crate::seats::{SeatRegistry, SeatStatus};
use crate::signals::Signal;
use crate::trader::Trader;
use crate::types::{Direction, SignalAction};

/// Shared collaborators for all three processors.
pub struct ProcessorDeps {
    pub config: Arc<EngineConfig>,
    pub flags: Arc<LifecycleFlags>,
    pub registry: Arc<SeatRegistry>,
    pub trader: Arc<Trader>,
    pub recorder: Arc<OrderRecorder>,
    pub cooldowns: Arc<CooldownTracker>,
    pub unrealized: Arc<UnrealizedLossTracker>,
    pub daily_loss: Arc<DailyLossTracker>,
    pub quote_book: Arc<QuoteBook>,
    pub refresh_gate: Arc<RefreshGate>,
    pub switcher: Arc<SeatSwitcher>,
    pub calendar: Arc<CalendarCache>,
    pub sell_queue: Arc<SellTaskQueue>,
}

/// Drain control for one processor.
pub struct ProcessorHandle {
    name: &'static str,
    draining: AtomicBool,
    in_flight: AtomicBool,
    idle: Notify,
}

impl ProcessorHandle {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            draining: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            idle: Notify::new(),
        })
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn enter_task(&self) {
        self.in_flight.store(true, Ordering::SeqCst);
    }

    fn exit_task(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }

    /// Signal the processor to stop and wait for its in-flight task.
    pub async fn stop_and_drain(&self, wake: impl Fn()) {
        self.draining.store(true, Ordering::SeqCst);
        wake();
        loop {
            if !self.in_flight.load(Ordering::SeqCst) {
                info!(processor = self.name, "drained");
                return;
            }
            let notified = self.idle.notified();
            if !self.in_flight.load(Ordering::SeqCst) {
                info!(processor = self.name, "drained");
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

/// Buy-side validation: gate, seat fully usable, matching symbol + version,
/// cooldown clear.
fn validate_buy(deps: &ProcessorDeps, signal: &Signal, now_ms: i64) -> Result<Direction, String> {
    if !deps.flags.is_trading_enabled() {
        return Err("trading disabled by lifecycle".to_string());
    }
    let direction = signal
        .action
        .direction()
        .ok_or_else(|| "buy signal without direction".to_string())?;

    deps.registry
        .validate_for_execution(&signal.monitor, direction, &signal.symbol, signal.seat_version)?;

    if let Some(cfg) = deps.config.monitor(&signal.monitor) {
        if deps
            .cooldowns
            .is_blocked(&signal.symbol, direction, &cfg.cooldown, now_ms)
        {
            return Err(format!(
                "cooldown active for {}/{}",
                signal.symbol, direction
            ));
        }
    }
    Ok(direction)
}

/// Sell-side validation: symbol and version must still match the seat, but
/// a SWITCHING or frozen seat may still be closed — sells reduce exposure.
/// Non-protective sells additionally require the trading gate.
fn validate_sell(deps: &ProcessorDeps, signal: &Signal) -> Result<Direction, String> {
    if !deps.flags.is_trading_enabled() && !signal.is_protective_liquidation {
        return Err("trading disabled by lifecycle".to_string());
    }
    let direction = signal
        .action
        .direction()
        .ok_or_else(|| "sell signal without direction".to_string())?;

    let Some(seat) = deps.registry.get(&signal.monitor, direction) else {
        return Err(format!("no seat for {}/{}", signal.monitor, direction));
    };
    if seat.symbol.as_deref() != Some(signal.symbol.as_str()) {
        return Err(format!(
            "seat symbol changed: signal={} seat={}",
            signal.symbol,
            seat.symbol.as_deref().unwrap_or("-")
        ));
    }
    if seat.version != signal.seat_version {
        return Err(format!(
            "seat version changed: signal={} seat={}",
            signal.seat_version, seat.version
        ));
    }
    Ok(direction)
}

// =============================================================================
// Buy processor
// =============================================================================

pub async fn run_buy_processor(
    deps: Arc<ProcessorDeps>,
    queue: Arc<BuyTaskQueue>,
    handle: Arc<ProcessorHandle>,
) {
    info!("buy processor running");
    loop {
        if handle.is_draining() && queue.is_empty() {
            break;
        }
        let Some(task) = queue.pop() else {
            queue.wait_for_task().await;
            continue;
        };

        handle.enter_task();
        process_buy_task(&deps, task).await;
        handle.exit_task();
    }
    info!("buy processor stopped");
}

pub async fn process_buy_task(deps: &ProcessorDeps, task: BuyTask) {
    let signal = &task.signal;
    let now_ms = hktime::now_ms();

    if let Err(reason) = validate_buy(deps, signal, now_ms) {
        info!(
            monitor = %signal.monitor,
            symbol = %signal.symbol,
            action = %signal.action,
            reason = %reason,
            "buy signal dropped"
        );
        return;
    }

    // Risk checks read post-trade state; wait until every fill announced
    // before this point has been folded in.
    deps.refresh_gate.wait_for_fresh().await;

    // The wait is a suspension point — the seat may have moved underneath.
    if let Err(reason) = validate_buy(deps, signal, now_ms) {
        info!(
            monitor = %signal.monitor,
            symbol = %signal.symbol,
            reason = %reason,
            "buy signal dropped after refresh wait"
        );
        return;
    }

    let target_notional = deps
        .config
        .monitor(&signal.monitor)
        .map(|m| m.target_notional)
        .unwrap_or(0.0);

    match deps.trader.execute_buy(signal, target_notional, now_ms).await {
        Ok(Some(order_id)) => {
            debug!(order_id = %order_id, kind = ?task.kind, "buy task executed");
        }
        Ok(None) => {}
        Err(e) => {
            warn!(
                monitor = %signal.monitor,
                symbol = %signal.symbol,
                error = %e,
                "buy execution failed — signal dropped"
            );
        }
    }
}

// =============================================================================
// Sell processor
// =============================================================================

pub async fn run_sell_processor(
    deps: Arc<ProcessorDeps>,
    queue: Arc<SellTaskQueue>,
    handle: Arc<ProcessorHandle>,
) {
    info!("sell processor running");
    loop {
        if handle.is_draining() && queue.is_empty() {
            break;
        }
        let Some(task) = queue.pop() else {
            queue.wait_for_task().await;
            continue;
        };

        handle.enter_task();
        process_sell_task(&deps, task).await;
        handle.exit_task();
    }
    info!("sell processor stopped");
}

pub async fn process_sell_task(deps: &ProcessorDeps, task: SellTask) {
    let signal = &task.signal;

    if let Err(reason) = validate_sell(deps, signal) {
        info!(
            monitor = %signal.monitor,
            symbol = %signal.symbol,
            action = %signal.action,
            reason = %reason,
            "sell signal dropped"
        );
        return;
    }

    let now_ms = hktime::now_ms();
    if let Err(e) = deps.trader.execute_sell(signal, now_ms).await {
        warn!(
            monitor = %signal.monitor,
            symbol = %signal.symbol,
            error = %e,
            "sell execution failed — retried on next signal or timeout"
        );
    }
}

// =============================================================================
// Monitor-task processor
// =============================================================================

pub async fn run_monitor_task_processor(
    deps: Arc<ProcessorDeps>,
    queue: Arc<MonitorTaskQueue>,
    handle: Arc<ProcessorHandle>,
) {
    info!("monitor-task processor running");
    loop {
        if handle.is_draining() && queue.is_empty() {
            break;
        }
        let Some(task) = queue.pop() else {
            queue.wait_for_task().await;
            continue;
        };

        handle.enter_task();
        process_monitor_task(&deps, task).await;
        handle.exit_task();
    }
    info!("monitor-task processor stopped");
}

pub async fn process_monitor_task(deps: &ProcessorDeps, task: MonitorTask) {
    let Some(cfg) = deps.config.monitor(&task.monitor).cloned() else {
        warn!(monitor = %task.monitor, "monitor task for unknown monitor");
        return;
    };
    let now_ms = if task.data.now_ms > 0 {
        task.data.now_ms
    } else {
        hktime::now_ms()
    };
    let day_key = hktime::hk_date_key(now_ms);
    let is_half_day = deps.calendar.is_half_day(&day_key);

    match task.kind {
        MonitorTaskKind::SeatRefresh => {
            let Some(seat) = deps.registry.get(&task.monitor, task.direction) else {
                return;
            };
            let result = match seat.status {
                SeatStatus::Switching => {
                    deps.switcher
                        .continue_switch(
                            &cfg,
                            task.direction,
                            task.data.underlying_price,
                            now_ms,
                            is_half_day,
                        )
                        .await
                }
                SeatStatus::Empty if cfg.auto_search.enabled => deps
                    .switcher
                    .run_search(
                        &cfg,
                        task.direction,
                        task.data.underlying_price,
                        now_ms,
                        is_half_day,
                        false,
                    )
                    .await
                    .map(|_| ()),
                SeatStatus::Ready => deps
                    .switcher
                    .maybe_switch_on_distance(
                        &cfg,
                        task.direction,
                        task.data.underlying_price,
                        now_ms,
                    )
                    .await
                    .map(|_| ()),
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!(
                    monitor = %task.monitor,
                    direction = %task.direction,
                    error = %e,
                    "seat refresh failed"
                );
            }
        }

        MonitorTaskKind::LiquidationDistanceCheck => {
            let seat = deps.registry.snapshot(&task.monitor, task.direction);
            if seat.version != task.seat_version {
                debug!(monitor = %task.monitor, "distance check with stale seat version — dropped");
                return;
            }
            let (Some(symbol), Some(recall)) = (seat.symbol.clone(), seat.recall_price) else {
                return;
            };
            if deps.recorder.held_qty(&symbol, task.direction) == 0 {
                return;
            }
            if let Some(reason) = check_liquidation_distance(
                task.data.underlying_price,
                recall,
                task.direction,
                &cfg.risk,
            ) {
                push_protective_sell(deps, &cfg.symbol, &symbol, task.direction, seat.version, reason, now_ms);
            }
        }

        MonitorTaskKind::UnrealizedLossCheck => {
            let seat = deps.registry.snapshot(&task.monitor, task.direction);
            if seat.version != task.seat_version {
                debug!(monitor = %task.monitor, "unrealized check with stale seat version — dropped");
                return;
            }
            let Some(symbol) = seat.symbol.clone() else {
                return;
            };
            let Some(price) = task
                .data
                .warrant_price
                .or_else(|| deps.quote_book.last_price(&symbol))
            else {
                return;
            };
            let max_loss = cfg.risk.max_unrealized_loss_per_symbol;
            if let Some(advice) = deps
                .unrealized
                .check(&symbol, task.direction, price, max_loss)
            {
                let mut signal = base_protective_signal(
                    &cfg.symbol,
                    &symbol,
                    task.direction,
                    seat.version,
                    advice.reason,
                    now_ms,
                );
                signal.quantity = Some(advice.quantity);
                deps.sell_queue.push(SellTask { signal });
            }
        }
    }
}

fn base_protective_signal(
    monitor: &str,
    symbol: &str,
    direction: Direction,
    seat_version: u64,
    reason: String,
    now_ms: i64,
) -> Signal {
    let action = if direction.is_long() {
        SignalAction::SellCall
    } else {
        SignalAction::SellPut
    };
    Signal::new(monitor, symbol, action, reason, seat_version, now_ms).protective()
}

fn push_protective_sell(
    deps: &ProcessorDeps,
    monitor: &str,
    symbol: &str,
    direction: Direction,
    seat_version: u64,
    reason: String,
    now_ms: i64,
) {
    let held = deps.recorder.held_qty(symbol, direction);
    if held == 0 {
        return;
    }
    let mut signal = base_protective_signal(monitor, symbol, direction, seat_version, reason, now_ms);
    signal.quantity = Some(held);
    info!(
        monitor,
        symbol,
        direction = %direction,
        qty = held,
        "protective liquidation signal queued"
    );
    deps.sell_queue.push(SellTask { signal });
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use crate::orders::monitor::OrderMonitor;
    use crate::queues::MonitorTaskData;
    use crate::refresh::FillBus;
    use crate::seats::finder::AutoSymbolFinder;
    use crate::signals::verifier::DelayedSignalVerifier;
    use crate::testutil::{MockQuote, MockTrade};
    use crate::types::OrderRecord;

    struct Fixture {
        deps: Arc<ProcessorDeps>,
        trade: Arc<MockTrade>,
        quote: Arc<MockQuote>,
        buy_queue: Arc<BuyTaskQueue>,
    }

    fn fixture(enabled: bool) -> Fixture {
        let config: Arc<EngineConfig> = Arc::new(
            serde_json::from_value(serde_json::json!({
                "monitors": [{
                    "symbol": "HSI.HK",
                    "long_symbol": "69001.HK",
                    "short_symbol": "69002.HK",
                    "target_notional": 5000.0,
                    "risk": { "max_unrealized_loss_per_symbol": 100.0 },
                }]
            }))
            .unwrap(),
        );

        let flags = Arc::new(LifecycleFlags::new("2026-02-16".to_string()));
        if enabled {
            flags.set_trading_enabled(true);
        }

        let registry = Arc::new(SeatRegistry::new());
        registry.init_monitor(&config.monitors[0], 0);

        let trade = Arc::new(MockTrade::default());
        let quote = Arc::new(MockQuote::default());
        quote.set_price("69001.HK", 0.5);
        quote.set_lot_size("69001.HK", 100);

        let recorder = Arc::new(OrderRecorder::new());
        let refresh_gate = Arc::new(RefreshGate::new());
        let (bus, _rx) = FillBus::new(refresh_gate.clone());
        let order_monitor = Arc::new(OrderMonitor::new(
            trade.clone(),
            recorder.clone(),
            Default::default(),
            config.monitors.clone(),
            bus,
        ));
        let quote_book = Arc::new(QuoteBook::new());
        let trader = Arc::new(Trader::new(
            trade.clone(),
            quote.clone(),
            recorder.clone(),
            order_monitor.clone(),
            quote_book.clone(),
        ));

        let buy_queue = Arc::new(BuyTaskQueue::new());
        let sell_queue = Arc::new(SellTaskQueue::new());
        let verifier = Arc::new(DelayedSignalVerifier::new());
        let switcher = Arc::new(SeatSwitcher::new(
            registry.clone(),
            Arc::new(AutoSymbolFinder::new()),
            verifier,
            order_monitor,
            recorder.clone(),
            quote.clone(),
            buy_queue.clone(),
            sell_queue.clone(),
        ));

        let deps = Arc::new(ProcessorDeps {
            config,
            flags,
            registry,
            trader,
            recorder,
            cooldowns: Arc::new(CooldownTracker::new()),
            unrealized: Arc::new(UnrealizedLossTracker::new()),
            daily_loss: Arc::new(DailyLossTracker::new(0)),
            quote_book,
            refresh_gate,
            switcher,
            calendar: Arc::new(CalendarCache::new()),
            sell_queue,
        });

        Fixture {
            deps,
            trade,
            quote,
            buy_queue,
        }
    }

    fn buy_signal(deps: &ProcessorDeps) -> Signal {
        let seat = deps.registry.snapshot("HSI.HK", Direction::Long);
        Signal::new(
            "HSI.HK",
            seat.symbol.as_deref().unwrap(),
            SignalAction::BuyCall,
            "test",
            seat.version,
            1_000,
        )
    }

    #[tokio::test]
    async fn valid_buy_task_submits_order() {
        let f = fixture(true);
        let signal = buy_signal(&f.deps);
        process_buy_task(
            &f.deps,
            BuyTask {
                signal,
                kind: crate::queues::BuyTaskKind::Immediate,
            },
        )
        .await;
        assert_eq!(f.trade.submit_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn stale_version_buy_never_submits() {
        let f = fixture(true);
        let mut signal = buy_signal(&f.deps);
        // Seat rotates after emission.
        f.deps.registry.begin_switch("HSI.HK", Direction::Long, 1);
        f.deps.registry.clear_seat("HSI.HK", Direction::Long, 2);
        f.deps
            .registry
            .bind_symbol("HSI.HK", Direction::Long, "69009.HK", None, 3);
        signal.symbol = "69001.HK".to_string();

        process_buy_task(
            &f.deps,
            BuyTask {
                signal,
                kind: crate::queues::BuyTaskKind::Immediate,
            },
        )
        .await;
        assert!(f.trade.submit_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn gate_closed_drops_buy_but_not_protective_sell() {
        let f = fixture(false);
        assert_eq!(f.deps.flags.state(), LifecycleState::Active); // flags default
        f.deps.flags.set_trading_enabled(false);

        let signal = buy_signal(&f.deps);
        process_buy_task(
            &f.deps,
            BuyTask {
                signal,
                kind: crate::queues::BuyTaskKind::Immediate,
            },
        )
        .await;
        assert!(f.trade.submit_calls.lock().is_empty());

        // A protective sell still executes with trading disabled.
        f.deps.recorder.record_filled_buy(
            Direction::Long,
            OrderRecord {
                order_id: "b1".into(),
                symbol: "69001.HK".into(),
                executed_price: 0.5,
                executed_qty: 500,
                executed_at_ms: 1,
                submitted_at_ms: None,
                updated_at_ms: None,
            },
        );
        f.quote.set_price("69001.HK", 0.4);
        let seat = f.deps.registry.snapshot("HSI.HK", Direction::Long);
        let mut sell = Signal::new(
            "HSI.HK",
            "69001.HK",
            SignalAction::SellCall,
            "protect",
            seat.version,
            2_000,
        )
        .protective();
        sell.quantity = Some(500);
        process_sell_task(&f.deps, SellTask { signal: sell }).await;
        assert_eq!(f.trade.submit_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn cooldown_blocks_buy() {
        let f = fixture(true);
        // Install a cooldown rule and a fresh entry.
        let mut config = (*f.deps.config).clone();
        config.monitors[0].cooldown = crate::config::CooldownRule::Minutes(60);
        let deps = Arc::new(ProcessorDeps {
            config: Arc::new(config),
            flags: f.deps.flags.clone(),
            registry: f.deps.registry.clone(),
            trader: f.deps.trader.clone(),
            recorder: f.deps.recorder.clone(),
            cooldowns: f.deps.cooldowns.clone(),
            unrealized: f.deps.unrealized.clone(),
            daily_loss: f.deps.daily_loss.clone(),
            quote_book: f.deps.quote_book.clone(),
            refresh_gate: f.deps.refresh_gate.clone(),
            switcher: f.deps.switcher.clone(),
            calendar: f.deps.calendar.clone(),
            sell_queue: f.deps.sell_queue.clone(),
        });
        deps.cooldowns
            .record("69001.HK", Direction::Long, hktime::now_ms(), false);

        let signal = buy_signal(&deps);
        process_buy_task(
            &deps,
            BuyTask {
                signal,
                kind: crate::queues::BuyTaskKind::Immediate,
            },
        )
        .await;
        assert!(f.trade.submit_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn unrealized_loss_task_queues_protective_sell() {
        let f = fixture(true);
        f.deps.recorder.record_filled_buy(
            Direction::Long,
            OrderRecord {
                order_id: "b1".into(),
                symbol: "69001.HK".into(),
                executed_price: 1.0,
                executed_qty: 1_000,
                executed_at_ms: 1,
                submitted_at_ms: None,
                updated_at_ms: None,
            },
        );
        f.deps
            .unrealized
            .refresh(&f.deps.recorder, "69001.HK", Direction::Long, 0.0, 1);

        let seat = f.deps.registry.snapshot("HSI.HK", Direction::Long);
        let task = MonitorTask {
            kind: MonitorTaskKind::UnrealizedLossCheck,
            monitor: "HSI.HK".to_string(),
            direction: Direction::Long,
            seat_version: seat.version,
            data: MonitorTaskData {
                underlying_price: 25_000.0,
                warrant_price: Some(0.85), // loss 150 > limit 100
                now_ms: 1_000,
            },
        };
        process_monitor_task(&f.deps, task).await;

        assert_eq!(f.deps.sell_queue.len(), 1);
        let sell = f.deps.sell_queue.pop().unwrap().signal;
        assert!(sell.is_protective_liquidation);
        assert_eq!(sell.quantity, Some(1_000));
    }

    #[tokio::test]
    async fn stale_monitor_task_is_dropped() {
        let f = fixture(true);
        let task = MonitorTask {
            kind: MonitorTaskKind::UnrealizedLossCheck,
            monitor: "HSI.HK".to_string(),
            direction: Direction::Long,
            seat_version: 999, // stale
            data: MonitorTaskData::default(),
        };
        process_monitor_task(&f.deps, task).await;
        assert!(f.deps.sell_queue.is_empty());
    }

    #[tokio::test]
    async fn stop_and_drain_waits_for_in_flight() {
        let f = fixture(true);
        let handle = ProcessorHandle::new("buy");
        let queue = f.buy_queue.clone();

        let runner = tokio::spawn(run_buy_processor(
            f.deps.clone(),
            queue.clone(),
            handle.clone(),
        ));

        queue.push(BuyTask {
            signal: buy_signal(&f.deps),
            kind: crate::queues::BuyTaskKind::Immediate,
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        handle.stop_and_drain(|| queue.wake_all()).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), runner)
            .await
            .expect("processor should exit after drain")
            .unwrap();
        assert_eq!(f.trade.submit_calls.lock().len(), 1);
    }
}
