// =============================================================================
// Central Application State — Victoria CBBC Engine
// =============================================================================
//
// The composition root shared across all async tasks via `Arc<AppState>`.
// Each subsystem keeps exclusive ownership of its own data (seat registry
// owns seats, order recorder owns order maps, indicator cache owns its
// rings); AppState only ties the Arcs together and offers a status snapshot
// for the heartbeat log.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::EngineConfig;
use crate::cooldown::CooldownTracker;
use crate::hktime;
use crate::indicator_cache::IndicatorCache;
use crate::lifecycle::LifecycleFlags;
use crate::longport::{QuoteTransport, TradeTransport};
use crate::market_data::{AccountCaches, CalendarCache, KlineCache, QuoteBook};
use crate::orders::monitor::OrderMonitor;
use crate::orders::recorder::OrderRecorder;
use crate::queues::{BuyTask, BuyTaskKind, BuyTaskQueue, MonitorTaskQueue, SellTask, SellTaskQueue};
use crate::refresh::{FillBus, FillNotice, RefreshGate};
use crate::risk::{DailyLossTracker, UnrealizedLossTracker};
use crate::seats::SeatRegistry;
use crate::signals::verifier::DelayedSignalVerifier;
use crate::signals::{RuleStrategy, Strategy};
use crate::trade_log::TradeLog;
use crate::types::Direction;

/// Shared engine state.
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub quote: Arc<dyn QuoteTransport>,
    pub trade: Arc<dyn TradeTransport>,

    // ── Seats ───────────────────────────────────────────────────────────
    pub registry: Arc<SeatRegistry>,

    // ── Orders ──────────────────────────────────────────────────────────
    pub recorder: Arc<OrderRecorder>,
    pub order_monitor: Arc<OrderMonitor>,

    // ── Market data ─────────────────────────────────────────────────────
    pub quote_book: Arc<QuoteBook>,
    pub kline_cache: Arc<KlineCache>,
    pub indicator_cache: Arc<IndicatorCache>,
    pub calendar: Arc<CalendarCache>,
    pub account_caches: Arc<AccountCaches>,

    // ── Signal pipeline ─────────────────────────────────────────────────
    pub verifier: Arc<DelayedSignalVerifier>,
    pub strategy: Arc<dyn Strategy>,

    // ── Queues ──────────────────────────────────────────────────────────
    pub buy_queue: Arc<BuyTaskQueue>,
    pub sell_queue: Arc<SellTaskQueue>,
    pub monitor_queue: Arc<MonitorTaskQueue>,

    // ── Risk & recovery ─────────────────────────────────────────────────
    pub cooldowns: Arc<CooldownTracker>,
    pub unrealized: Arc<UnrealizedLossTracker>,
    pub daily_loss: Arc<DailyLossTracker>,
    pub refresh_gate: Arc<RefreshGate>,
    pub flags: Arc<LifecycleFlags>,
    pub trade_log: Arc<TradeLog>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build the full state graph. Returns the fill-notice receiver for the
    /// post-trade refresher task.
    pub fn new(
        config: EngineConfig,
        quote: Arc<dyn QuoteTransport>,
        trade: Arc<dyn TradeTransport>,
    ) -> (Arc<Self>, UnboundedReceiver<FillNotice>) {
        let now_ms = hktime::now_ms();
        let config = Arc::new(config);

        let registry = Arc::new(SeatRegistry::new());
        for monitor in &config.monitors {
            registry.init_monitor(monitor, now_ms);
        }

        let recorder = Arc::new(OrderRecorder::new());
        let refresh_gate = Arc::new(RefreshGate::new());
        let (fill_bus, fill_rx) = FillBus::new(refresh_gate.clone());
        let order_monitor = Arc::new(OrderMonitor::new(
            trade.clone(),
            recorder.clone(),
            config.order.clone(),
            config.monitors.clone(),
            fill_bus,
        ));

        let buy_queue = Arc::new(BuyTaskQueue::new());
        let sell_queue = Arc::new(SellTaskQueue::new());
        let verifier = Arc::new(DelayedSignalVerifier::new());

        // Verified delayed signals re-enter the execution queues by action.
        {
            let buys = buy_queue.clone();
            let sells = sell_queue.clone();
            verifier.on_verified(move |signal| {
                if signal.action.is_sell() {
                    sells.push(SellTask { signal });
                } else {
                    buys.push(BuyTask {
                        signal,
                        kind: BuyTaskKind::Verified,
                    });
                }
            });
        }

        let trade_log = Arc::new(TradeLog::new(&config.log_dir));

        let state = Arc::new(Self {
            registry,
            recorder,
            order_monitor,
            quote_book: Arc::new(QuoteBook::new()),
            kline_cache: Arc::new(KlineCache::new()),
            indicator_cache: Arc::new(IndicatorCache::new(config.indicator_cache_capacity)),
            calendar: Arc::new(CalendarCache::new()),
            account_caches: Arc::new(AccountCaches::new()),
            verifier,
            strategy: Arc::new(RuleStrategy),
            buy_queue,
            sell_queue,
            monitor_queue: Arc::new(MonitorTaskQueue::new()),
            cooldowns: Arc::new(CooldownTracker::new()),
            unrealized: Arc::new(UnrealizedLossTracker::new()),
            daily_loss: Arc::new(DailyLossTracker::new(now_ms)),
            refresh_gate,
            flags: Arc::new(LifecycleFlags::new(hktime::hk_date_key(now_ms))),
            trade_log,
            config,
            quote,
            trade,
            start_time: std::time::Instant::now(),
        });

        (state, fill_rx)
    }

    /// Heartbeat summary for the log.
    pub fn build_status(&self) -> EngineStatus {
        let mut seats = Vec::new();
        for monitor in &self.config.monitors {
            for direction in Direction::both() {
                let snapshot = self.registry.snapshot(&monitor.symbol, direction);
                seats.push(SeatStatusLine {
                    monitor: monitor.symbol.clone(),
                    direction: direction.to_string(),
                    symbol: snapshot.symbol,
                    version: snapshot.version,
                    usable: snapshot.usable,
                });
            }
        }

        EngineStatus {
            lifecycle: self.flags.state().to_string(),
            day_key: self.flags.current_day_key(),
            trading_enabled: self.flags.is_trading_enabled(),
            seats,
            buy_queue_depth: self.buy_queue.len(),
            sell_queue_depth: self.sell_queue.len(),
            monitor_queue_depth: self.monitor_queue.len(),
            pending_verifications: self.verifier.pending_count(),
            tracked_orders: self.order_monitor.tracked_count(),
            active_cooldowns: self.cooldowns.len(),
            outstanding_refreshes: self.refresh_gate.outstanding(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

/// One seat line in the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SeatStatusLine {
    pub monitor: String,
    pub direction: String,
    pub symbol: Option<String>,
    pub version: u64,
    pub usable: bool,
}

/// Engine heartbeat payload.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub lifecycle: String,
    pub day_key: String,
    pub trading_enabled: bool,
    pub seats: Vec<SeatStatusLine>,
    pub buy_queue_depth: usize,
    pub sell_queue_depth: usize,
    pub monitor_queue_depth: usize,
    pub pending_verifications: usize,
    pub tracked_orders: usize,
    pub active_cooldowns: usize,
    pub outstanding_refreshes: u64,
    pub uptime_secs: u64,
}
