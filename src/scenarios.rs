// =============================================================================
// Cross-Module Scenarios — full flows over scripted broker transports
// =============================================================================

use std::sync::Arc;

use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::cooldown::CooldownTracker;
use crate::longport::types::{OrderChangedEvent, WarrantInfo, WarrantStatus, WarrantType};
use crate::market_data::{CalendarCache, QuoteBook};
use crate::processors::{process_monitor_task, process_sell_task, ProcessorDeps};
use crate::queues::{BuyTaskKind, MonitorTask, MonitorTaskData, MonitorTaskKind};
use crate::risk::{DailyLossTracker, UnrealizedLossTracker};
use crate::seats::finder::AutoSymbolFinder;
use crate::seats::switcher::SeatSwitcher;
use crate::seats::SeatStatus;
use crate::testutil::{MockQuote, MockTrade};
use crate::trader::Trader;
use crate::types::{Direction, OrderRecord, OrderSide, OrderStatus, OrderType};

struct World {
    state: Arc<AppState>,
    deps: Arc<ProcessorDeps>,
    switcher: Arc<SeatSwitcher>,
    trade: Arc<MockTrade>,
    quote: Arc<MockQuote>,
}

fn world(config: EngineConfig) -> World {
    let trade = Arc::new(MockTrade::default());
    let quote = Arc::new(MockQuote::default());
    let (state, _fill_rx) = AppState::new(config, quote.clone(), trade.clone());
    state.flags.set_trading_enabled(true);

    let switcher = Arc::new(SeatSwitcher::new(
        state.registry.clone(),
        Arc::new(AutoSymbolFinder::new()),
        state.verifier.clone(),
        state.order_monitor.clone(),
        state.recorder.clone(),
        quote.clone(),
        state.buy_queue.clone(),
        state.sell_queue.clone(),
    ));

    let trader = Arc::new(Trader::new(
        trade.clone(),
        quote.clone(),
        state.recorder.clone(),
        state.order_monitor.clone(),
        state.quote_book.clone(),
    ));

    let deps = Arc::new(ProcessorDeps {
        config: state.config.clone(),
        flags: state.flags.clone(),
        registry: state.registry.clone(),
        trader,
        recorder: state.recorder.clone(),
        cooldowns: Arc::new(CooldownTracker::new()),
        unrealized: Arc::new(UnrealizedLossTracker::new()),
        daily_loss: Arc::new(DailyLossTracker::new(0)),
        quote_book: Arc::new(QuoteBook::new()),
        refresh_gate: state.refresh_gate.clone(),
        switcher: switcher.clone(),
        calendar: Arc::new(CalendarCache::new()),
        sell_queue: state.sell_queue.clone(),
    });

    World {
        state,
        deps,
        switcher,
        trade,
        quote,
    }
}

fn switch_config() -> EngineConfig {
    serde_json::from_value(serde_json::json!({
        "monitors": [{
            "symbol": "HSI.HK",
            "target_notional": 5000.0,
            "auto_search": {
                "enabled": true,
                "long_min_distance_pct": 0.5,
                "short_min_distance_pct": -0.5,
                "expiry_min_months": 3,
                "switch_distance_range": [1.0, 3.0],
                "should_rebuy": true,
            },
        }]
    }))
    .unwrap()
}

fn warrant(symbol: &str, call_price: f64) -> WarrantInfo {
    WarrantInfo {
        symbol: symbol.to_string(),
        name: format!("HSI RC {symbol}"),
        warrant_type: WarrantType::Bull,
        status: WarrantStatus::Normal,
        call_price,
        to_call_price: 100.0,
        expiry_date: "2026-12-30".into(),
        turnover: 1e7,
        last_done: 0.5,
    }
}

fn held_buy(world: &World, symbol: &str, qty: u64) {
    world.state.recorder.record_filled_buy(
        Direction::Long,
        OrderRecord {
            order_id: format!("seed-{symbol}"),
            symbol: symbol.to_string(),
            executed_price: 1.0,
            executed_qty: qty,
            executed_at_ms: 1,
            submitted_at_ms: None,
            updated_at_ms: None,
        },
    );
}

fn sell_fill_event(order_id: &str, symbol: &str, qty: u64, price: f64, at: i64) -> OrderChangedEvent {
    OrderChangedEvent {
        order_id: order_id.to_string(),
        symbol: symbol.to_string(),
        stock_name: format!("HSI RC {symbol}"),
        side: OrderSide::Sell,
        status: OrderStatus::Filled,
        order_type: OrderType::Mo,
        submitted_qty: qty,
        submitted_price: price,
        executed_qty: qty,
        executed_price: price,
        updated_at_ms: at,
    }
}

// =============================================================================
// Distance switch end-to-end: READY → SWITCHING → sell → search → rebind →
// rebuy, with stale-version signals fenced out along the way.
// =============================================================================
#[tokio::test]
async fn distance_switch_closes_rebinds_and_rebuys() {
    let w = world(switch_config());
    let cfg = w.state.config.monitors[0].clone();

    // Seat READY on A.HK at recall 24_900; underlying 25_000 → distance
    // 0.40%, below the [1.0, 3.0] band.
    w.state
        .registry
        .bind_symbol("HSI.HK", Direction::Long, "A.HK", Some(24_900.0), 0);
    let v_ready = w.state.registry.get("HSI.HK", Direction::Long).unwrap().version;
    held_buy(&w, "A.HK", 500);
    w.quote.set_price("A.HK", 1.10);
    *w.quote.warrants.lock() = vec![warrant("B.HK", 24_500.0)];

    // Tick detects the out-of-band distance.
    let initiated = w
        .switcher
        .maybe_switch_on_distance(&cfg, Direction::Long, 25_000.0, 1_000)
        .await
        .unwrap();
    assert!(initiated);

    let seat = w.state.registry.get("HSI.HK", Direction::Long).unwrap();
    assert_eq!(seat.status, SeatStatus::Switching);
    assert_eq!(seat.symbol.as_deref(), Some("A.HK"));
    let v_switching = seat.version;
    assert!(v_switching > v_ready);

    // A market sell for the held 500 was queued; run it through the sell
    // processor → broker.
    assert_eq!(w.state.sell_queue.len(), 1);
    let sell_task = w.state.sell_queue.pop().unwrap();
    assert_eq!(sell_task.signal.quantity, Some(500));
    assert!(sell_task.signal.use_market_order);
    process_sell_task(&w.deps, sell_task).await;

    let submits = w.trade.submit_calls.lock().clone();
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].order_type, OrderType::Mo);
    assert_eq!(submits[0].submitted_qty, 500);

    // A signal still carrying the pre-switch version must never execute.
    let stale = crate::signals::Signal::new(
        "HSI.HK",
        "A.HK",
        crate::types::SignalAction::SellCall,
        "stale",
        v_ready,
        2_000,
    );
    process_sell_task(&w.deps, crate::queues::SellTask { signal: stale }).await;
    assert_eq!(w.trade.submit_calls.lock().len(), 1, "stale signal executed");

    // The sell fills at 1.10; the recorder releases the lots.
    w.state
        .order_monitor
        .handle_order_changed(&sell_fill_event("M1", "A.HK", 500, 1.10, 3_000));
    assert_eq!(w.state.recorder.held_qty("A.HK", Direction::Long), 0);

    // Seat refresh advances the switch: clear → search → bind B.HK.
    process_monitor_task(
        &w.deps,
        MonitorTask {
            kind: MonitorTaskKind::SeatRefresh,
            monitor: "HSI.HK".into(),
            direction: Direction::Long,
            seat_version: v_switching,
            data: MonitorTaskData {
                underlying_price: 25_000.0,
                warrant_price: None,
                now_ms: 4_000,
            },
        },
    )
    .await;

    let seat = w.state.registry.get("HSI.HK", Direction::Long).unwrap();
    assert_eq!(seat.status, SeatStatus::Ready);
    assert_eq!(seat.symbol.as_deref(), Some("B.HK"));
    // Clear and rebind each bumped the version past the switching bump.
    assert!(seat.version >= v_switching + 2);

    // A.HK cannot be re-adopted today.
    assert!(w
        .switcher
        .suppression()
        .is_suppressed("A.HK", &crate::hktime::hk_date_key(4_000)));

    // should_rebuy queued a re-entry buy on B.HK at the new version.
    assert_eq!(w.state.buy_queue.len(), 1);
    let rebuy = w.state.buy_queue.pop().unwrap();
    assert_eq!(rebuy.kind, BuyTaskKind::SwitchRebuy);
    assert_eq!(rebuy.signal.symbol, "B.HK");
    assert_eq!(rebuy.signal.seat_version, seat.version);
}

// =============================================================================
// Search failures freeze the seat for the day.
// =============================================================================
#[tokio::test]
async fn repeated_search_failures_freeze_seat() {
    let w = world(switch_config());
    let cfg = w.state.config.monitors[0].clone();
    // No warrants available: every search fails.
    *w.quote.warrants.lock() = Vec::new();

    for _ in 0..3 {
        let bound = w
            .switcher
            .run_search(&cfg, Direction::Long, 25_000.0, 1_000, false, false)
            .await
            .unwrap();
        assert!(!bound);
    }

    let seat = w.state.registry.get("HSI.HK", Direction::Long).unwrap();
    assert_eq!(seat.search_fail_count_today, 3);
    assert!(seat.frozen_trading_day_key.is_some());

    // A frozen seat refuses further searches even with candidates back.
    *w.quote.warrants.lock() = vec![warrant("B.HK", 24_500.0)];
    let bound = w
        .switcher
        .run_search(&cfg, Direction::Long, 25_000.0, 2_000, false, false)
        .await
        .unwrap();
    assert!(!bound);
    // The three failing searches were coalesced by the warrant-list TTL
    // cache, and the frozen attempt never reached the broker.
    assert_eq!(*w.quote.warrant_list_calls.lock(), 1);
}

// =============================================================================
// Buy fill → recorder → protective liquidation on unrealized loss.
// =============================================================================
#[tokio::test]
async fn buy_fill_then_unrealized_loss_liquidation() {
    let config: EngineConfig = serde_json::from_value(serde_json::json!({
        "monitors": [{
            "symbol": "HSI.HK",
            "long_symbol": "69001.HK",
            "short_symbol": "69002.HK",
            "target_notional": 5000.0,
            "ownership_keys": ["HSI"],
            "risk": { "max_unrealized_loss_per_symbol": 100.0 },
        }]
    }))
    .unwrap();
    let w = world(config);

    // A buy fill lands via push.
    w.state
        .order_monitor
        .handle_order_changed(&OrderChangedEvent {
            order_id: "B1".into(),
            symbol: "69001.HK".into(),
            stock_name: "HSI RC2606A".into(),
            side: OrderSide::Buy,
            status: OrderStatus::Filled,
            order_type: OrderType::Elo,
            submitted_qty: 1_000,
            submitted_price: 1.0,
            executed_qty: 1_000,
            executed_price: 1.0,
            updated_at_ms: 1_000,
        });
    // Ownership resolution attributed the untracked fill.
    assert_eq!(w.state.recorder.held_qty("69001.HK", Direction::Long), 1_000);

    // Risk cache refresh, then the scheduled unrealized-loss check at a
    // price 15% under cost.
    w.deps
        .unrealized
        .refresh(&w.state.recorder, "69001.HK", Direction::Long, 0.0, 2_000);
    let seat = w.state.registry.snapshot("HSI.HK", Direction::Long);
    process_monitor_task(
        &w.deps,
        MonitorTask {
            kind: MonitorTaskKind::UnrealizedLossCheck,
            monitor: "HSI.HK".into(),
            direction: Direction::Long,
            seat_version: seat.version,
            data: MonitorTaskData {
                underlying_price: 25_000.0,
                warrant_price: Some(0.85),
                now_ms: 3_000,
            },
        },
    )
    .await;

    assert_eq!(w.state.sell_queue.len(), 1);
    let task = w.state.sell_queue.pop().unwrap();
    assert!(task.signal.is_protective_liquidation);
    assert_eq!(task.signal.quantity, Some(1_000));

    // Execute the liquidation: a market order hits the broker.
    w.quote.set_price("69001.HK", 0.85);
    process_sell_task(&w.deps, task).await;
    let submits = w.trade.submit_calls.lock();
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].order_type, OrderType::Mo);
}
