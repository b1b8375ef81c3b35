// =============================================================================
// Engine Loop — the per-second tick driving every monitor
// =============================================================================
//
// Each tick:
//
//   1. Feed the day-lifecycle state machine and the doomsday windows.
//   2. Batch-fetch quotes for every monitor and bound warrant.
//   3. Run the order monitor's timeout/replace pass with the fresh quotes.
//   4. Per monitor: fetch K-lines, compute (or reuse) the indicator
//      snapshot, push it into the indicator cache, schedule seat/risk
//      monitor tasks, and hand the snapshot to the strategy.
//   5. Dispatch strategy output: immediate signals to the buy/sell queues,
//      delayed signals into the verifier; then poll the verifier.
//
// Signals are only produced while the lifecycle has trading enabled; the
// order monitor and lifecycle keep running regardless so recovery and
// cleanup never stall.
// =============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::config::MonitorConfig;
use crate::doomsday::DoomsdayProtector;
use crate::hktime;
use crate::lifecycle::{DayLifecycleManager, TickInputs};
use crate::longport::types::CandlePeriod;
use crate::queues::{BuyTask, BuyTaskKind, MonitorTask, MonitorTaskData, MonitorTaskKind, SellTask};
use crate::signals::{GeneratedSignals, StrategyContext};
use crate::types::Direction;

/// K-line depth fetched per monitor per tick.
const KLINE_COUNT: usize = 120;

/// Heartbeat interval in ticks (~1 minute at the default tick rate).
const HEARTBEAT_TICKS: u64 = 60;

/// Run the main loop until the process shuts down.
pub async fn run_main_loop(
    state: Arc<AppState>,
    lifecycle: Arc<DayLifecycleManager>,
    doomsday: Arc<DoomsdayProtector>,
) {
    let mut ticker = interval(Duration::from_millis(state.config.tick_interval_ms.max(100)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick_count: u64 = 0;

    info!(
        tick_ms = state.config.tick_interval_ms,
        monitors = state.config.monitors.len(),
        "main loop running"
    );

    loop {
        ticker.tick().await;
        tick_count += 1;

        let now_ms = hktime::now_ms();
        let day_key = hktime::hk_date_key(now_ms);
        let is_trading_day = state.calendar.is_trading_day(&day_key);
        let is_half_day = state.calendar.is_half_day(&day_key);
        let can_trade_now =
            is_trading_day && hktime::in_continuous_session(now_ms, is_half_day);

        lifecycle
            .tick(&TickInputs {
                now_ms,
                day_key: day_key.clone(),
                is_trading_day,
                can_trade_now,
            })
            .await;

        if is_trading_day {
            doomsday.tick(now_ms, is_half_day).await;
        }

        // ── Batch quote fetch ───────────────────────────────────────────
        let mut symbols: BTreeSet<String> = state
            .config
            .monitors
            .iter()
            .map(|m| m.symbol.clone())
            .collect();
        symbols.extend(state.registry.bound_symbols());
        let symbols: Vec<String> = symbols.into_iter().collect();

        match state.quote.quote(&symbols).await {
            Ok(quotes) => state.quote_book.update_all(quotes),
            Err(e) => warn!(error = %e, "batch quote fetch failed"),
        }

        // ── Order lifecycle pass (runs even when trading is disabled) ───
        state
            .order_monitor
            .process_with_latest_quotes(&state.quote_book.price_map(), now_ms)
            .await;

        if !state.flags.is_trading_enabled() || !can_trade_now {
            debug!(
                trading_enabled = state.flags.is_trading_enabled(),
                can_trade_now, "tick without signal processing"
            );
            continue;
        }

        // ── Per-monitor fan-out ─────────────────────────────────────────
        for cfg in &state.config.monitors {
            process_monitor(&state, cfg, now_ms).await;
        }

        // ── Delayed-signal verification ─────────────────────────────────
        let outcome = state.verifier.poll(&state.indicator_cache, now_ms);
        if outcome.verified + outcome.rejected > 0 {
            debug!(
                verified = outcome.verified,
                rejected = outcome.rejected,
                "verifier poll complete"
            );
        }

        if tick_count % HEARTBEAT_TICKS == 0 {
            let status = state.build_status();
            info!(status = %serde_json::to_string(&status).unwrap_or_default(), "heartbeat");
        }
    }
}

/// One monitor's tick: snapshot, cache push, seat/risk tasks, strategy.
pub async fn process_monitor(state: &Arc<AppState>, cfg: &MonitorConfig, now_ms: i64) {
    // ── K-lines + indicator snapshot ────────────────────────────────────
    let bars = match state
        .quote
        .realtime_candlesticks(&cfg.symbol, CandlePeriod::OneMinute, KLINE_COUNT)
        .await
    {
        Ok(bars) => bars,
        Err(e) => {
            warn!(monitor = %cfg.symbol, error = %e, "candlestick fetch failed");
            return;
        }
    };

    let Some(tick) = state
        .kline_cache
        .snapshot_for(&cfg.symbol, &bars, &cfg.indicator_periods)
    else {
        debug!(monitor = %cfg.symbol, "insufficient K-lines for a snapshot");
        return;
    };

    state
        .indicator_cache
        .push(&cfg.symbol, now_ms, &tick.snapshot);

    let underlying_price = state
        .quote_book
        .last_price(&cfg.symbol)
        .unwrap_or(tick.snapshot.price);

    // ── Seat sync + risk tasks ──────────────────────────────────────────
    for direction in Direction::both() {
        let seat = state.registry.snapshot(&cfg.symbol, direction);
        let warrant_price = seat
            .symbol
            .as_deref()
            .and_then(|s| state.quote_book.last_price(s));
        let data = MonitorTaskData {
            underlying_price,
            warrant_price,
            now_ms,
        };

        state.monitor_queue.schedule_latest(MonitorTask {
            kind: MonitorTaskKind::SeatRefresh,
            monitor: cfg.symbol.clone(),
            direction,
            seat_version: seat.version,
            data: data.clone(),
        });

        if seat.usable {
            state.monitor_queue.schedule_latest(MonitorTask {
                kind: MonitorTaskKind::LiquidationDistanceCheck,
                monitor: cfg.symbol.clone(),
                direction,
                seat_version: seat.version,
                data: data.clone(),
            });
            state.monitor_queue.schedule_latest(MonitorTask {
                kind: MonitorTaskKind::UnrealizedLossCheck,
                monitor: cfg.symbol.clone(),
                direction,
                seat_version: seat.version,
                data,
            });
        }
    }

    // ── Strategy ────────────────────────────────────────────────────────
    let ctx = StrategyContext {
        monitor: cfg,
        snapshot: &tick.snapshot,
        prev_snapshot: tick.prev.as_ref(),
        long_seat: state.registry.snapshot(&cfg.symbol, Direction::Long),
        short_seat: state.registry.snapshot(&cfg.symbol, Direction::Short),
        now_ms,
    };
    let signals = state.strategy.generate_close_signals(&ctx);
    dispatch_signals(state, cfg, signals, now_ms);
}

/// Route strategy output into the queues and the verifier.
fn dispatch_signals(
    state: &Arc<AppState>,
    cfg: &MonitorConfig,
    signals: GeneratedSignals,
    now_ms: i64,
) {
    for signal in signals.immediate {
        if signal.action.is_buy() {
            state.buy_queue.push(BuyTask {
                signal,
                kind: BuyTaskKind::Immediate,
            });
        } else if signal.action.is_sell() {
            state.sell_queue.push(SellTask { signal });
        }
    }

    for signal in signals.delayed {
        let indicators = cfg.verification.indicators_for(signal.action).to_vec();
        if indicators.is_empty() {
            debug!(
                monitor = %cfg.symbol,
                action = %signal.action,
                "delayed signal without verification indicators — dropped"
            );
            continue;
        }
        state
            .verifier
            .add_signal(signal, indicators, &cfg.verification.delays_secs, now_ms);
    }
}
