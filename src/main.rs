// =============================================================================
// Victoria CBBC Engine — Main Entry Point
// =============================================================================
//
// Automated Hong Kong bull/bear warrant trading against the Longport
// OpenAPI. The engine binds a warrant to each (monitor, direction) seat,
// computes indicators on the monitor's K-lines every second, and routes
// strategy signals through verification, risk, and order-lifecycle
// management.
//
// Startup order matters: broker client → shared state → push loop →
// lifecycle rebuild → startup gate → processors → main loop.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod config;
mod cooldown;
mod domains;
mod doomsday;
mod engine;
mod gate;
mod hktime;
mod indicator_cache;
mod indicators;
mod lifecycle;
mod longport;
mod market_data;
mod orders;
mod processors;
mod queues;
mod refresh;
mod risk;
mod seats;
mod signals;
mod trade_log;
mod trader;
mod types;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{Credentials, EngineConfig, GateMode};
use crate::doomsday::DoomsdayProtector;
use crate::gate::StartupGate;
use crate::lifecycle::{DayLifecycleManager, TickInputs};
use crate::longport::client::{run_push_loop, LongportClient};
use crate::longport::throttle::Throttle;
use crate::longport::types::PushEvent;
use crate::longport::{QuoteTransport, TradeTransport};
use crate::processors::{
    run_buy_processor, run_monitor_task_processor, run_sell_processor, ProcessorDeps,
    ProcessorHandle,
};
use crate::seats::finder::AutoSymbolFinder;
use crate::seats::switcher::SeatSwitcher;
use crate::trader::{PostTradeRefresher, Trader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Victoria CBBC Engine — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("VICTORIA_CONFIG").unwrap_or_else(|_| "engine_config.json".to_string());
    let mut config = EngineConfig::load(&config_path)?;
    if config.monitors.is_empty() {
        anyhow::bail!("no monitors configured in {config_path}");
    }

    if let Ok(dir) = std::env::var("VICTORIA_LOG_DIR") {
        config.log_dir = dir;
    }

    // The test profile never waits on a live session.
    let profile = std::env::var("APP_RUNTIME_PROFILE").unwrap_or_else(|_| "app".to_string());
    if profile == "test" {
        warn!("APP_RUNTIME_PROFILE=test — startup gate forced to skip");
        config.gate.mode = GateMode::Skip;
    }

    info!(
        monitors = ?config.monitors.iter().map(|m| m.symbol.clone()).collect::<Vec<_>>(),
        profile = %profile,
        "engine configuration ready"
    );

    // ── 2. Broker client ─────────────────────────────────────────────────
    let creds = Credentials::from_env()?;
    let throttle = Arc::new(Throttle::default());
    let client = Arc::new(LongportClient::new(creds, throttle));
    let quote: Arc<dyn QuoteTransport> = client.clone();
    let trade: Arc<dyn TradeTransport> = client.clone();

    // ── 3. Shared state ──────────────────────────────────────────────────
    let (state, fill_rx) = AppState::new(config, quote.clone(), trade.clone());

    // ── 4. Trading calendar ──────────────────────────────────────────────
    let now_ms = hktime::now_ms();
    if let Err(e) = market_data::refresh_calendar(quote.as_ref(), &state.calendar, now_ms).await {
        warn!(error = %e, "calendar fetch failed — weekday fallback in effect");
    }

    // ── 5. Quote subscriptions ───────────────────────────────────────────
    let mut symbols: Vec<String> = state
        .config
        .monitors
        .iter()
        .map(|m| m.symbol.clone())
        .collect();
    symbols.extend(state.registry.bound_symbols());
    if let Err(e) = quote.subscribe(&symbols).await {
        warn!(error = %e, "initial quote subscription failed");
    }

    // ── 6. Push loop (quotes + order events) ─────────────────────────────
    let (push_tx, mut push_rx) = tokio::sync::mpsc::unbounded_channel::<PushEvent>();
    {
        let client = client.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = run_push_loop(client.clone(), push_tx.clone()).await {
                    error!(error = %e, "push loop error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }
    {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(event) = push_rx.recv().await {
                match event {
                    PushEvent::Quote(q) => state.quote_book.update(q),
                    PushEvent::OrderChanged(o) => state.order_monitor.handle_order_changed(&o),
                }
            }
        });
    }

    // ── 7. Switching, trading, refresh ───────────────────────────────────
    let finder = Arc::new(AutoSymbolFinder::new());
    let switcher = Arc::new(SeatSwitcher::new(
        state.registry.clone(),
        finder,
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

    let refresher = Arc::new(PostTradeRefresher {
        trade: trade.clone(),
        recorder: state.recorder.clone(),
        unrealized: state.unrealized.clone(),
        daily_loss: state.daily_loss.clone(),
        cooldowns: state.cooldowns.clone(),
        trade_log: state.trade_log.clone(),
        account_caches: state.account_caches.clone(),
        gate: state.refresh_gate.clone(),
        config: state.config.clone(),
    });
    tokio::spawn(refresher.run(fill_rx));

    // ── 8. Day lifecycle + startup recovery ──────────────────────────────
    let domains = domains::build_domains(state.clone(), switcher.clone());
    let lifecycle = Arc::new(DayLifecycleManager::new(
        state.flags.clone(),
        domains,
        state.config.lifecycle.base_retry_delay_ms,
    ));

    let startup_inputs = TickInputs {
        now_ms: hktime::now_ms(),
        day_key: hktime::hk_date_key(hktime::now_ms()),
        is_trading_day: true,
        can_trade_now: true,
    };
    if let Err(e) = lifecycle.run_initial_rebuild(&startup_inputs).await {
        error!(error = %e, "startup rebuild failed — lifecycle will retry at open");
        lifecycle.prime_for_open_rebuild();
    }

    // ── 9. Startup gate ──────────────────────────────────────────────────
    let startup_gate = StartupGate::new(state.config.gate.clone());
    startup_gate.wait_until_open(&state.calendar).await;

    // ── 10. Processors ───────────────────────────────────────────────────
    let deps = Arc::new(ProcessorDeps {
        config: state.config.clone(),
        flags: state.flags.clone(),
        registry: state.registry.clone(),
        trader,
        recorder: state.recorder.clone(),
        cooldowns: state.cooldowns.clone(),
        unrealized: state.unrealized.clone(),
        daily_loss: state.daily_loss.clone(),
        quote_book: state.quote_book.clone(),
        refresh_gate: state.refresh_gate.clone(),
        switcher,
        calendar: state.calendar.clone(),
        sell_queue: state.sell_queue.clone(),
    });

    let buy_handle = ProcessorHandle::new("buy");
    let sell_handle = ProcessorHandle::new("sell");
    let monitor_handle = ProcessorHandle::new("monitor-task");

    tokio::spawn(run_buy_processor(
        deps.clone(),
        state.buy_queue.clone(),
        buy_handle.clone(),
    ));
    tokio::spawn(run_sell_processor(
        deps.clone(),
        state.sell_queue.clone(),
        sell_handle.clone(),
    ));
    tokio::spawn(run_monitor_task_processor(
        deps.clone(),
        state.monitor_queue.clone(),
        monitor_handle.clone(),
    ));

    // ── 11. Doomsday protection + main loop ──────────────────────────────
    let doomsday = Arc::new(DoomsdayProtector::new(
        state.config.clone(),
        state.registry.clone(),
        state.recorder.clone(),
        state.order_monitor.clone(),
        state.sell_queue.clone(),
        state.account_caches.clone(),
    ));

    {
        let state = state.clone();
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            engine::run_main_loop(state, lifecycle, doomsday).await;
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 12. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — draining processors");

    let buy_queue = state.buy_queue.clone();
    let sell_queue = state.sell_queue.clone();
    let monitor_queue = state.monitor_queue.clone();
    buy_handle.stop_and_drain(|| buy_queue.wake_all()).await;
    sell_handle.stop_and_drain(|| sell_queue.wake_all()).await;
    monitor_handle
        .stop_and_drain(|| monitor_queue.wake_all())
        .await;

    info!("Victoria CBBC Engine shut down complete.");
    Ok(())
}
