// =============================================================================
// Cache Domains — what midnight clears and the open rebuilds
// =============================================================================
//
// The day-lifecycle manager drives these in registration order for the
// midnight clear and reverse order for the open rebuild:
//
//   1. IndicatorDomain — indicator rings, K-line fingerprints, pending
//      verifications, quote book.
//   2. SeatDomain — failure counts, freezes, same-day switch suppression.
//   3. OrderDomain — recorder state; rebuilt from the full broker history
//      through ownership resolution and the smart-close filter.
//   4. CooldownDomain — cooldown entries; rehydrated from the trade log.
//   5. AccountDomain — account/position/unrealized caches; refetched.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::lifecycle::{CacheDomain, DomainContext};
use crate::orders::ownership::resolve_order_ownership;
use crate::orders::recorder::OrderRecorder;
use crate::seats::switcher::SeatSwitcher;
use crate::types::{Direction, OrderStatus};

// =============================================================================
// Indicator domain
// =============================================================================

pub struct IndicatorDomain {
    pub state: Arc<AppState>,
}

#[async_trait]
impl CacheDomain for IndicatorDomain {
    fn name(&self) -> &str {
        "indicators"
    }

    async fn midnight_clear(&self, _ctx: &DomainContext) -> Result<()> {
        let cancelled = self.state.verifier.cancel_all();
        self.state.indicator_cache.clear_all();
        self.state.kline_cache.clear();
        self.state.quote_book.clear();
        debug!(cancelled, "indicator domain cleared");
        Ok(())
    }

    async fn open_rebuild(&self, _ctx: &DomainContext) -> Result<()> {
        // Indicator history refills naturally from the per-second loop.
        Ok(())
    }
}

// =============================================================================
// Seat domain
// =============================================================================

pub struct SeatDomain {
    pub state: Arc<AppState>,
    pub switcher: Arc<SeatSwitcher>,
}

#[async_trait]
impl CacheDomain for SeatDomain {
    fn name(&self) -> &str {
        "seats"
    }

    async fn midnight_clear(&self, _ctx: &DomainContext) -> Result<()> {
        self.state.registry.midnight_clear();
        self.switcher.suppression().clear_all();
        Ok(())
    }

    async fn open_rebuild(&self, _ctx: &DomainContext) -> Result<()> {
        // Re-assert quote subscriptions for every bound warrant.
        let symbols = self.state.registry.bound_symbols();
        if !symbols.is_empty() {
            self.state.quote.subscribe(&symbols).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Order domain
// =============================================================================

pub struct OrderDomain {
    pub state: Arc<AppState>,
}

#[async_trait]
impl CacheDomain for OrderDomain {
    fn name(&self) -> &str {
        "orders"
    }

    async fn midnight_clear(&self, _ctx: &DomainContext) -> Result<()> {
        self.state.recorder.clear_all();
        self.state.daily_loss.reset_all(crate::hktime::now_ms());
        Ok(())
    }

    async fn open_rebuild(&self, ctx: &DomainContext) -> Result<()> {
        rebuild_orders_from_broker(&self.state, ctx.now_ms).await
    }
}

/// Replay the full broker history into the recorder and daily-loss tracker.
pub async fn rebuild_orders_from_broker(state: &Arc<AppState>, now_ms: i64) -> Result<()> {
    let raw = state
        .recorder
        .fetch_all_orders(state.trade.as_ref(), true)
        .await?;

    // Daily-loss first so the unrealized refresh below sees today's offsets.
    state
        .daily_loss
        .recalculate_from_all_orders(&raw, &state.config.monitors, now_ms);

    // Group filled rows by (warrant symbol, direction), remembering the
    // owning monitor for the offset lookup.
    let mut grouped: HashMap<(String, Direction), (String, Vec<crate::longport::types::RawOrder>)> =
        HashMap::new();
    for row in &raw {
        if row.status != OrderStatus::Filled {
            continue;
        }
        if let Some((monitor, direction)) =
            resolve_order_ownership(&row.stock_name, &state.config.monitors)
        {
            grouped
                .entry((row.symbol.clone(), direction))
                .or_insert_with(|| (monitor, Vec::new()))
                .1
                .push(row.clone());
        }
    }

    for ((symbol, direction), (monitor, rows)) in grouped {
        let classified = OrderRecorder::classify_and_convert(&rows);
        state
            .recorder
            .rebuild_seat(&symbol, direction, &classified.buys, &classified.sells);

        let offset = state.daily_loss.offset(&monitor, direction);
        state
            .unrealized
            .refresh(&state.recorder, &symbol, direction, offset, now_ms);
    }

    info!(orders = raw.len(), "order state rebuilt from broker history");
    Ok(())
}

// =============================================================================
// Cooldown domain
// =============================================================================

pub struct CooldownDomain {
    pub state: Arc<AppState>,
}

#[async_trait]
impl CacheDomain for CooldownDomain {
    fn name(&self) -> &str {
        "cooldowns"
    }

    async fn midnight_clear(&self, _ctx: &DomainContext) -> Result<()> {
        self.state.cooldowns.clear_all();
        Ok(())
    }

    async fn open_rebuild(&self, ctx: &DomainContext) -> Result<()> {
        self.state
            .cooldowns
            .hydrate_from_log(&self.state.trade_log, &ctx.day_key);
        Ok(())
    }
}

// =============================================================================
// Account domain
// =============================================================================

pub struct AccountDomain {
    pub state: Arc<AppState>,
}

#[async_trait]
impl CacheDomain for AccountDomain {
    fn name(&self) -> &str {
        "account"
    }

    async fn midnight_clear(&self, _ctx: &DomainContext) -> Result<()> {
        self.state.account_caches.clear();
        self.state.unrealized.clear_all();
        Ok(())
    }

    async fn open_rebuild(&self, _ctx: &DomainContext) -> Result<()> {
        let account = self.state.trade.account_balance().await?;
        self.state.account_caches.set_account(account);
        let positions = self.state.trade.stock_positions().await?;
        self.state.account_caches.set_positions(positions);
        Ok(())
    }
}

/// Build the registered domain list in its canonical order.
pub fn build_domains(state: Arc<AppState>, switcher: Arc<SeatSwitcher>) -> Vec<Arc<dyn CacheDomain>> {
    vec![
        Arc::new(IndicatorDomain {
            state: state.clone(),
        }),
        Arc::new(SeatDomain {
            state: state.clone(),
            switcher,
        }),
        Arc::new(OrderDomain {
            state: state.clone(),
        }),
        Arc::new(CooldownDomain {
            state: state.clone(),
        }),
        Arc::new(AccountDomain { state }),
    ]
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockQuote, MockTrade};
    use crate::types::{OrderSide, OrderType};

    fn raw_order(
        id: &str,
        name: &str,
        side: OrderSide,
        qty: u64,
        price: f64,
        at: i64,
    ) -> crate::longport::types::RawOrder {
        crate::longport::types::RawOrder {
            order_id: id.to_string(),
            symbol: "69001.HK".into(),
            stock_name: name.to_string(),
            side,
            status: OrderStatus::Filled,
            order_type: OrderType::Lo,
            price,
            quantity: qty,
            executed_qty: qty,
            executed_price: price,
            submitted_at_ms: at - 1000,
            updated_at_ms: at,
        }
    }

    #[tokio::test]
    async fn order_rebuild_restores_held_lots() {
        let trade = Arc::new(MockTrade::default());
        let now = crate::hktime::now_ms();
        *trade.today.lock() = vec![
            raw_order("b1", "HSI RC2606A", OrderSide::Buy, 500, 1.0, now - 5000),
            raw_order("b2", "HSI RC2606A", OrderSide::Buy, 300, 1.2, now - 3000),
            raw_order("s1", "HSI RC2606A", OrderSide::Sell, 500, 1.1, now - 1000),
        ];

        let config: crate::config::EngineConfig = serde_json::from_value(serde_json::json!({
            "monitors": [{
                "symbol": "HSI.HK",
                "ownership_keys": ["HSI"],
            }]
        }))
        .unwrap();

        let (state, _rx) = AppState::new(config, Arc::new(MockQuote::default()), trade);
        rebuild_orders_from_broker(&state, now).await.unwrap();

        // s1 (500) consumes everything before it except the pricier lot
        // that survives whole-lot elimination: buys_before = 800, target
        // 300 ⇒ drop the cheaper 500-lot, keep b2.
        let held = state
            .recorder
            .get_buy_orders_for_symbol("69001.HK", Direction::Long);
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].order_id, "b2");
    }

    #[tokio::test]
    async fn midnight_then_rebuild_roundtrip() {
        let trade = Arc::new(MockTrade::default());
        let config: crate::config::EngineConfig = serde_json::from_value(serde_json::json!({
            "monitors": [{ "symbol": "HSI.HK", "long_symbol": "69001.HK", "short_symbol": "69002.HK" }]
        }))
        .unwrap();
        let (state, _rx) = AppState::new(config, Arc::new(MockQuote::default()), trade);

        // Seed some state that midnight must drop.
        state.cooldowns.record("69001.HK", Direction::Long, 1, false);
        state
            .indicator_cache
            .push("HSI.HK", 1, &crate::indicators::IndicatorSnapshot::default());

        let switcher = Arc::new(SeatSwitcher::new(
            state.registry.clone(),
            Arc::new(crate::seats::finder::AutoSymbolFinder::new()),
            state.verifier.clone(),
            state.order_monitor.clone(),
            state.recorder.clone(),
            state.quote.clone(),
            state.buy_queue.clone(),
            state.sell_queue.clone(),
        ));
        let domains = build_domains(state.clone(), switcher);
        let ctx = DomainContext {
            now_ms: crate::hktime::now_ms(),
            day_key: "2026-02-16".to_string(),
        };

        for d in &domains {
            d.midnight_clear(&ctx).await.unwrap();
        }
        assert!(state.cooldowns.is_empty());
        assert!(state.indicator_cache.is_empty("HSI.HK"));

        for d in domains.iter().rev() {
            d.open_rebuild(&ctx).await.unwrap();
        }
        // Account cache refetched from the mock.
        assert!(state.account_caches.account().is_some());
    }
}
