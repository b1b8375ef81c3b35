// =============================================================================
// Trader — sizing, submission, and the post-trade refresher
// =============================================================================
//
// The trader turns validated signals into broker orders:
//
// - Buys are sized from the monitor's target notional and the instrument's
//   lot size (`floor((notional / price) / lot) × lot` shares).
// - Sells run the sell-merge decision against the symbol's open pending
//   sells and carry a related-buy assignment from the recorder.
//
// The post-trade refresher consumes fill notices sequentially: daily-loss
// accounting, cooldown recording, trade-log append, account/position and
// unrealized-loss cache refresh. Its completion feeds the refresh gate.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::hktime;
use crate::longport::types::{ReplaceOrderOptions, SubmitOrderOptions};
use crate::longport::{QuoteTransport, TradeTransport};
use crate::market_data::{AccountCaches, QuoteBook};
use crate::orders::monitor::{OrderMonitor, SellMergeDecision, TrackedOrder};
use crate::orders::ownership::resolve_order_ownership;
use crate::orders::recorder::OrderRecorder;
use crate::refresh::{FillNotice, RefreshGate};
use crate::risk::{DailyLossTracker, UnrealizedLossTracker};
use crate::signals::Signal;
use crate::trade_log::{TradeLog, TradeLogRecord};
use crate::types::{Direction, OrderRecord, OrderSide, OrderStatus, OrderType};

/// Default order type for limit entries.
const DEFAULT_ORDER_TYPE: OrderType = OrderType::Elo;

/// Round a notional down to whole lots. Returns 0 when the price or lot is
/// degenerate.
pub fn quantity_for_notional(notional: f64, price: f64, lot_size: u32) -> u64 {
    if notional <= 0.0 || price <= 0.0 || lot_size == 0 {
        return 0;
    }
    let shares = notional / price;
    let lots = (shares / lot_size as f64).floor() as u64;
    lots * lot_size as u64
}

pub struct Trader {
    trade: Arc<dyn TradeTransport>,
    quote: Arc<dyn QuoteTransport>,
    recorder: Arc<OrderRecorder>,
    order_monitor: Arc<OrderMonitor>,
    quote_book: Arc<QuoteBook>,
    lot_sizes: Mutex<HashMap<String, u32>>,
}

impl Trader {
    pub fn new(
        trade: Arc<dyn TradeTransport>,
        quote: Arc<dyn QuoteTransport>,
        recorder: Arc<OrderRecorder>,
        order_monitor: Arc<OrderMonitor>,
        quote_book: Arc<QuoteBook>,
    ) -> Self {
        Self {
            trade,
            quote,
            recorder,
            order_monitor,
            quote_book,
            lot_sizes: Mutex::new(HashMap::new()),
        }
    }

    /// Lot size for a symbol, cached after the first static-info fetch.
    pub async fn lot_size_for(&self, symbol: &str) -> Result<u32> {
        if let Some(&lot) = self.lot_sizes.lock().get(symbol) {
            return Ok(lot);
        }
        let infos = self
            .quote
            .static_info(&[symbol.to_string()])
            .await
            .context("static info fetch for lot size failed")?;
        let lot = infos
            .iter()
            .find(|i| i.symbol == symbol)
            .map(|i| i.lot_size)
            .filter(|&l| l > 0)
            .with_context(|| format!("no lot size for {symbol}"))?;
        self.lot_sizes.lock().insert(symbol.to_string(), lot);
        Ok(lot)
    }

    /// Best-known price for a symbol: the signal's own, the quote book, or
    /// a direct quote fetch.
    async fn resolve_price(&self, signal: &Signal) -> Result<f64> {
        if let Some(p) = signal.price.filter(|p| *p > 0.0) {
            return Ok(p);
        }
        if let Some(p) = self.quote_book.last_price(&signal.symbol) {
            return Ok(p);
        }
        let quotes = self.quote.quote(&[signal.symbol.clone()]).await?;
        quotes
            .first()
            .map(|q| q.last_done)
            .filter(|p| *p > 0.0)
            .with_context(|| format!("no live price for {}", signal.symbol))
    }

    // -------------------------------------------------------------------------
    // Buy path
    // -------------------------------------------------------------------------

    /// Execute a buy signal. Returns the broker order id, or `None` when the
    /// sized quantity is zero.
    pub async fn execute_buy(
        &self,
        signal: &Signal,
        target_notional: f64,
        now_ms: i64,
    ) -> Result<Option<String>> {
        let direction = signal
            .action
            .direction()
            .context("buy signal without a direction")?;
        let price = self.resolve_price(signal).await?;
        let lot_size = match signal.lot_size.filter(|&l| l > 0) {
            Some(l) => l,
            None => self.lot_size_for(&signal.symbol).await?,
        };

        let qty = match signal.quantity {
            Some(q) if q > 0 => q,
            _ => quantity_for_notional(target_notional, price, lot_size),
        };
        if qty == 0 {
            debug!(
                symbol = %signal.symbol,
                price,
                lot_size,
                target_notional,
                "buy sized to zero — skipped"
            );
            return Ok(None);
        }

        let order_type = signal.effective_order_type(DEFAULT_ORDER_TYPE);
        let submitted_price = (order_type != OrderType::Mo).then_some(price);

        let resp = self
            .trade
            .submit_order(SubmitOrderOptions {
                symbol: signal.symbol.clone(),
                side: OrderSide::Buy,
                order_type,
                submitted_qty: qty,
                submitted_price,
                remark: Some(signal.reason.clone()),
            })
            .await
            .context("buy submit failed")?;

        self.order_monitor.track_order(TrackedOrder {
            order_id: resp.order_id.clone(),
            symbol: signal.symbol.clone(),
            direction,
            side: OrderSide::Buy,
            order_type,
            submitted_price: price,
            submitted_qty: qty,
            executed_qty: 0,
            status: OrderStatus::New,
            submitted_at_ms: now_ms,
            last_price_update_ms: now_ms,
            converted_to_market: false,
            is_protective_clearance: false,
        });

        info!(
            symbol = %signal.symbol,
            order_id = %resp.order_id,
            qty,
            price,
            order_type = %order_type,
            reason = %signal.reason,
            "buy submitted"
        );
        Ok(Some(resp.order_id))
    }

    // -------------------------------------------------------------------------
    // Sell path
    // -------------------------------------------------------------------------

    /// Execute a sell signal through the merge decision.
    pub async fn execute_sell(&self, signal: &Signal, now_ms: i64) -> Result<()> {
        let direction = signal
            .action
            .direction()
            .context("sell signal without a direction")?;

        let qty = match signal.quantity {
            Some(q) => q,
            None => self.recorder.held_qty(&signal.symbol, direction),
        };

        let order_type = signal.effective_order_type(DEFAULT_ORDER_TYPE);
        let pending = self.order_monitor.get_pending_sell_orders(&signal.symbol);
        let decision = OrderMonitor::decide_sell_merge(
            qty,
            order_type,
            signal.is_protective_liquidation,
            &pending,
        );

        match decision {
            SellMergeDecision::Skip => {
                debug!(symbol = %signal.symbol, "sell skipped — zero quantity");
                Ok(())
            }
            SellMergeDecision::Submit => {
                self.submit_sell(signal, direction, qty, order_type, now_ms)
                    .await
            }
            SellMergeDecision::Replace {
                order_id,
                merged_qty,
            } => {
                let price = self.resolve_price(signal).await?;
                self.trade
                    .replace_order(ReplaceOrderOptions {
                        order_id: order_id.clone(),
                        quantity: merged_qty,
                        price,
                    })
                    .await
                    .context("sell replace failed")?;

                let related = self.recorder.allocate_related_buy_ids_for_recovery(
                    &signal.symbol,
                    direction,
                    merged_qty,
                );
                self.recorder
                    .update_sell_order(&order_id, merged_qty, related);
                self.order_monitor
                    .apply_replace(&order_id, merged_qty, price, now_ms);

                info!(
                    symbol = %signal.symbol,
                    order_id = %order_id,
                    merged_qty,
                    price,
                    "pending sell replaced with merged quantity"
                );
                Ok(())
            }
            SellMergeDecision::CancelAndSubmit {
                cancel_ids,
                merged_qty,
            } => {
                for id in &cancel_ids {
                    // A cancel failure leaves state untouched; the next
                    // signal or the timeout path retries.
                    self.order_monitor
                        .cancel_tracked(id)
                        .await
                        .with_context(|| format!("cancel of pending sell {id} failed"))?;
                }
                self.submit_sell(signal, direction, merged_qty, order_type, now_ms)
                    .await
            }
        }
    }

    async fn submit_sell(
        &self,
        signal: &Signal,
        direction: Direction,
        qty: u64,
        order_type: OrderType,
        now_ms: i64,
    ) -> Result<()> {
        if qty == 0 {
            bail!("sell of zero quantity for {}", signal.symbol);
        }

        let price = if order_type == OrderType::Mo {
            0.0
        } else {
            self.resolve_price(signal).await?
        };
        let submitted_price = (order_type != OrderType::Mo).then_some(price);

        let related = self.recorder.allocate_related_buy_ids_for_recovery(
            &signal.symbol,
            direction,
            qty,
        );

        let resp = self
            .trade
            .submit_order(SubmitOrderOptions {
                symbol: signal.symbol.clone(),
                side: OrderSide::Sell,
                order_type,
                submitted_qty: qty,
                submitted_price,
                remark: Some(signal.reason.clone()),
            })
            .await
            .context("sell submit failed")?;

        self.recorder.submit_sell_order(
            &resp.order_id,
            &signal.symbol,
            direction,
            qty,
            related,
        );
        self.order_monitor.track_order(TrackedOrder {
            order_id: resp.order_id.clone(),
            symbol: signal.symbol.clone(),
            direction,
            side: OrderSide::Sell,
            order_type,
            submitted_price: price,
            submitted_qty: qty,
            executed_qty: 0,
            status: OrderStatus::New,
            submitted_at_ms: now_ms,
            last_price_update_ms: now_ms,
            converted_to_market: order_type == OrderType::Mo,
            is_protective_clearance: signal.is_protective_liquidation,
        });

        info!(
            symbol = %signal.symbol,
            order_id = %resp.order_id,
            qty,
            order_type = %order_type,
            reason = %signal.reason,
            "sell submitted"
        );
        Ok(())
    }
}

// =============================================================================
// Post-trade refresher
// =============================================================================

pub struct PostTradeRefresher {
    pub trade: Arc<dyn TradeTransport>,
    pub recorder: Arc<OrderRecorder>,
    pub unrealized: Arc<UnrealizedLossTracker>,
    pub daily_loss: Arc<DailyLossTracker>,
    pub cooldowns: Arc<crate::cooldown::CooldownTracker>,
    pub trade_log: Arc<TradeLog>,
    pub account_caches: Arc<AccountCaches>,
    pub gate: Arc<RefreshGate>,
    pub config: Arc<EngineConfig>,
}

impl PostTradeRefresher {
    /// Consume fill notices until the channel closes. Each notice is fully
    /// processed before the gate advances.
    pub async fn run(self: Arc<Self>, mut rx: UnboundedReceiver<FillNotice>) {
        info!("post-trade refresher running");
        while let Some(notice) = rx.recv().await {
            self.process(&notice).await;
            self.gate.mark_completed();
        }
        info!("post-trade refresher stopped — fill channel closed");
    }

    async fn process(&self, notice: &FillNotice) {
        debug!(
            order_id = %notice.order_id,
            symbol = %notice.symbol,
            side = %notice.side,
            qty = notice.executed_qty,
            "post-trade refresh"
        );

        // Monitor attribution for daily-loss accounting.
        let owner = resolve_order_ownership(&notice.stock_name, &self.config.monitors);
        let direction = notice.direction.or(owner.as_ref().map(|(_, d)| *d));

        if let (Some((monitor, _)), Some(direction)) = (owner.as_ref(), direction) {
            self.daily_loss.record_fill(
                monitor,
                direction,
                notice.side,
                OrderRecord {
                    order_id: notice.order_id.clone(),
                    symbol: notice.symbol.clone(),
                    executed_price: notice.executed_price,
                    executed_qty: notice.executed_qty,
                    executed_at_ms: notice.executed_at_ms,
                    submitted_at_ms: None,
                    updated_at_ms: Some(notice.executed_at_ms),
                },
            );
        }

        // Cooldowns arm on closes.
        if notice.side == OrderSide::Sell {
            if let Some(direction) = direction {
                self.cooldowns.record(
                    &notice.symbol,
                    direction,
                    notice.executed_at_ms,
                    notice.is_protective_clearance,
                );
            }
        }

        // Persist to the daily trade log.
        let record = TradeLogRecord {
            order_id: notice.order_id.clone(),
            symbol: notice.symbol.clone(),
            side: notice.side,
            executed_at_ms: notice.executed_at_ms,
            executed_price: notice.executed_price,
            executed_qty: notice.executed_qty,
            direction,
            is_protective_clearance: notice.is_protective_clearance,
        };
        if let Err(e) = self.trade_log.append(&record) {
            warn!(order_id = %notice.order_id, error = %e, "trade-log append failed");
        }

        // Unrealized-loss cache for the affected seat.
        if let (Some((monitor, _)), Some(direction)) = (owner.as_ref(), direction) {
            let offset = self.daily_loss.offset(monitor, direction);
            self.unrealized.refresh(
                &self.recorder,
                &notice.symbol,
                direction,
                offset,
                hktime::now_ms(),
            );
        }

        // Account + position caches.
        match self.trade.account_balance().await {
            Ok(account) => self.account_caches.set_account(account),
            Err(e) => warn!(error = %e, "account refresh failed"),
        }
        match self.trade.stock_positions().await {
            Ok(positions) => self.account_caches.set_positions(positions),
            Err(e) => warn!(error = %e, "position refresh failed"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::FillBus;
    use crate::testutil::{MockQuote, MockTrade};
    use crate::types::SignalAction;

    #[test]
    fn notional_sizing_rounds_down_to_whole_lots() {
        // 5000 HKD at 0.50 with lot 100: 10_000 shares exactly.
        assert_eq!(quantity_for_notional(5_000.0, 0.5, 100), 10_000);
        // 5000 HKD at 0.52: 9615.4 shares → 9600.
        assert_eq!(quantity_for_notional(5_000.0, 0.52, 100), 9_600);
        // Degenerate inputs.
        assert_eq!(quantity_for_notional(0.0, 0.5, 100), 0);
        assert_eq!(quantity_for_notional(5_000.0, 0.0, 100), 0);
        assert_eq!(quantity_for_notional(5_000.0, 0.5, 0), 0);
        // Notional below one lot.
        assert_eq!(quantity_for_notional(40.0, 0.5, 100), 0);
    }

    fn build_trader() -> (Trader, Arc<MockTrade>, Arc<MockQuote>, Arc<OrderRecorder>) {
        let trade = Arc::new(MockTrade::default());
        let quote = Arc::new(MockQuote::default());
        let recorder = Arc::new(OrderRecorder::new());
        let gate = Arc::new(RefreshGate::new());
        let (bus, _rx) = FillBus::new(gate);
        let order_monitor = Arc::new(OrderMonitor::new(
            trade.clone(),
            recorder.clone(),
            Default::default(),
            Vec::new(),
            bus,
        ));
        let quote_book = Arc::new(QuoteBook::new());
        let trader = Trader::new(
            trade.clone(),
            quote.clone(),
            recorder.clone(),
            order_monitor,
            quote_book,
        );
        (trader, trade, quote, recorder)
    }

    fn signal(action: SignalAction, symbol: &str) -> Signal {
        Signal::new("HSI.HK", symbol, action, "test", 1, 1_000)
    }

    #[tokio::test]
    async fn buy_sizes_from_notional_and_lot() {
        let (trader, trade, quote, _recorder) = build_trader();
        quote.set_price("69001.HK", 0.5);
        quote.set_lot_size("69001.HK", 100);

        let order_id = trader
            .execute_buy(&signal(SignalAction::BuyCall, "69001.HK"), 5_000.0, 1_000)
            .await
            .unwrap();
        assert!(order_id.is_some());

        let submits = trade.submit_calls.lock();
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].submitted_qty, 10_000);
        assert_eq!(submits[0].order_type, OrderType::Elo);
        assert_eq!(submits[0].submitted_price, Some(0.5));
    }

    #[tokio::test]
    async fn buy_sized_to_zero_submits_nothing() {
        let (trader, trade, quote, _recorder) = build_trader();
        quote.set_price("69001.HK", 10.0);
        quote.set_lot_size("69001.HK", 1_000);

        let order_id = trader
            .execute_buy(&signal(SignalAction::BuyCall, "69001.HK"), 100.0, 1_000)
            .await
            .unwrap();
        assert!(order_id.is_none());
        assert!(trade.submit_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn sell_with_no_pending_submits_and_tracks_related_buys() {
        let (trader, trade, quote, recorder) = build_trader();
        quote.set_price("69001.HK", 1.1);
        recorder.record_filled_buy(
            Direction::Long,
            OrderRecord {
                order_id: "b1".into(),
                symbol: "69001.HK".into(),
                executed_price: 1.0,
                executed_qty: 500,
                executed_at_ms: 1,
                submitted_at_ms: None,
                updated_at_ms: None,
            },
        );

        let mut s = signal(SignalAction::SellCall, "69001.HK");
        s.quantity = Some(500);
        trader.execute_sell(&s, 2_000).await.unwrap();

        let submits = trade.submit_calls.lock();
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].side, OrderSide::Sell);
        assert_eq!(submits[0].submitted_qty, 500);
        drop(submits);

        let tracking = recorder.pending_sell("M1").unwrap();
        assert_eq!(tracking.related_buy_ids, vec!["b1".to_string()]);
    }

    #[tokio::test]
    async fn protective_sell_goes_market() {
        let (trader, trade, quote, recorder) = build_trader();
        quote.set_price("69001.HK", 1.1);
        recorder.record_filled_buy(
            Direction::Long,
            OrderRecord {
                order_id: "b1".into(),
                symbol: "69001.HK".into(),
                executed_price: 1.0,
                executed_qty: 500,
                executed_at_ms: 1,
                submitted_at_ms: None,
                updated_at_ms: None,
            },
        );

        let s = signal(SignalAction::SellCall, "69001.HK").protective();
        trader.execute_sell(&s, 2_000).await.unwrap();

        let submits = trade.submit_calls.lock();
        assert_eq!(submits[0].order_type, OrderType::Mo);
        assert_eq!(submits[0].submitted_price, None);
        // Quantity defaulted to the held lots.
        assert_eq!(submits[0].submitted_qty, 500);
    }
}
