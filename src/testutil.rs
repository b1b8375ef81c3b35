// =============================================================================
// Test Support — scripted broker transports
// =============================================================================
//
// Compiled only for tests. `MockQuote` / `MockTrade` implement the broker
// traits over in-memory state so order-lifecycle, seat-switching, and
// scenario tests run fully offline.

#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::longport::types::{
    AccountBalance, CandlePeriod, ExpiryFilter, QuoteSnapshot, RawOrder, ReplaceOrderOptions,
    StaticInfo, StockPosition, SubmitOrderOptions, SubmitOrderResponse, TradingDays, WarrantInfo,
    WarrantType,
};
use crate::longport::{QuoteTransport, TradeTransport};
use crate::types::Kline;

/// Scripted trade transport: records calls, can fail the first N cancels
/// or submits.
#[derive(Default)]
pub struct MockTrade {
    pub cancel_calls: Mutex<Vec<String>>,
    pub cancel_failures_remaining: Mutex<u32>,
    pub submit_calls: Mutex<Vec<SubmitOrderOptions>>,
    pub submit_failures_remaining: Mutex<u32>,
    pub replace_calls: Mutex<Vec<ReplaceOrderOptions>>,
    pub next_order_id: Mutex<u32>,
    pub today: Mutex<Vec<RawOrder>>,
    pub history: Mutex<Vec<RawOrder>>,
    pub account: Mutex<Option<AccountBalance>>,
    pub positions: Mutex<Vec<StockPosition>>,
}

impl MockTrade {
    pub fn submitted_order_ids(&self) -> Vec<String> {
        (1..=*self.next_order_id.lock())
            .map(|i| format!("M{i}"))
            .collect()
    }
}

#[async_trait]
impl TradeTransport for MockTrade {
    async fn submit_order(&self, opts: SubmitOrderOptions) -> Result<SubmitOrderResponse> {
        {
            let mut failures = self.submit_failures_remaining.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(anyhow!("scripted submit failure"));
            }
        }
        self.submit_calls.lock().push(opts);
        let mut next = self.next_order_id.lock();
        *next += 1;
        Ok(SubmitOrderResponse {
            order_id: format!("M{}", *next),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut failures = self.cancel_failures_remaining.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(anyhow!("scripted cancel failure"));
        }
        drop(failures);
        self.cancel_calls.lock().push(order_id.to_string());
        Ok(())
    }

    async fn replace_order(&self, opts: ReplaceOrderOptions) -> Result<()> {
        self.replace_calls.lock().push(opts);
        Ok(())
    }

    async fn today_orders(&self) -> Result<Vec<RawOrder>> {
        Ok(self.today.lock().clone())
    }

    async fn history_orders(&self, _start_at_ms: i64) -> Result<Vec<RawOrder>> {
        Ok(self.history.lock().clone())
    }

    async fn account_balance(&self) -> Result<AccountBalance> {
        Ok(self.account.lock().clone().unwrap_or(AccountBalance {
            currency: "HKD".into(),
            total_cash: 100_000.0,
            net_assets: 100_000.0,
            buy_power: 100_000.0,
        }))
    }

    async fn stock_positions(&self) -> Result<Vec<StockPosition>> {
        Ok(self.positions.lock().clone())
    }
}

/// Scripted quote transport backed by in-memory maps.
#[derive(Default)]
pub struct MockQuote {
    pub prices: Mutex<HashMap<String, f64>>,
    pub lot_sizes: Mutex<HashMap<String, u32>>,
    pub klines: Mutex<HashMap<String, Vec<Kline>>>,
    pub warrants: Mutex<Vec<WarrantInfo>>,
    pub trading_days: Mutex<TradingDays>,
    pub subscribe_calls: Mutex<Vec<String>>,
    pub unsubscribe_calls: Mutex<Vec<String>>,
    pub warrant_list_calls: Mutex<u32>,
}

impl MockQuote {
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().insert(symbol.to_string(), price);
    }

    pub fn set_lot_size(&self, symbol: &str, lot: u32) {
        self.lot_sizes.lock().insert(symbol.to_string(), lot);
    }
}

#[async_trait]
impl QuoteTransport for MockQuote {
    async fn quote(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>> {
        let prices = self.prices.lock();
        Ok(symbols
            .iter()
            .filter_map(|s| {
                prices.get(s).map(|&p| QuoteSnapshot {
                    symbol: s.clone(),
                    last_done: p,
                    open: p,
                    high: p,
                    low: p,
                    volume: 1_000.0,
                    turnover: p * 1_000.0,
                    ts_ms: 0,
                })
            })
            .collect())
    }

    async fn static_info(&self, symbols: &[String]) -> Result<Vec<StaticInfo>> {
        let lots = self.lot_sizes.lock();
        Ok(symbols
            .iter()
            .map(|s| StaticInfo {
                symbol: s.clone(),
                name_cn: s.clone(),
                name_en: s.clone(),
                lot_size: lots.get(s).copied().unwrap_or(100),
            })
            .collect())
    }

    async fn realtime_candlesticks(
        &self,
        symbol: &str,
        _period: CandlePeriod,
        count: usize,
    ) -> Result<Vec<Kline>> {
        let klines = self.klines.lock();
        let bars = klines.get(symbol).cloned().unwrap_or_default();
        let start = bars.len().saturating_sub(count);
        Ok(bars[start..].to_vec())
    }

    async fn trading_days(&self, _market: &str, _begin: &str, _end: &str) -> Result<TradingDays> {
        Ok(self.trading_days.lock().clone())
    }

    async fn warrant_list(
        &self,
        _symbol: &str,
        warrant_type: WarrantType,
        _expiry: &[ExpiryFilter],
    ) -> Result<Vec<WarrantInfo>> {
        *self.warrant_list_calls.lock() += 1;
        Ok(self
            .warrants
            .lock()
            .iter()
            .filter(|w| w.warrant_type == warrant_type)
            .cloned()
            .collect())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        self.subscribe_calls.lock().extend(symbols.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        self.unsubscribe_calls
            .lock()
            .extend(symbols.iter().cloned());
        Ok(())
    }
}
