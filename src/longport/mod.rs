// =============================================================================
// Longport Broker Layer
// =============================================================================
//
// The engine talks to the broker exclusively through the `QuoteTransport`
// and `TradeTransport` traits below. `LongportClient` is the production
// implementation (signed REST + push WebSocket); tests substitute scripted
// mocks so every order-lifecycle and risk path can be driven offline.

pub mod client;
pub mod throttle;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Kline;
use self::types::{
    AccountBalance, CandlePeriod, ExpiryFilter, QuoteSnapshot, RawOrder, ReplaceOrderOptions,
    StaticInfo, StockPosition, SubmitOrderOptions, SubmitOrderResponse, TradingDays, WarrantInfo,
    WarrantType,
};

/// Market-data side of the broker.
#[async_trait]
pub trait QuoteTransport: Send + Sync {
    /// Batch real-time quotes.
    async fn quote(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>>;

    /// Static instrument properties (lot size, names).
    async fn static_info(&self, symbols: &[String]) -> Result<Vec<StaticInfo>>;

    /// The most recent `count` candlesticks for a symbol.
    async fn realtime_candlesticks(
        &self,
        symbol: &str,
        period: CandlePeriod,
        count: usize,
    ) -> Result<Vec<Kline>>;

    /// Trading calendar between two `YYYY-MM-DD` (inclusive) bounds.
    async fn trading_days(&self, market: &str, begin: &str, end: &str) -> Result<TradingDays>;

    /// Warrant list for an underlying, filtered server-side by type and
    /// expiry buckets.
    async fn warrant_list(
        &self,
        symbol: &str,
        warrant_type: WarrantType,
        expiry: &[ExpiryFilter],
    ) -> Result<Vec<WarrantInfo>>;

    /// Maintain the push subscription set.
    async fn subscribe(&self, symbols: &[String]) -> Result<()>;
    async fn unsubscribe(&self, symbols: &[String]) -> Result<()>;
}

/// Trading side of the broker.
#[async_trait]
pub trait TradeTransport: Send + Sync {
    async fn submit_order(&self, opts: SubmitOrderOptions) -> Result<SubmitOrderResponse>;

    /// Cancel an order. A response meaning "already filled/cancelled" is a
    /// success; a transport failure is an error and the caller must not
    /// assume the order is gone.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn replace_order(&self, opts: ReplaceOrderOptions) -> Result<()>;

    async fn today_orders(&self) -> Result<Vec<RawOrder>>;

    /// Historical orders from `start_at_ms` to now, oldest page first.
    async fn history_orders(&self, start_at_ms: i64) -> Result<Vec<RawOrder>>;

    async fn account_balance(&self) -> Result<AccountBalance>;

    async fn stock_positions(&self) -> Result<Vec<StockPosition>>;
}
