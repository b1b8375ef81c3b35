// =============================================================================
// Longport OpenAPI wire types
// =============================================================================
//
// Typed views over the broker's quote/trade payloads. Numeric fields arrive
// as JSON strings on most endpoints; the client parses them before these
// structs are built, so everything here is already `f64`/`u64`.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{OrderSide, OrderStatus, OrderType};

/// Real-time quote for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub last_done: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub turnover: f64,
    pub ts_ms: i64,
}

/// Static instrument properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticInfo {
    pub symbol: String,
    pub name_cn: String,
    pub name_en: String,
    pub lot_size: u32,
}

/// CBBC side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarrantType {
    Bull,
    Bear,
}

impl std::fmt::Display for WarrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "Bull"),
            Self::Bear => write!(f, "Bear"),
        }
    }
}

/// Listing status of a warrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarrantStatus {
    Normal,
    Suspend,
    PrepareList,
    Delisted,
}

/// Warrant-list expiry buckets understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpiryFilter {
    Between3And6Months,
    Between6And12Months,
    GreaterThan12Months,
}

/// Derive the expiry bucket set from a monitor's `expiry_min_months` floor.
///
/// A floor of up to 3 months accepts everything beyond 3 months out; up to 6
/// months drops the nearest bucket; anything longer keeps only the >12 m one.
pub fn derive_expiry_filters(expiry_min_months: u32) -> Vec<ExpiryFilter> {
    match expiry_min_months {
        0..=3 => vec![
            ExpiryFilter::Between3And6Months,
            ExpiryFilter::Between6And12Months,
            ExpiryFilter::GreaterThan12Months,
        ],
        4..=6 => vec![
            ExpiryFilter::Between6And12Months,
            ExpiryFilter::GreaterThan12Months,
        ],
        _ => vec![ExpiryFilter::GreaterThan12Months],
    }
}

/// One row of the warrant-list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarrantInfo {
    pub symbol: String,
    pub name: String,
    pub warrant_type: WarrantType,
    pub status: WarrantStatus,
    /// Recall (call) price of the CBBC.
    pub call_price: f64,
    /// Absolute distance from the underlying to the call price.
    pub to_call_price: f64,
    pub expiry_date: String,
    /// Cumulative turnover today, HKD.
    pub turnover: f64,
    pub last_done: f64,
}

/// Candlestick period for `realtime_candlesticks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandlePeriod {
    OneMinute,
    FiveMinute,
    FifteenMinute,
    Day,
}

impl CandlePeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinute => "5m",
            Self::FifteenMinute => "15m",
            Self::Day => "1d",
        }
    }
}

/// Trading-calendar response: full days and half days, HK date keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingDays {
    pub trading_days: Vec<String>,
    pub half_trading_days: Vec<String>,
}

/// Parameters for `submit_order`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOrderOptions {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub submitted_qty: u64,
    /// Required for limit types, ignored for MO.
    pub submitted_price: Option<f64>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrderResponse {
    pub order_id: String,
}

/// Parameters for `replace_order`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaceOrderOptions {
    pub order_id: String,
    pub quantity: u64,
    pub price: f64,
}

/// One order row from `today_orders` / `history_orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOrder {
    pub order_id: String,
    pub symbol: String,
    /// Broker display name, e.g. `HSI RP2602A` — consumed by ownership
    /// resolution.
    pub stock_name: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub price: f64,
    pub quantity: u64,
    pub executed_qty: u64,
    pub executed_price: f64,
    pub submitted_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Account balance summary for one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub currency: String,
    pub total_cash: f64,
    pub net_assets: f64,
    pub buy_power: f64,
}

/// One held position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPosition {
    pub symbol: String,
    pub symbol_name: String,
    pub quantity: u64,
    pub cost_price: f64,
}

/// An order-changed push from the trade WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderChangedEvent {
    pub order_id: String,
    pub symbol: String,
    pub stock_name: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub submitted_qty: u64,
    pub submitted_price: f64,
    pub executed_qty: u64,
    pub executed_price: f64,
    pub updated_at_ms: i64,
}

/// Everything that can arrive over the push connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Quote(QuoteSnapshot),
    OrderChanged(OrderChangedEvent),
}
