// =============================================================================
// Shared types used across the Victoria CBBC engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Which side of a monitor a seat (and its warrant) serves.
///
/// `Long` holds a bull CBBC, `Short` a bear CBBC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn is_long(self) -> bool {
        matches!(self, Self::Long)
    }

    /// Iterate both directions in a stable order.
    pub fn both() -> [Direction; 2] {
        [Direction::Long, Direction::Short]
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// A trading signal's intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalAction {
    BuyCall,
    BuyPut,
    SellCall,
    SellPut,
    Hold,
}

impl SignalAction {
    /// The seat direction this action targets (`None` for `Hold`).
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::BuyCall | Self::SellCall => Some(Direction::Long),
            Self::BuyPut | Self::SellPut => Some(Direction::Short),
            Self::Hold => None,
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self, Self::BuyCall | Self::BuyPut)
    }

    pub fn is_sell(self) -> bool {
        matches!(self, Self::SellCall | Self::SellPut)
    }

    /// Up-trend actions expect the monitor's indicators to keep rising
    /// (buying a bull, or closing a bear into strength). The delayed-signal
    /// verifier checks strict increase for these and strict decrease for the
    /// rest.
    pub fn is_up_trend(self) -> bool {
        matches!(self, Self::BuyCall | Self::SellPut)
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuyCall => write!(f, "BUYCALL"),
            Self::BuyPut => write!(f, "BUYPUT"),
            Self::SellCall => write!(f, "SELLCALL"),
            Self::SellPut => write!(f, "SELLPUT"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Broker order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// HK order types supported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Limit order.
    Lo,
    /// Enhanced limit order.
    Elo,
    /// At-auction limit order.
    Alo,
    /// Special limit order.
    Slo,
    /// Market order.
    Mo,
}

impl OrderType {
    /// Whether a price-replacement request may be sent for this type.
    ///
    /// Conservative: only the explicitly allowed limit types. Market orders
    /// and anything unrecognised are never replaced.
    pub fn is_replaceable(self) -> bool {
        matches!(self, Self::Lo | Self::Elo | Self::Alo | Self::Slo)
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lo => write!(f, "LO"),
            Self::Elo => write!(f, "ELO"),
            Self::Alo => write!(f, "ALO"),
            Self::Slo => write!(f, "SLO"),
            Self::Mo => write!(f, "MO"),
        }
    }
}

/// Broker order status as delivered by pushes and order queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    WaitToNew,
    PartialFilled,
    Filled,
    WaitToReplace,
    PendingReplace,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses never regress; later pushes for the same order are
    /// ignored once one of these has been seen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }

    /// Statuses that count as "still pending" for sell-merge decisions and
    /// pending-order snapshots.
    pub fn is_active_pending(self) -> bool {
        matches!(
            self,
            Self::New
                | Self::WaitToNew
                | Self::PartialFilled
                | Self::WaitToReplace
                | Self::PendingReplace
        )
    }

    /// Statuses during which a replace request must not be issued.
    pub fn is_replace_blocked(self) -> bool {
        matches!(self, Self::WaitToReplace | Self::PendingReplace)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "New",
            Self::WaitToNew => "WaitToNew",
            Self::PartialFilled => "PartialFilled",
            Self::Filled => "Filled",
            Self::WaitToReplace => "WaitToReplace",
            Self::PendingReplace => "PendingReplace",
            Self::Canceled => "Canceled",
            Self::Rejected => "Rejected",
        };
        write!(f, "{s}")
    }
}

/// One OHLCV bar of a monitor symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
}

/// A fully executed order as kept by the order recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    /// Normalised instrument code, e.g. `69001.HK`.
    pub symbol: String,
    pub executed_price: f64,
    pub executed_qty: u64,
    /// Execution time in epoch milliseconds. Always non-zero.
    pub executed_at_ms: i64,
    pub submitted_at_ms: Option<i64>,
    pub updated_at_ms: Option<i64>,
}

/// Snapshot of a live (not yet terminal) order, as handed to sell-merge
/// decisions and pending-order queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub submitted_price: f64,
    pub submitted_qty: u64,
    pub executed_qty: u64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub submitted_at_ms: i64,
}

impl PendingOrder {
    /// Quantity still open on this order.
    pub fn remaining_qty(&self) -> u64 {
        self.submitted_qty.saturating_sub(self.executed_qty)
    }
}
