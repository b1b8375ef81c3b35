// =============================================================================
// Signals — the unit of intent between strategy and execution
// =============================================================================
//
// A `Signal` carries everything the buy/sell processors need to act, plus
// the seat version observed at emission time. Processors re-validate that
// version before touching the broker; a stale signal is dropped, never
// executed.
//
// Strategy is pluggable behind the `Strategy` trait; `RuleStrategy` is the
// built-in implementation driven by per-monitor indicator rules.

pub mod verifier;

use serde::Serialize;
use uuid::Uuid;

use crate::config::{ConditionOp, MonitorConfig, SignalDispatch};
use crate::indicators::IndicatorSnapshot;
use crate::seats::SeatSnapshot;
use crate::types::{OrderType, SignalAction};

/// How the executed order's type is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderTypeChoice {
    /// Engine default (enhanced limit at the live quote).
    Default,
    /// Protective path: always a market order.
    Protective,
    /// Explicit override.
    Override(OrderType),
}

impl Default for OrderTypeChoice {
    fn default() -> Self {
        Self::Default
    }
}

/// One trading intent.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: String,
    /// Monitor symbol that produced this signal.
    pub monitor: String,
    /// Warrant the signal targets; must still match the seat at execution.
    pub symbol: String,
    pub symbol_name: Option<String>,
    pub action: SignalAction,
    pub reason: String,
    /// Seat version captured at emission.
    pub seat_version: u64,
    pub trigger_time_ms: i64,
    pub price: Option<f64>,
    pub lot_size: Option<u32>,
    /// Explicit quantity; `None` lets the processor size the order.
    pub quantity: Option<u64>,
    /// Indicator snapshot at emission, for audit logs and verification.
    pub indicators: Option<IndicatorSnapshot>,
    pub order_type: OrderTypeChoice,
    pub is_protective_liquidation: bool,
    pub use_market_order: bool,
}

impl Signal {
    pub fn new(
        monitor: &str,
        symbol: &str,
        action: SignalAction,
        reason: impl Into<String>,
        seat_version: u64,
        trigger_time_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            monitor: monitor.to_string(),
            symbol: symbol.to_string(),
            symbol_name: None,
            action,
            reason: reason.into(),
            seat_version,
            trigger_time_ms,
            price: None,
            lot_size: None,
            quantity: None,
            indicators: None,
            order_type: OrderTypeChoice::Default,
            is_protective_liquidation: false,
            use_market_order: false,
        }
    }

    /// Mark this signal as a protective liquidation (market order, skips
    /// cooldowns on the sell path).
    pub fn protective(mut self) -> Self {
        self.is_protective_liquidation = true;
        self.use_market_order = true;
        self.order_type = OrderTypeChoice::Protective;
        self
    }

    /// The effective order type for execution.
    pub fn effective_order_type(&self, default: OrderType) -> OrderType {
        match self.order_type {
            OrderTypeChoice::Default => {
                if self.use_market_order {
                    OrderType::Mo
                } else {
                    default
                }
            }
            OrderTypeChoice::Protective => OrderType::Mo,
            OrderTypeChoice::Override(t) => t,
        }
    }
}

/// Output of one strategy evaluation.
#[derive(Debug, Clone, Default)]
pub struct GeneratedSignals {
    pub immediate: Vec<Signal>,
    pub delayed: Vec<Signal>,
}

/// Everything a strategy sees for one monitor tick.
pub struct StrategyContext<'a> {
    pub monitor: &'a MonitorConfig,
    pub snapshot: &'a IndicatorSnapshot,
    /// Previous tick's snapshot, for cross conditions. `None` on the first
    /// tick after start or a K-line reset.
    pub prev_snapshot: Option<&'a IndicatorSnapshot>,
    pub long_seat: SeatSnapshot,
    pub short_seat: SeatSnapshot,
    pub now_ms: i64,
}

impl StrategyContext<'_> {
    /// The seat a given action targets.
    pub fn seat_for(&self, action: SignalAction) -> Option<&SeatSnapshot> {
        match action.direction()? {
            d if d.is_long() => Some(&self.long_seat),
            _ => Some(&self.short_seat),
        }
    }
}

/// The strategy seam. Implementations must be pure over the given context.
pub trait Strategy: Send + Sync {
    fn generate_close_signals(&self, ctx: &StrategyContext<'_>) -> GeneratedSignals;
}

// =============================================================================
// RuleStrategy — config-driven indicator rules
// =============================================================================

/// Evaluates each configured `SignalRule` against the current (and previous)
/// snapshot; a rule whose conditions all hold emits one signal against the
/// matching seat.
pub struct RuleStrategy;

impl RuleStrategy {
    fn condition_holds(
        op: ConditionOp,
        value: f64,
        current: f64,
        previous: Option<f64>,
    ) -> bool {
        match op {
            ConditionOp::Gt => current > value,
            ConditionOp::Lt => current < value,
            ConditionOp::CrossAbove => matches!(previous, Some(p) if p <= value && current > value),
            ConditionOp::CrossBelow => matches!(previous, Some(p) if p >= value && current < value),
        }
    }
}

impl Strategy for RuleStrategy {
    fn generate_close_signals(&self, ctx: &StrategyContext<'_>) -> GeneratedSignals {
        let mut out = GeneratedSignals::default();

        for rule in &ctx.monitor.signal_rules {
            if rule.action == SignalAction::Hold || rule.conditions.is_empty() {
                continue;
            }

            let all_hold = rule.conditions.iter().all(|cond| {
                let Some(current) = ctx.snapshot.value_of(&cond.indicator) else {
                    return false;
                };
                if !current.is_finite() {
                    return false;
                }
                let previous = ctx
                    .prev_snapshot
                    .and_then(|p| p.value_of(&cond.indicator))
                    .filter(|v| v.is_finite());
                Self::condition_holds(cond.op, cond.value, current, previous)
            });
            if !all_hold {
                continue;
            }

            let Some(seat) = ctx.seat_for(rule.action) else {
                continue;
            };
            let Some(symbol) = seat.symbol.clone() else {
                continue;
            };
            if !seat.usable {
                continue;
            }

            let reason = if rule.reason.is_empty() {
                format!("rule {} matched", rule.action)
            } else {
                rule.reason.clone()
            };

            let mut signal = Signal::new(
                &ctx.monitor.symbol,
                &symbol,
                rule.action,
                reason,
                seat.version,
                ctx.now_ms,
            );
            signal.indicators = Some(ctx.snapshot.clone());

            match rule.dispatch {
                SignalDispatch::Immediate => out.immediate.push(signal),
                SignalDispatch::Delayed => out.delayed.push(signal),
            }
        }

        out
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn monitor_with_rules(rules: serde_json::Value) -> MonitorConfig {
        serde_json::from_value(serde_json::json!({
            "symbol": "HSI.HK",
            "signal_rules": rules,
        }))
        .unwrap()
    }

    fn seat(symbol: &str, version: u64) -> SeatSnapshot {
        SeatSnapshot {
            symbol: Some(symbol.to_string()),
            version,
            usable: true,
            direction: Direction::Long,
            recall_price: None,
        }
    }

    fn snapshot_with_k(k: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            price: 25_000.0,
            kdj: Some(crate::indicators::KdjValue { k, d: k, j: k }),
            ..Default::default()
        }
    }

    fn ctx<'a>(
        monitor: &'a MonitorConfig,
        snapshot: &'a IndicatorSnapshot,
        prev: Option<&'a IndicatorSnapshot>,
    ) -> StrategyContext<'a> {
        let mut short = seat("69002.HK", 7);
        short.direction = Direction::Short;
        StrategyContext {
            monitor,
            snapshot,
            prev_snapshot: prev,
            long_seat: seat("69001.HK", 3),
            short_seat: short,
            now_ms: 1_000_000,
        }
    }

    #[test]
    fn gt_rule_fires_and_captures_seat_version() {
        let monitor = monitor_with_rules(serde_json::json!([
            {
                "action": "BuyCall",
                "conditions": [{ "indicator": "K", "op": "Gt", "value": 80.0 }],
                "dispatch": "Immediate",
                "reason": "K overbought"
            }
        ]));
        let snap = snapshot_with_k(85.0);
        let out = RuleStrategy.generate_close_signals(&ctx(&monitor, &snap, None));

        assert_eq!(out.immediate.len(), 1);
        let s = &out.immediate[0];
        assert_eq!(s.action, SignalAction::BuyCall);
        assert_eq!(s.symbol, "69001.HK");
        assert_eq!(s.seat_version, 3);
        assert_eq!(s.reason, "K overbought");
        assert!(s.indicators.is_some());
    }

    #[test]
    fn cross_requires_previous_snapshot() {
        let monitor = monitor_with_rules(serde_json::json!([
            {
                "action": "BuyPut",
                "conditions": [{ "indicator": "K", "op": "CrossBelow", "value": 20.0 }],
                "dispatch": "Delayed"
            }
        ]));
        let now = snapshot_with_k(15.0);
        let prev_above = snapshot_with_k(25.0);
        let prev_below = snapshot_with_k(10.0);

        // No previous snapshot: cross can never be established.
        assert!(RuleStrategy
            .generate_close_signals(&ctx(&monitor, &now, None))
            .delayed
            .is_empty());

        // Previous above the level: genuine cross — targets the short seat.
        let out = RuleStrategy.generate_close_signals(&ctx(&monitor, &now, Some(&prev_above)));
        assert_eq!(out.delayed.len(), 1);
        assert_eq!(out.delayed[0].symbol, "69002.HK");
        assert_eq!(out.delayed[0].seat_version, 7);

        // Previous already below: no cross this tick.
        assert!(RuleStrategy
            .generate_close_signals(&ctx(&monitor, &now, Some(&prev_below)))
            .delayed
            .is_empty());
    }

    #[test]
    fn missing_indicator_blocks_rule() {
        let monitor = monitor_with_rules(serde_json::json!([
            {
                "action": "BuyCall",
                "conditions": [{ "indicator": "MFI", "op": "Gt", "value": 50.0 }]
            }
        ]));
        let snap = snapshot_with_k(85.0); // MFI unset
        let out = RuleStrategy.generate_close_signals(&ctx(&monitor, &snap, None));
        assert!(out.immediate.is_empty());
    }

    #[test]
    fn unusable_seat_suppresses_signal() {
        let monitor = monitor_with_rules(serde_json::json!([
            {
                "action": "BuyCall",
                "conditions": [{ "indicator": "K", "op": "Gt", "value": 10.0 }]
            }
        ]));
        let snap = snapshot_with_k(85.0);
        let mut context = ctx(&monitor, &snap, None);
        context.long_seat.usable = false;
        let out = RuleStrategy.generate_close_signals(&context);
        assert!(out.immediate.is_empty());
    }

    #[test]
    fn protective_signal_uses_market_order() {
        let s = Signal::new("HSI.HK", "69001.HK", SignalAction::SellCall, "x", 1, 0).protective();
        assert!(s.is_protective_liquidation);
        assert_eq!(s.effective_order_type(OrderType::Elo), OrderType::Mo);

        let plain = Signal::new("HSI.HK", "69001.HK", SignalAction::BuyCall, "x", 1, 0);
        assert_eq!(plain.effective_order_type(OrderType::Elo), OrderType::Elo);

        let mut overridden = Signal::new("HSI.HK", "69001.HK", SignalAction::BuyCall, "x", 1, 0);
        overridden.order_type = OrderTypeChoice::Override(OrderType::Alo);
        assert_eq!(overridden.effective_order_type(OrderType::Elo), OrderType::Alo);
    }
}
