// =============================================================================
// Risk Subsystem
// =============================================================================
//
// Three independent protections feed the monitor-task queue and the sell
// path:
//
// - `unrealized`: floating-loss check with a daily-loss-adjusted cost basis.
// - `distance`: recall-price proximity liquidation for held warrants.
// - `daily_loss`: realized intraday P&L per seat, the offset source for
//   the unrealized tracker.

pub mod daily_loss;
pub mod distance;
pub mod unrealized;

pub use daily_loss::DailyLossTracker;
pub use unrealized::{LiquidationAdvice, UnrealizedLossTracker};
