// =============================================================================
// Order Subsystem
// =============================================================================
//
// - `filtering`: the smart-close FIFO engine deciding which buys stay open.
// - `recorder`: authoritative fill/held-lot bookkeeping.
// - `ownership`: mapping broker stock names onto (monitor, direction).
// - `monitor`: tracked-order timeouts, market conversion, price chasing,
//   idempotent push handling, and sell-merge decisions.

pub mod filtering;
pub mod monitor;
pub mod ownership;
pub mod recorder;
