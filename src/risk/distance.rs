// =============================================================================
// Warrant Distance — recall-price proximity and liquidation checks
// =============================================================================
//
// The signed distance is always computed with the bull orientation:
//
//   distance_pct = (current - recall) / recall * 100
//
// A bull warrant is safe while the underlying sits above its recall price
// (positive distance, shrinking toward zero as danger approaches). A bear
// warrant is safe below its recall price (negative distance, rising toward
// zero as danger approaches). Thresholds are therefore sign-aware: bulls
// liquidate when the distance falls under a positive threshold, bears when
// it rises above a negative one.
// =============================================================================

use crate::config::RiskLimits;
use crate::types::Direction;

/// Signed distance of the underlying to the recall price, percent.
/// `None` when the recall price is non-positive or inputs are not finite.
pub fn signed_distance_pct(current: f64, recall: f64) -> Option<f64> {
    if recall <= 0.0 || !current.is_finite() || !recall.is_finite() {
        return None;
    }
    let pct = (current - recall) / recall * 100.0;
    pct.is_finite().then_some(pct)
}

/// Distance oriented so that "bigger is safer" for either side: the signed
/// distance for bulls, its negation for bears. Used by the switch band.
pub fn directional_distance_pct(current: f64, recall: f64, direction: Direction) -> Option<f64> {
    let signed = signed_distance_pct(current, recall)?;
    Some(if direction.is_long() { signed } else { -signed })
}

/// Check whether a held warrant has drifted inside its liquidation distance.
/// Returns the reason string when the position must be closed.
pub fn check_liquidation_distance(
    current: f64,
    recall: f64,
    direction: Direction,
    limits: &RiskLimits,
) -> Option<String> {
    let signed = signed_distance_pct(current, recall)?;

    match direction {
        Direction::Long if signed < limits.bull_liquidation_distance_pct => Some(format!(
            "bull distance {:.3}% below liquidation threshold {:.3}%",
            signed, limits.bull_liquidation_distance_pct
        )),
        Direction::Short if signed > limits.bear_liquidation_distance_pct => Some(format!(
            "bear distance {:.3}% above liquidation threshold {:.3}%",
            signed, limits.bear_liquidation_distance_pct
        )),
        _ => None,
    }
}

/// Whether a directional distance sits inside the `[min, max]` switch band.
pub fn within_switch_band(directional_pct: f64, band: [f64; 2]) -> bool {
    directional_pct >= band[0] && directional_pct <= band[1]
}
