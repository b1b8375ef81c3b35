// =============================================================================
// Order Ownership — which monitor (and direction) does a broker order belong to?
// =============================================================================
//
// Broker order rows only carry a display name like `HSI RC2606A` or
// `恒指摩通六六牛N`. Ownership resolution normalises the name (letters and
// digits only), matches it against each monitor's configured key substrings,
// and classifies the direction from well-known bull/bear markers.
// =============================================================================

use tracing::debug;

use crate::config::MonitorConfig;
use crate::types::Direction;

/// Bull-side markers found in warrant display names.
const LONG_MARKERS: &[&str] = &["RC", "BULL", "CALL", "牛"];
/// Bear-side markers found in warrant display names.
const SHORT_MARKERS: &[&str] = &["RP", "BEAR", "PUT", "熊"];

/// Strip everything that is not a letter or digit and uppercase the rest.
/// CJK characters count as letters, so `牛` / `熊` markers survive.
pub fn normalize_stock_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Resolve the owning `(monitor_symbol, direction)` for a broker stock name.
///
/// Returns `None` when no monitor's ownership keys match or no direction
/// marker is present. Misses are non-fatal; callers surface daily unmatched
/// diagnostics.
pub fn resolve_order_ownership(
    stock_name: &str,
    monitors: &[MonitorConfig],
) -> Option<(String, Direction)> {
    let normalized = normalize_stock_name(stock_name);
    if normalized.is_empty() {
        return None;
    }

    let owner = monitors.iter().find(|m| {
        m.ownership_keys
            .iter()
            .map(|k| normalize_stock_name(k))
            .any(|k| !k.is_empty() && normalized.contains(&k))
    })?;

    let direction = classify_direction(&normalized)?;

    debug!(
        stock_name,
        monitor = %owner.symbol,
        direction = %direction,
        "order ownership resolved"
    );
    Some((owner.symbol.clone(), direction))
}

/// Classify bull/bear from the normalised name. Long markers win when both
/// appear (never observed with real listings).
fn classify_direction(normalized: &str) -> Option<Direction> {
    if LONG_MARKERS.iter().any(|m| normalized.contains(m)) {
        return Some(Direction::Long);
    }
    if SHORT_MARKERS.iter().any(|m| normalized.contains(m)) {
        return Some(Direction::Short);
    }
    None
}
