// =============================================================================
// Smart-Close Filtering — which historical buys are still held?
// =============================================================================
//
// Given every filled buy and every filled sell for one (symbol, direction),
// compute the buy lots that remain open. Sells are walked oldest-first; each
// sell consumes the buys that existed before it. When a sell is smaller than
// the quantity in front of it, whole lowest-priced lots are eliminated first
// (orders are indivisible, never split).
//
// The algorithm is deterministic and stable: same-time buys keep their
// insertion order throughout.
// =============================================================================

use tracing::debug;

use crate::types::OrderRecord;

/// Compute the set of buy records still held after applying `sells`.
///
/// Steps:
/// 1. Buys later than the newest sell are kept unconditionally.
/// 2. Sells are walked in ascending executed-time order; at each sell the
///    buys older than it are either wholly consumed (sell quantity covers
///    them) or reduced by dropping whole lowest-priced lots until the
///    remaining quantity fits.
/// 3. Buys between consecutive sells join the working set as the walk
///    advances.
pub fn unrealized_buy_orders(buys: &[OrderRecord], sells: &[OrderRecord]) -> Vec<OrderRecord> {
    if buys.is_empty() {
        return Vec::new();
    }
    if sells.is_empty() {
        return buys.to_vec();
    }

    let mut sorted_sells: Vec<&OrderRecord> = sells.iter().collect();
    sorted_sells.sort_by_key(|s| s.executed_at_ms);

    let latest_sell_time = sorted_sells
        .last()
        .map(|s| s.executed_at_ms)
        .unwrap_or(i64::MIN);

    // Buys after the last sell can never have been consumed.
    let kept_tail: Vec<OrderRecord> = buys
        .iter()
        .filter(|b| b.executed_at_ms > latest_sell_time)
        .cloned()
        .collect();

    // Candidates preserve insertion order; stability for same-time buys
    // follows from only ever filtering, never re-sorting by time.
    let candidates: Vec<OrderRecord> = buys
        .iter()
        .filter(|b| b.executed_at_ms <= latest_sell_time)
        .cloned()
        .collect();

    let mut current: Vec<OrderRecord> = candidates
        .iter()
        .filter(|b| b.executed_at_ms < sorted_sells[0].executed_at_ms)
        .cloned()
        .collect();

    for (i, sell) in sorted_sells.iter().enumerate() {
        let next_sell_time = sorted_sells
            .get(i + 1)
            .map(|s| s.executed_at_ms)
            .unwrap_or(latest_sell_time + 1);

        let (buys_before, unreachable): (Vec<OrderRecord>, Vec<OrderRecord>) = current
            .into_iter()
            .partition(|b| b.executed_at_ms < sell.executed_at_ms);

        let between_next: Vec<OrderRecord> = candidates
            .iter()
            .filter(|b| {
                b.executed_at_ms > sell.executed_at_ms && b.executed_at_ms < next_sell_time
            })
            .cloned()
            .collect();

        let total_before: u64 = buys_before.iter().map(|b| b.executed_qty).sum();

        let mut next = if total_before <= sell.executed_qty {
            // The sell covers everything in front of it.
            between_next
        } else {
            let survivors =
                deduct_lowest_price_first(buys_before, total_before - sell.executed_qty);
            let mut merged = survivors;
            merged.extend(between_next);
            merged
        };

        // Buys at exactly a sell's timestamp fall out of both partitions by
        // construction; `unreachable` is empty in practice but dropping it
        // keeps the walk strictly forward.
        if !unreachable.is_empty() {
            debug!(
                count = unreachable.len(),
                "buys at sell timestamp excluded from smart-close walk"
            );
        }

        current = std::mem::take(&mut next);
    }

    let mut result = current;
    result.extend(kept_tail);
    result
}

/// Drop whole lowest-priced lots from `lots` until the summed quantity is at
/// most `target_qty`. Lots are never split; ties on price resolve to the
/// earlier-inserted lot.
fn deduct_lowest_price_first(lots: Vec<OrderRecord>, target_qty: u64) -> Vec<OrderRecord> {
    let mut remaining = lots;
    let mut total: u64 = remaining.iter().map(|b| b.executed_qty).sum();

    while total > target_qty && !remaining.is_empty() {
        // Index of the lowest-priced lot; `<` keeps the first on ties.
        let mut lowest = 0usize;
        for (idx, lot) in remaining.iter().enumerate() {
            if lot.executed_price < remaining[lowest].executed_price {
                lowest = idx;
            }
        }
        let removed = remaining.remove(lowest);
        total -= removed.executed_qty;
    }

    remaining
}

/// Total held quantity according to the filtering engine.
pub fn unrealized_qty(buys: &[OrderRecord], sells: &[OrderRecord]) -> u64 {
    unrealized_buy_orders(buys, sells)
        .iter()
        .map(|b| b.executed_qty)
        .sum()
}
