// =============================================================================
// KDJ — Stochastic oscillator with EMA smoothing
// =============================================================================
//
// Raw Stochastic Value over a 9-bar window:
//
//   RSV = (close - lowest_low) / (highest_high - lowest_low) * 100
//
// K is the EMA of RSV with smoothing period 5 (multiplier 1/3), D is the EMA
// of K with the same period, and J = 3K - 2D.
//
// Every produced (k, d, j) triple is finite; a flat window (high == low)
// yields a neutral RSV of 50.
// =============================================================================

use crate::types::Kline;

/// One KDJ reading.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KdjValue {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// Default RSV look-back window.
pub const KDJ_RSV_PERIOD: usize = 9;
/// Default EMA smoothing period for K and D.
pub const KDJ_SMOOTH_PERIOD: usize = 5;

/// Compute the KDJ series for the given bars.
///
/// One value per bar starting at index `rsv_period - 1`.
///
/// # Edge cases
/// - `rsv_period == 0`, `smooth_period == 0`, or too few bars => empty vec
/// - Non-finite intermediates truncate the series.
pub fn calculate_kdj(bars: &[Kline], rsv_period: usize, smooth_period: usize) -> Vec<KdjValue> {
    if rsv_period == 0 || smooth_period == 0 || bars.len() < rsv_period {
        return Vec::new();
    }

    let alpha = 2.0 / (smooth_period + 1) as f64;

    let mut result = Vec::with_capacity(bars.len() - rsv_period + 1);
    let mut k_prev: Option<f64> = None;
    let mut d_prev: Option<f64> = None;

    for end in rsv_period..=bars.len() {
        let window = &bars[end - rsv_period..end];
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let close = window[rsv_period - 1].close;

        let rsv = if highest > lowest {
            (close - lowest) / (highest - lowest) * 100.0
        } else {
            50.0
        };
        if !rsv.is_finite() {
            break;
        }

        let k = match k_prev {
            Some(prev) => rsv * alpha + prev * (1.0 - alpha),
            None => rsv,
        };
        let d = match d_prev {
            Some(prev) => k * alpha + prev * (1.0 - alpha),
            None => k,
        };
        let j = 3.0 * k - 2.0 * d;

        if !k.is_finite() || !d.is_finite() || !j.is_finite() {
            break;
        }

        result.push(KdjValue { k, d, j });
        k_prev = Some(k);
        d_prev = Some(d);
    }

    result
}

/// The most recent KDJ reading with the default (9, 5) parameters.
pub fn current_kdj(bars: &[Kline]) -> Option<KdjValue> {
    calculate_kdj(bars, KDJ_RSV_PERIOD, KDJ_SMOOTH_PERIOD)
        .last()
        .copied()
}
