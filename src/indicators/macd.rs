// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// Standard (12, 26, 9) parameters:
//
//   DIF  = EMA(close, 12) - EMA(close, 26)
//   DEA  = EMA(DIF, 9)
//   MACD = 2 * (DIF - DEA)      (the histogram, as HK charting packages draw it)
// =============================================================================

use super::ema::ema_series;

/// One MACD reading.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MacdValue {
    pub dif: f64,
    pub dea: f64,
    pub macd: f64,
}

pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

/// Compute the MACD series for `closes` with the given parameters.
///
/// # Edge cases
/// - Any zero period or insufficient data => empty vec.
/// - Non-finite intermediates truncate the series.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<MacdValue> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow || closes.len() < slow {
        return Vec::new();
    }

    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    if slow_ema.is_empty() {
        return Vec::new();
    }

    // Align the two series on their tails; slow_ema is the shorter one.
    let offset = fast_ema.len() - slow_ema.len();
    let dif: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, &s)| fast_ema[i + offset] - s)
        .collect();

    let dea = ema_series(&dif, signal);
    if dea.is_empty() {
        return Vec::new();
    }

    let dif_offset = dif.len() - dea.len();
    let mut result = Vec::with_capacity(dea.len());
    for (i, &dea_v) in dea.iter().enumerate() {
        let dif_v = dif[i + dif_offset];
        let macd = 2.0 * (dif_v - dea_v);
        if !dif_v.is_finite() || !dea_v.is_finite() || !macd.is_finite() {
            break;
        }
        result.push(MacdValue {
            dif: dif_v,
            dea: dea_v,
            macd,
        });
    }

    result
}

/// The most recent MACD reading with the default (12, 26, 9) parameters.
pub fn current_macd(closes: &[f64]) -> Option<MacdValue> {
    calculate_macd(closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL)
        .last()
        .copied()
}
