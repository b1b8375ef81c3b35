// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// A smoothed price level that tracks the monitor's closes with exponentially
// decaying memory. Written in the incremental-correction form:
//
//   alpha   = 2 / (period + 1)
//   level_t = level_{t-1} + alpha * (close_t - level_{t-1})
//
// The level is initialised with the plain average of the opening window, so
// the first output corresponds to the close at index `period - 1`.
// =============================================================================

/// EMA series over `closes`, one value per close from index `period - 1` on.
///
/// # Edge cases
/// - `period == 0` ⇒ empty vec
/// - fewer than `period` closes ⇒ empty vec
/// - a non-finite level halts the series; the partial prefix is returned
pub fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);

    // Opening level: plain average of the first `period` closes.
    let mut level = closes[..period].iter().sum::<f64>() / period as f64;
    if !level.is_finite() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(closes.len() + 1 - period);
    series.push(level);

    for &close in &closes[period..] {
        level += alpha * (close - level);
        if !level.is_finite() {
            break;
        }
        series.push(level);
    }

    series
}

/// The newest EMA level, or `None` when the series cannot be built.
pub fn latest_ema(closes: &[f64], period: usize) -> Option<f64> {
    ema_series(closes, period).last().copied()
}
