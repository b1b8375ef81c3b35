// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// Momentum oscillator over the monitor's closes. Up-moves and down-moves are
// averaged separately with Wilder's smoothing and combined as
//
//   RSI = 100 · avg_up / (avg_up + avg_down)
//
// (the familiar `100 − 100 / (1 + RS)` rearranged to avoid the ratio). The
// averages are seeded over the first `period` moves, then each new move is
// folded in with weight 1/period:
//
//   avg = (avg · (period − 1) + move) / period
// =============================================================================

/// RSI series over `closes`, one value per close from index `period` on
/// (the opening `period` moves only seed the averages).
///
/// # Edge cases
/// - `period == 0` or no more than `period` closes ⇒ empty vec
/// - a tape with no movement at all reads a neutral 50
/// - one-sided tapes saturate at 100 (no down-moves) or 0 (no up-moves)
/// - a non-finite value halts the series; the partial prefix is returned
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }
    let span = period as f64;

    // Seed: plain averages of the up/down moves inside the opening window.
    let mut avg_up = 0.0;
    let mut avg_down = 0.0;
    for pair in closes[..=period].windows(2) {
        let step = pair[1] - pair[0];
        if step >= 0.0 {
            avg_up += step;
        } else {
            avg_down -= step;
        }
    }
    avg_up /= span;
    avg_down /= span;

    let mut series = Vec::with_capacity(closes.len() - period);
    match strength_reading(avg_up, avg_down) {
        Some(v) => series.push(v),
        None => return series,
    }

    // Wilder smoothing over the remaining moves.
    for pair in closes[period..].windows(2) {
        let step = pair[1] - pair[0];
        let (up, down) = if step >= 0.0 { (step, 0.0) } else { (0.0, -step) };
        avg_up = (avg_up * (span - 1.0) + up) / span;
        avg_down = (avg_down * (span - 1.0) + down) / span;

        match strength_reading(avg_up, avg_down) {
            Some(v) => series.push(v),
            None => break,
        }
    }

    series
}

/// The newest RSI reading, or `None` when the series cannot be built.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}

/// Combine the smoothed averages into a reading in [0, 100].
/// A dead tape (both averages zero) is neutral; non-finite inputs yield
/// `None` so the caller can stop the series.
fn strength_reading(avg_up: f64, avg_down: f64) -> Option<f64> {
    let total = avg_up + avg_down;
    let reading = if total == 0.0 {
        50.0
    } else {
        100.0 * avg_up / total
    };
    reading.is_finite().then_some(reading)
}
