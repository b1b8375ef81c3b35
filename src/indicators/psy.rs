// =============================================================================
// Psychological Line (PSY)
// =============================================================================
//
// PSY is the percentage of up-closes within the look-back window:
//
//   PSY = (number of closes higher than the previous close) / period * 100
//
// A reading above ~75 suggests overbought sentiment, below ~25 oversold.
// =============================================================================

/// Compute the PSY series for `closes` with the given `period`.
///
/// One value per close starting at index `period` (the first `period` deltas
/// seed the window).
///
/// # Edge cases
/// - `period == 0` or fewer than `period + 1` closes => empty vec
/// - Equal consecutive closes count as down (not an up-day).
pub fn calculate_psy(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let ups: Vec<u32> = closes
        .windows(2)
        .map(|w| u32::from(w[1] > w[0]))
        .collect();

    let mut result = Vec::with_capacity(ups.len() - period + 1);
    let mut window_sum: u32 = ups[..period].iter().sum();
    result.push(window_sum as f64 / period as f64 * 100.0);

    for i in period..ups.len() {
        window_sum = window_sum + ups[i] - ups[i - period];
        result.push(window_sum as f64 / period as f64 * 100.0);
    }

    result
}

/// The most recent PSY value, or `None` on insufficient data.
pub fn current_psy(closes: &[f64], period: usize) -> Option<f64> {
    calculate_psy(closes, period).last().copied()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psy_empty_input() {
        assert!(calculate_psy(&[], 12).is_empty());
    }

    #[test]
    fn psy_insufficient_data() {
        assert!(calculate_psy(&[1.0; 12], 12).is_empty());
    }

    #[test]
    fn psy_all_up() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let series = calculate_psy(&closes, 12);
        for &v in &series {
            assert!((v - 100.0).abs() < 1e-10);
        }
    }

    #[test]
    fn psy_all_down() {
        let closes: Vec<f64> = (1..=20).rev().map(|x| x as f64).collect();
        let series = calculate_psy(&closes, 12);
        for &v in &series {
            assert!(v.abs() < 1e-10);
        }
    }

    #[test]
    fn psy_alternating() {
        // up, down, up, down... half the window is up.
        let closes: Vec<f64> = (0..21)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let series = calculate_psy(&closes, 12);
        for &v in &series {
            assert!((v - 50.0).abs() < 1e-10, "expected 50.0, got {v}");
        }
    }

    #[test]
    fn psy_sliding_window() {
        // 4 ups then all downs, period 4: first value 100, then decreasing.
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let series = calculate_psy(&closes, 4);
        assert_eq!(series.len(), 5);
        assert!((series[0] - 100.0).abs() < 1e-10);
        assert!((series[1] - 75.0).abs() < 1e-10);
        assert!((series[4] - 0.0).abs() < 1e-10);
    }
}
