// =============================================================================
// Money Flow Index (MFI)
// =============================================================================
//
// Volume-weighted RSI over typical prices:
//
//   typical_price = (high + low + close) / 3
//   raw_flow      = typical_price * volume
//   MFI = 100 - 100 / (1 + positive_flow_sum / negative_flow_sum)
//
// A bar's flow is positive when its typical price rose versus the previous
// bar, negative when it fell, and ignored when unchanged.
// =============================================================================

use crate::types::Kline;

/// Compute the MFI series for the given bars and `period`.
///
/// One value per bar starting at index `period`.
///
/// # Edge cases
/// - `period == 0` or fewer than `period + 1` bars => empty vec
/// - Zero negative flow in the window => 100.0; zero positive flow => 0.0;
///   both zero => 50.0.
/// - Non-finite inputs truncate the series.
pub fn calculate_mfi(bars: &[Kline], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return Vec::new();
    }

    // Signed money flow per bar (index 0 = flow of bars[1] vs bars[0]).
    let mut flows = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let prev_tp = typical_price(&w[0]);
        let tp = typical_price(&w[1]);
        if !prev_tp.is_finite() || !tp.is_finite() {
            return Vec::new();
        }
        let raw = tp * w[1].volume;
        let signed = if tp > prev_tp {
            raw
        } else if tp < prev_tp {
            -raw
        } else {
            0.0
        };
        flows.push(signed);
    }

    let mut result = Vec::with_capacity(flows.len() - period + 1);
    for end in period..=flows.len() {
        let window = &flows[end - period..end];
        let positive: f64 = window.iter().filter(|&&f| f > 0.0).sum();
        let negative: f64 = window.iter().filter(|&&f| f < 0.0).map(|f| f.abs()).sum();

        let mfi = if positive == 0.0 && negative == 0.0 {
            50.0
        } else if negative == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + positive / negative)
        };

        if !mfi.is_finite() {
            break;
        }
        result.push(mfi);
    }

    result
}

/// The most recent MFI value, or `None` on insufficient data.
pub fn current_mfi(bars: &[Kline], period: usize) -> Option<f64> {
    calculate_mfi(bars, period).last().copied()
}

fn typical_price(bar: &Kline) -> f64 {
    (bar.high + bar.low + bar.close) / 3.0
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64, volume: f64) -> Kline {
        Kline {
            ts_ms: 0,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume,
            turnover: close * volume,
        }
    }

    #[test]
    fn mfi_empty_input() {
        assert!(calculate_mfi(&[], 14).is_empty());
    }

    #[test]
    fn mfi_insufficient_data() {
        let bars: Vec<Kline> = (0..14).map(|i| bar(100.0 + i as f64, 10.0)).collect();
        assert!(calculate_mfi(&bars, 14).is_empty());
    }

    #[test]
    fn mfi_all_rising_is_100() {
        let bars: Vec<Kline> = (0..30).map(|i| bar(100.0 + i as f64, 10.0)).collect();
        let series = calculate_mfi(&bars, 14);
        assert!(!series.is_empty());
        for &v in &series {
            assert!((v - 100.0).abs() < 1e-10);
        }
    }

    #[test]
    fn mfi_all_falling_is_0() {
        let bars: Vec<Kline> = (0..30).rev().map(|i| bar(100.0 + i as f64, 10.0)).collect();
        let series = calculate_mfi(&bars, 14);
        assert!(!series.is_empty());
        for &v in &series {
            assert!(v.abs() < 1e-10);
        }
    }

    #[test]
    fn mfi_flat_is_50() {
        let bars: Vec<Kline> = (0..30).map(|_| bar(100.0, 10.0)).collect();
        let series = calculate_mfi(&bars, 14);
        for &v in &series {
            assert!((v - 50.0).abs() < 1e-10);
        }
    }

    #[test]
    fn mfi_in_range() {
        let closes = [
            10.0, 10.2, 10.1, 10.5, 10.4, 10.8, 10.6, 10.9, 11.2, 11.0, 11.5, 11.3, 11.8, 11.6,
            12.0, 11.9, 12.3,
        ];
        let bars: Vec<Kline> = closes.iter().map(|&c| bar(c, 100.0)).collect();
        let series = calculate_mfi(&bars, 14);
        assert!(!series.is_empty());
        for &v in &series {
            assert!((0.0..=100.0).contains(&v), "MFI {v} out of range");
        }
    }
}
