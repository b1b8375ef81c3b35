// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the engine
// computes on monitor K-lines. Every public function returns `Option` /
// empty-vec on insufficient data so callers are forced to handle the
// edge cases.
//
// `compute_snapshot` assembles a full per-tick `IndicatorSnapshot`:
// configurable EMA/RSI/PSY periods plus fixed MFI(14), KDJ(9, 5) and
// MACD(12, 26, 9).

pub mod ema;
pub mod kdj;
pub mod macd;
pub mod mfi;
pub mod psy;
pub mod rsi;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::IndicatorPeriods;
use crate::types::Kline;

pub use kdj::KdjValue;
pub use macd::MacdValue;

/// Fixed MFI look-back window.
pub const MFI_PERIOD: usize = 14;

/// A fully-owned snapshot of every indicator computed for one monitor tick.
///
/// Snapshots are cloned on their way into the indicator cache so that later
/// mutation by the producer can never reach stored history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Last close of the monitor.
    pub price: f64,
    /// Percent change versus the previous close.
    pub change_pct: f64,
    /// EMA values keyed by period.
    pub ema: BTreeMap<u32, f64>,
    /// RSI values keyed by period.
    pub rsi: BTreeMap<u32, f64>,
    /// PSY values keyed by period.
    pub psy: BTreeMap<u32, f64>,
    pub mfi: Option<f64>,
    pub kdj: Option<KdjValue>,
    pub macd: Option<MacdValue>,
}

impl IndicatorSnapshot {
    /// Resolve an indicator by name, as used by signal rules and the delayed
    /// verifier. Recognised names (case-insensitive):
    ///
    /// - `price`, `changePct`
    /// - `EMA<p>`, `RSI<p>`, `PSY<p>` (e.g. `RSI6`)
    /// - `MFI`
    /// - `K`, `D`, `J`
    /// - `DIF`, `DEA`, `MACD`
    pub fn value_of(&self, name: &str) -> Option<f64> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.as_str() {
            "PRICE" => Some(self.price),
            "CHANGEPCT" | "CHANGE_PCT" => Some(self.change_pct),
            "MFI" => self.mfi,
            "K" => self.kdj.map(|v| v.k),
            "D" => self.kdj.map(|v| v.d),
            "J" => self.kdj.map(|v| v.j),
            "DIF" => self.macd.map(|v| v.dif),
            "DEA" => self.macd.map(|v| v.dea),
            "MACD" => self.macd.map(|v| v.macd),
            _ => {
                if let Some(p) = upper.strip_prefix("EMA") {
                    return p.parse::<u32>().ok().and_then(|p| self.ema.get(&p).copied());
                }
                if let Some(p) = upper.strip_prefix("RSI") {
                    return p.parse::<u32>().ok().and_then(|p| self.rsi.get(&p).copied());
                }
                if let Some(p) = upper.strip_prefix("PSY") {
                    return p.parse::<u32>().ok().and_then(|p| self.psy.get(&p).copied());
                }
                None
            }
        }
    }
}

/// Compute a full indicator snapshot from the monitor's K-lines.
///
/// Returns `None` when there are fewer than two bars (no price change can be
/// derived). Individual indicators that fail for lack of history are logged
/// at debug and left unset; downstream treats a missing indicator as "skip
/// this tick for that indicator".
pub fn compute_snapshot(bars: &[Kline], periods: &IndicatorPeriods) -> Option<IndicatorSnapshot> {
    if bars.len() < 2 {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let price = *closes.last()?;
    let prev = closes[closes.len() - 2];
    let change_pct = if prev != 0.0 {
        (price - prev) / prev * 100.0
    } else {
        0.0
    };
    if !price.is_finite() || !change_pct.is_finite() {
        return None;
    }

    let mut snapshot = IndicatorSnapshot {
        price,
        change_pct,
        ..Default::default()
    };

    for &p in &periods.ema {
        match ema::latest_ema(&closes, p as usize) {
            Some(v) => {
                snapshot.ema.insert(p, v);
            }
            None => debug!(period = p, "EMA unavailable for this tick"),
        }
    }

    for &p in &periods.rsi {
        match rsi::latest_rsi(&closes, p as usize) {
            Some(v) => {
                snapshot.rsi.insert(p, v);
            }
            None => debug!(period = p, "RSI unavailable for this tick"),
        }
    }

    for &p in &periods.psy {
        match psy::current_psy(&closes, p as usize) {
            Some(v) => {
                snapshot.psy.insert(p, v);
            }
            None => debug!(period = p, "PSY unavailable for this tick"),
        }
    }

    snapshot.mfi = mfi::current_mfi(bars, MFI_PERIOD);
    if snapshot.mfi.is_none() {
        debug!("MFI unavailable for this tick");
    }

    snapshot.kdj = kdj::current_kdj(bars);
    if snapshot.kdj.is_none() {
        debug!("KDJ unavailable for this tick");
    }

    snapshot.macd = macd::current_macd(&closes);
    if snapshot.macd.is_none() {
        debug!("MACD unavailable for this tick");
    }

    Some(snapshot)
}
