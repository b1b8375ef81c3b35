// =============================================================================
// Delayed Signal Verifier — trend confirmation against indicator history
// =============================================================================
//
// A delayed signal is not executed at emission. It waits a ready delay,
// then each configured indicator is compared across three time points from
// the indicator cache: t0, t0+5s and t0+10s (±5s tolerance each).
//
// Up-trend actions (BUYCALL, SELLPUT) require the value at both offsets to
// be strictly greater than at t0; down-trend actions strictly smaller.
// Every configured indicator must pass at every offset. A missing cache
// entry or a non-finite value fails the verification.
//
// Pending-signal lifecycle: waiting_for_ready_delay → verifying →
// passed | failed | cancelled.
// =============================================================================

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::indicator_cache::IndicatorCache;
use crate::types::Direction;

use super::Signal;

/// Delay after registration before a signal is first polled.
pub const READY_DELAY_MS: i64 = 10_000;
/// Tolerance when matching cache entries to a target time point.
pub const VERIFY_TOLERANCE_MS: i64 = 5_000;

/// One queued signal awaiting verification.
struct PendingSignal {
    signal: Signal,
    indicators: Vec<String>,
    delays_ms: Vec<i64>,
    registered_at_ms: i64,
}

/// Result of one poll pass.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub verified: usize,
    pub rejected: usize,
}

type VerifiedCallback = Box<dyn Fn(Signal) + Send + Sync>;
type RejectedCallback = Box<dyn Fn(&Signal, &str) + Send + Sync>;

/// The delayed-signal verifier. One instance per engine.
pub struct DelayedSignalVerifier {
    pending: Mutex<Vec<PendingSignal>>,
    on_verified: RwLock<Option<VerifiedCallback>>,
    on_rejected: RwLock<Option<RejectedCallback>>,
}

impl DelayedSignalVerifier {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            on_verified: RwLock::new(None),
            on_rejected: RwLock::new(None),
        }
    }

    /// Install the pass callback (typically: push to the buy queue with a
    /// "verified" task type).
    pub fn on_verified(&self, cb: impl Fn(Signal) + Send + Sync + 'static) {
        *self.on_verified.write() = Some(Box::new(cb));
    }

    /// Install the rejection callback.
    pub fn on_rejected(&self, cb: impl Fn(&Signal, &str) + Send + Sync + 'static) {
        *self.on_rejected.write() = Some(Box::new(cb));
    }

    /// Queue a signal for verification.
    pub fn add_signal(
        &self,
        signal: Signal,
        indicators: Vec<String>,
        delays_secs: &[u64],
        now_ms: i64,
    ) {
        debug!(
            monitor = %signal.monitor,
            symbol = %signal.symbol,
            action = %signal.action,
            indicators = ?indicators,
            "delayed signal queued for verification"
        );
        self.pending.lock().push(PendingSignal {
            signal,
            indicators,
            delays_ms: delays_secs.iter().map(|&s| (s * 1000) as i64).collect(),
            registered_at_ms: now_ms,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every pending signal for a warrant (seat switched away).
    pub fn cancel_all_for_symbol(&self, symbol: &str) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|p| p.signal.symbol != symbol);
        let cancelled = before - pending.len();
        if cancelled > 0 {
            info!(symbol, cancelled, "pending verifications cancelled for symbol");
        }
        cancelled
    }

    /// Drop every pending signal for a (monitor, direction) pair.
    pub fn cancel_all_for_direction(&self, monitor: &str, direction: Direction) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|p| {
            !(p.signal.monitor == monitor && p.signal.action.direction() == Some(direction))
        });
        let cancelled = before - pending.len();
        if cancelled > 0 {
            info!(monitor, direction = %direction, cancelled, "pending verifications cancelled");
        }
        cancelled
    }

    /// Drop everything (midnight clear).
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let cancelled = pending.len();
        pending.clear();
        cancelled
    }

    /// Evaluate every signal whose ready delay has elapsed.
    pub fn poll(&self, cache: &IndicatorCache, now_ms: i64) -> PollOutcome {
        let due: Vec<PendingSignal> = {
            let mut pending = self.pending.lock();
            let mut still_waiting = Vec::new();
            let mut due = Vec::new();
            for p in pending.drain(..) {
                if now_ms - p.registered_at_ms >= READY_DELAY_MS {
                    due.push(p);
                } else {
                    still_waiting.push(p);
                }
            }
            *pending = still_waiting;
            due
        };

        let mut outcome = PollOutcome::default();
        for p in due {
            match Self::verify(&p, cache) {
                Ok(()) => {
                    info!(
                        monitor = %p.signal.monitor,
                        symbol = %p.signal.symbol,
                        action = %p.signal.action,
                        "delayed signal verified"
                    );
                    outcome.verified += 1;
                    if let Some(cb) = self.on_verified.read().as_ref() {
                        cb(p.signal);
                    }
                }
                Err(reason) => {
                    info!(
                        monitor = %p.signal.monitor,
                        symbol = %p.signal.symbol,
                        action = %p.signal.action,
                        reason = %reason,
                        "delayed signal rejected"
                    );
                    outcome.rejected += 1;
                    if let Some(cb) = self.on_rejected.read().as_ref() {
                        cb(&p.signal, &reason);
                    }
                }
            }
        }
        outcome
    }

    /// Check every configured indicator across t0 and each offset.
    fn verify(p: &PendingSignal, cache: &IndicatorCache) -> Result<(), String> {
        let t0 = p.signal.trigger_time_ms;
        let monitor = &p.signal.monitor;

        let Some(base) = cache.get_at(monitor, t0, VERIFY_TOLERANCE_MS) else {
            return Err("missing indicator history at T0".to_string());
        };

        let mut offset_entries = Vec::with_capacity(p.delays_ms.len());
        for &delay in &p.delays_ms {
            match cache.get_at(monitor, t0 + delay, VERIFY_TOLERANCE_MS) {
                Some(entry) => offset_entries.push((delay, entry)),
                None => {
                    return Err(format!(
                        "missing indicator history at T0+{}s",
                        delay / 1000
                    ))
                }
            }
        }

        let up_trend = p.signal.action.is_up_trend();
        let mut failures = Vec::new();

        for name in &p.indicators {
            let Some(v0) = base.snapshot.value_of(name).filter(|v| v.is_finite()) else {
                failures.push(format!("{name} unavailable at T0"));
                continue;
            };

            for (delay, entry) in &offset_entries {
                let Some(v) = entry.snapshot.value_of(name).filter(|v| v.is_finite()) else {
                    failures.push(format!("{name} unavailable at T0+{}s", delay / 1000));
                    continue;
                };
                let passed = if up_trend { v > v0 } else { v < v0 };
                if !passed {
                    let op = if up_trend { "<=" } else { ">=" };
                    failures.push(format!("{name}={v:.3}{op}{v0:.3}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join(", "))
        }
    }
}

impl Default for DelayedSignalVerifier {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{IndicatorSnapshot, KdjValue};
    use crate::types::SignalAction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn snap_k(k: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            price: 25_000.0,
            kdj: Some(KdjValue { k, d: k, j: k }),
            ..Default::default()
        }
    }

    fn buycall(t0: i64) -> Signal {
        Signal::new("HSI.HK", "69001.HK", SignalAction::BuyCall, "test", 1, t0)
    }

    fn setup() -> (DelayedSignalVerifier, IndicatorCache) {
        (DelayedSignalVerifier::new(), IndicatorCache::new(100))
    }

    #[test]
    fn uptrend_passes_when_strictly_rising_at_both_offsets() {
        let (verifier, cache) = setup();
        let t0 = 100_000;
        cache.push("HSI.HK", t0, &snap_k(20.0));
        cache.push("HSI.HK", t0 + 5_000, &snap_k(22.0));
        cache.push("HSI.HK", t0 + 10_000, &snap_k(25.0));

        let verified = Arc::new(AtomicUsize::new(0));
        let v = verified.clone();
        verifier.on_verified(move |_s| {
            v.fetch_add(1, Ordering::SeqCst);
        });

        verifier.add_signal(buycall(t0), vec!["K".into()], &[5, 10], t0);
        let outcome = verifier.poll(&cache, t0 + READY_DELAY_MS);

        assert_eq!(outcome.verified, 1);
        assert_eq!(outcome.rejected, 0);
        assert_eq!(verified.load(Ordering::SeqCst), 1);
        assert_eq!(verifier.pending_count(), 0);
    }

    #[test]
    fn uptrend_fails_when_second_offset_dips() {
        // K: 20 → 22 → 19. The +10s comparison fails.
        let (verifier, cache) = setup();
        let t0 = 100_000;
        cache.push("HSI.HK", t0, &snap_k(20.0));
        cache.push("HSI.HK", t0 + 5_000, &snap_k(22.0));
        cache.push("HSI.HK", t0 + 10_000, &snap_k(19.0));

        let reason_seen = Arc::new(parking_lot::Mutex::new(String::new()));
        let r = reason_seen.clone();
        verifier.on_rejected(move |_s, reason| {
            *r.lock() = reason.to_string();
        });

        verifier.add_signal(buycall(t0), vec!["K".into()], &[5, 10], t0);
        let outcome = verifier.poll(&cache, t0 + READY_DELAY_MS);

        assert_eq!(outcome.rejected, 1);
        assert!(
            reason_seen.lock().contains("K=19.000<=20.000"),
            "reason was {}",
            reason_seen.lock()
        );
    }

    #[test]
    fn equal_value_is_not_strictly_greater() {
        let (verifier, cache) = setup();
        let t0 = 100_000;
        cache.push("HSI.HK", t0, &snap_k(20.0));
        cache.push("HSI.HK", t0 + 5_000, &snap_k(20.0));
        cache.push("HSI.HK", t0 + 10_000, &snap_k(21.0));

        verifier.add_signal(buycall(t0), vec!["K".into()], &[5, 10], t0);
        assert_eq!(verifier.poll(&cache, t0 + READY_DELAY_MS).rejected, 1);
    }

    #[test]
    fn downtrend_requires_strict_decrease() {
        let (verifier, cache) = setup();
        let t0 = 100_000;
        cache.push("HSI.HK", t0, &snap_k(50.0));
        cache.push("HSI.HK", t0 + 5_000, &snap_k(45.0));
        cache.push("HSI.HK", t0 + 10_000, &snap_k(40.0));

        let s = Signal::new("HSI.HK", "69002.HK", SignalAction::BuyPut, "test", 1, t0);
        verifier.add_signal(s, vec!["K".into()], &[5, 10], t0);
        assert_eq!(verifier.poll(&cache, t0 + READY_DELAY_MS).verified, 1);
    }

    #[test]
    fn missing_offset_entry_fails_with_time_point_reason() {
        let (verifier, cache) = setup();
        let t0 = 100_000;
        // Base entry 4s before t0 (within the ±5s tolerance of t0, but 9s
        // away from t0+5s); a +10s entry exists. Nothing can serve t0+5s.
        cache.push("HSI.HK", t0 - 4_000, &snap_k(20.0));
        cache.push("HSI.HK", t0 + 11_000, &snap_k(25.0));

        let reason_seen = Arc::new(parking_lot::Mutex::new(String::new()));
        let r = reason_seen.clone();
        verifier.on_rejected(move |_s, reason| {
            *r.lock() = reason.to_string();
        });

        verifier.add_signal(buycall(t0), vec!["K".into()], &[5, 10], t0);
        let outcome = verifier.poll(&cache, t0 + READY_DELAY_MS);
        assert_eq!(outcome.rejected, 1);
        assert!(reason_seen.lock().contains("T0+5s"));
    }

    #[test]
    fn ready_delay_defers_polling() {
        let (verifier, cache) = setup();
        let t0 = 100_000;
        verifier.add_signal(buycall(t0), vec!["K".into()], &[5, 10], t0);

        // Before the ready delay nothing is evaluated.
        let outcome = verifier.poll(&cache, t0 + READY_DELAY_MS - 1);
        assert_eq!(outcome.verified + outcome.rejected, 0);
        assert_eq!(verifier.pending_count(), 1);
    }

    #[test]
    fn missing_indicator_value_fails() {
        let (verifier, cache) = setup();
        let t0 = 100_000;
        // Snapshots present but without KDJ populated.
        cache.push("HSI.HK", t0, &IndicatorSnapshot::default());
        cache.push("HSI.HK", t0 + 5_000, &IndicatorSnapshot::default());
        cache.push("HSI.HK", t0 + 10_000, &IndicatorSnapshot::default());

        verifier.add_signal(buycall(t0), vec!["K".into()], &[5, 10], t0);
        assert_eq!(verifier.poll(&cache, t0 + READY_DELAY_MS).rejected, 1);
    }

    #[test]
    fn cancellation_paths() {
        let (verifier, _cache) = setup();
        let t0 = 100_000;
        verifier.add_signal(buycall(t0), vec!["K".into()], &[5, 10], t0);
        let s2 = Signal::new("HSI.HK", "69002.HK", SignalAction::BuyPut, "x", 1, t0);
        verifier.add_signal(s2, vec!["K".into()], &[5, 10], t0);

        assert_eq!(verifier.cancel_all_for_symbol("69001.HK"), 1);
        assert_eq!(verifier.pending_count(), 1);

        assert_eq!(
            verifier.cancel_all_for_direction("HSI.HK", Direction::Short),
            1
        );
        assert_eq!(verifier.pending_count(), 0);

        verifier.add_signal(buycall(t0), vec!["K".into()], &[5, 10], t0);
        assert_eq!(verifier.cancel_all(), 1);
    }
}
