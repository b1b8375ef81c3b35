// =============================================================================
// Indicator Cache — per-monitor ring buffer of timestamped snapshots
// =============================================================================
//
// The delayed-signal verifier asks "what did indicator X look like at
// t0 / t0+5s / t0+10s?". This cache answers those temporal queries from a
// fixed-capacity ring per monitor: the oldest entry is overwritten on wrap
// and there is no background eviction.
//
// Invariant: stored snapshots are deep clones. A producer that keeps mutating
// its working snapshot after `push` can never corrupt the stored history.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::indicators::IndicatorSnapshot;

/// Default ring capacity per monitor (about 100 s of per-second pushes).
pub const DEFAULT_CAPACITY: usize = 100;

/// One stored entry: the push time and the cloned snapshot.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub ts_ms: i64,
    pub snapshot: IndicatorSnapshot,
}

/// Thread-safe per-monitor snapshot history.
pub struct IndicatorCache {
    rings: RwLock<HashMap<String, VecDeque<CachedSnapshot>>>,
    capacity: usize,
}

impl IndicatorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Store `(now_ms, deep_clone(snapshot))` for the monitor, overwriting
    /// the oldest entry when the ring is full.
    pub fn push(&self, monitor: &str, now_ms: i64, snapshot: &IndicatorSnapshot) {
        let mut rings = self.rings.write();
        let ring = rings
            .entry(monitor.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        ring.push_back(CachedSnapshot {
            ts_ms: now_ms,
            snapshot: snapshot.clone(),
        });
        while ring.len() > self.capacity {
            ring.pop_front();
        }
    }

    /// Return the single entry whose `|ts − target_ms|` is minimal among
    /// entries within `tolerance_ms`, or `None` if no entry qualifies.
    ///
    /// Ties (two entries equally distant) resolve to the earlier-pushed one.
    pub fn get_at(
        &self,
        monitor: &str,
        target_ms: i64,
        tolerance_ms: i64,
    ) -> Option<CachedSnapshot> {
        let rings = self.rings.read();
        let ring = rings.get(monitor)?;

        let mut best: Option<(&CachedSnapshot, i64)> = None;
        for entry in ring.iter() {
            let dist = (entry.ts_ms - target_ms).abs();
            if dist > tolerance_ms {
                continue;
            }
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((entry, dist)),
            }
        }

        best.map(|(e, _)| e.clone())
    }

    /// Number of entries currently stored for a monitor.
    pub fn len(&self, monitor: &str) -> usize {
        self.rings.read().get(monitor).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, monitor: &str) -> bool {
        self.len(monitor) == 0
    }

    /// Drop every stored ring (midnight clear).
    pub fn clear_all(&self) {
        self.rings.write().clear();
    }
}

impl Default for IndicatorCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn snap(price: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            price,
            ..Default::default()
        }
    }

    #[test]
    fn push_and_exact_lookup() {
        let cache = IndicatorCache::new(10);
        cache.push("HSI.HK", 1_000, &snap(100.0));
        cache.push("HSI.HK", 2_000, &snap(101.0));

        let hit = cache.get_at("HSI.HK", 2_000, 0).unwrap();
        assert_eq!(hit.ts_ms, 2_000);
        assert!((hit.snapshot.price - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn nearest_within_tolerance_wins() {
        let cache = IndicatorCache::new(10);
        cache.push("HSI.HK", 1_000, &snap(1.0));
        cache.push("HSI.HK", 4_000, &snap(2.0));
        cache.push("HSI.HK", 9_000, &snap(3.0));

        // Target 5_000: distances 4_000 / 1_000 / 4_000 — middle entry wins.
        let hit = cache.get_at("HSI.HK", 5_000, 5_000).unwrap();
        assert_eq!(hit.ts_ms, 4_000);
    }

    #[test]
    fn outside_tolerance_is_none() {
        let cache = IndicatorCache::new(10);
        cache.push("HSI.HK", 1_000, &snap(1.0));
        assert!(cache.get_at("HSI.HK", 10_000, 5_000).is_none());
        assert!(cache.get_at("HSI.HK", 6_000, 5_000).is_some());
    }

    #[test]
    fn unknown_monitor_is_none() {
        let cache = IndicatorCache::new(10);
        assert!(cache.get_at("HSI.HK", 0, i64::MAX).is_none());
    }

    #[test]
    fn ring_overwrites_oldest_on_wrap() {
        let cache = IndicatorCache::new(3);
        for i in 0..5 {
            cache.push("HSI.HK", i * 1_000, &snap(i as f64));
        }
        assert_eq!(cache.len("HSI.HK"), 3);
        // Entries 0 and 1 were overwritten.
        assert!(cache.get_at("HSI.HK", 0, 500).is_none());
        assert!(cache.get_at("HSI.HK", 2_000, 0).is_some());
        assert!(cache.get_at("HSI.HK", 4_000, 0).is_some());
    }

    #[test]
    fn stored_snapshot_immune_to_producer_mutation() {
        let cache = IndicatorCache::new(10);
        let mut working = snap(50.0);
        cache.push("HSI.HK", 1_000, &working);

        // Producer keeps mutating its working snapshot after the push.
        working.price = 999.0;
        working.ema.insert(5, 1.0);

        let stored = cache.get_at("HSI.HK", 1_000, 0).unwrap();
        assert!((stored.snapshot.price - 50.0).abs() < f64::EPSILON);
        assert!(stored.snapshot.ema.is_empty());
    }

    #[test]
    fn clear_all_drops_everything() {
        let cache = IndicatorCache::new(10);
        cache.push("HSI.HK", 1_000, &snap(1.0));
        cache.push("HTI.HK", 1_000, &snap(2.0));
        cache.clear_all();
        assert!(cache.is_empty("HSI.HK"));
        assert!(cache.is_empty("HTI.HK"));
    }

    #[test]
    fn tie_resolves_to_earlier_entry() {
        let cache = IndicatorCache::new(10);
        cache.push("HSI.HK", 1_000, &snap(1.0));
        cache.push("HSI.HK", 3_000, &snap(2.0));
        // Target 2_000 is equidistant; the earlier push wins.
        let hit = cache.get_at("HSI.HK", 2_000, 2_000).unwrap();
        assert_eq!(hit.ts_ms, 1_000);
    }
}
