// =============================================================================
// Request Throttle — centralised minimum gap between broker calls
// =============================================================================
//
// The broker rejects requests closer than 20 ms together. All REST calls go
// through one shared `Throttle` configured at 30 ms (10 ms slack on top of
// the broker minimum) so that concurrent subsystems cannot collectively
// exceed the rate.
// =============================================================================

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Minimum gap the engine keeps between broker calls.
pub const DEFAULT_MIN_GAP: Duration = Duration::from_millis(30);

/// Async minimum-gap throttle. `acquire` returns once the caller may issue
/// the next request; callers are serialised on the internal mutex so the gap
/// holds across tasks.
pub struct Throttle {
    min_gap: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last: Mutex::new(None),
        }
    }

    /// Wait until at least `min_gap` has elapsed since the previous acquire,
    /// then stamp the current instant.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        let now = Instant::now();

        if let Some(prev) = *last {
            let next_allowed = prev + self.min_gap;
            if next_allowed > now {
                let wait = next_allowed - now;
                trace!(wait_ms = wait.as_millis() as u64, "throttling broker call");
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_GAP)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consecutive_acquires_respect_min_gap() {
        let throttle = Throttle::new(Duration::from_millis(30));

        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;
        let elapsed = start.elapsed();

        // Three acquires => at least two full gaps.
        assert!(
            elapsed >= Duration::from_millis(60),
            "elapsed {elapsed:?} < 60ms"
        );
    }

    #[tokio::test]
    async fn first_acquire_is_immediate() {
        let throttle = Throttle::default();
        let start = Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
