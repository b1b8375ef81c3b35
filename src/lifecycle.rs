// =============================================================================
// Day Lifecycle Manager — midnight clearing and open rebuild
// =============================================================================
//
// Registered cache domains are cleared in forward order when the HK date
// rolls, and rebuilt in reverse order once the new day is a trading day and
// the session can trade. The day key commits only after every domain's
// midnight clear succeeds; a partial failure stays in MIDNIGHT_CLEANING and
// retries with exponential back-off (base × 2^(n−1), capped at 16× base).
//
//   ACTIVE → MIDNIGHT_CLEANING → MIDNIGHT_CLEANED → OPEN_REBUILDING → ACTIVE
//                                                      ↘ OPEN_REBUILD_FAILED ↗
//
// Trading is enabled only in ACTIVE; every other state drops signals.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, info};

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    MidnightCleaning,
    MidnightCleaned,
    OpenRebuilding,
    OpenRebuildFailed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::MidnightCleaning => "MIDNIGHT_CLEANING",
            Self::MidnightCleaned => "MIDNIGHT_CLEANED",
            Self::OpenRebuilding => "OPEN_REBUILDING",
            Self::OpenRebuildFailed => "OPEN_REBUILD_FAILED",
        };
        write!(f, "{s}")
    }
}

/// Context handed to each domain operation.
#[derive(Debug, Clone)]
pub struct DomainContext {
    pub now_ms: i64,
    pub day_key: String,
}

/// One clearable/rebuildable cache domain.
#[async_trait]
pub trait CacheDomain: Send + Sync {
    fn name(&self) -> &str;
    async fn midnight_clear(&self, ctx: &DomainContext) -> Result<()>;
    async fn open_rebuild(&self, ctx: &DomainContext) -> Result<()>;
}

/// Shared lifecycle flags readable by every subsystem.
pub struct LifecycleFlags {
    state: RwLock<LifecycleState>,
    current_day_key: RwLock<String>,
    pending_open_rebuild: AtomicBool,
    is_trading_enabled: AtomicBool,
}

impl LifecycleFlags {
    pub fn new(day_key: String) -> Self {
        Self {
            state: RwLock::new(LifecycleState::Active),
            current_day_key: RwLock::new(day_key),
            pending_open_rebuild: AtomicBool::new(false),
            is_trading_enabled: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn current_day_key(&self) -> String {
        self.current_day_key.read().clone()
    }

    pub fn is_trading_enabled(&self) -> bool {
        self.is_trading_enabled.load(Ordering::SeqCst)
    }

    pub fn pending_open_rebuild(&self) -> bool {
        self.pending_open_rebuild.load(Ordering::SeqCst)
    }

    pub fn set_trading_enabled(&self, enabled: bool) {
        self.is_trading_enabled.store(enabled, Ordering::SeqCst);
    }

    fn set_state(&self, state: LifecycleState) {
        let mut s = self.state.write();
        if *s != state {
            info!(from = %*s, to = %state, "lifecycle transition");
            *s = state;
        }
        // Trading is enabled only in ACTIVE.
        self.is_trading_enabled
            .store(state == LifecycleState::Active, Ordering::SeqCst);
    }
}

/// Per-tick runtime inputs.
#[derive(Debug, Clone)]
pub struct TickInputs {
    pub now_ms: i64,
    /// Today's HK date key.
    pub day_key: String,
    pub is_trading_day: bool,
    pub can_trade_now: bool,
}

/// Drives the lifecycle state machine across registered domains.
pub struct DayLifecycleManager {
    flags: Arc<LifecycleFlags>,
    domains: Vec<Arc<dyn CacheDomain>>,
    base_delay_ms: i64,
    midnight_failures: AtomicU32,
    rebuild_failures: AtomicU32,
    next_midnight_retry_ms: AtomicI64,
    next_rebuild_retry_ms: AtomicI64,
}

impl DayLifecycleManager {
    pub fn new(
        flags: Arc<LifecycleFlags>,
        domains: Vec<Arc<dyn CacheDomain>>,
        base_delay_ms: u64,
    ) -> Self {
        Self {
            flags,
            domains,
            base_delay_ms: base_delay_ms.max(1) as i64,
            midnight_failures: AtomicU32::new(0),
            rebuild_failures: AtomicU32::new(0),
            next_midnight_retry_ms: AtomicI64::new(0),
            next_rebuild_retry_ms: AtomicI64::new(0),
        }
    }

    pub fn flags(&self) -> Arc<LifecycleFlags> {
        self.flags.clone()
    }

    /// `base × 2^(n−1)`, capped at 16× base.
    fn backoff_ms(&self, failures: u32) -> i64 {
        let factor = 1i64 << (failures.saturating_sub(1)).min(4);
        self.base_delay_ms * factor.min(16)
    }

    /// One state-machine step. Call once per main-loop tick.
    pub async fn tick(&self, inputs: &TickInputs) {
        match self.flags.state() {
            LifecycleState::Active => {
                if inputs.day_key != self.flags.current_day_key() {
                    info!(
                        old = %self.flags.current_day_key(),
                        new = %inputs.day_key,
                        "day key changed — entering midnight clean"
                    );
                    self.flags.set_state(LifecycleState::MidnightCleaning);
                    self.run_midnight(inputs).await;
                }
            }
            LifecycleState::MidnightCleaning => {
                if inputs.now_ms >= self.next_midnight_retry_ms.load(Ordering::SeqCst) {
                    self.run_midnight(inputs).await;
                }
            }
            LifecycleState::MidnightCleaned => {
                if inputs.is_trading_day && inputs.can_trade_now {
                    self.flags.set_state(LifecycleState::OpenRebuilding);
                    self.run_rebuild(inputs).await;
                }
            }
            LifecycleState::OpenRebuilding => {
                // A previous call is normally synchronous; reaching here
                // means the last attempt was interrupted — run again.
                self.run_rebuild(inputs).await;
            }
            LifecycleState::OpenRebuildFailed => {
                if inputs.now_ms >= self.next_rebuild_retry_ms.load(Ordering::SeqCst) {
                    self.flags.set_state(LifecycleState::OpenRebuilding);
                    self.run_rebuild(inputs).await;
                }
            }
        }
    }

    /// Clear every domain in forward order. The day key commits only when
    /// all of them succeed.
    async fn run_midnight(&self, inputs: &TickInputs) {
        let ctx = DomainContext {
            now_ms: inputs.now_ms,
            day_key: inputs.day_key.clone(),
        };

        for domain in &self.domains {
            if let Err(e) = domain.midnight_clear(&ctx).await {
                let failures = self.midnight_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let delay = self.backoff_ms(failures);
                self.next_midnight_retry_ms
                    .store(inputs.now_ms + delay, Ordering::SeqCst);
                error!(
                    domain = domain.name(),
                    failures,
                    retry_in_ms = delay,
                    error = %e,
                    "midnight clear failed — staying in MIDNIGHT_CLEANING"
                );
                return;
            }
        }

        *self.flags.current_day_key.write() = inputs.day_key.clone();
        self.flags
            .pending_open_rebuild
            .store(true, Ordering::SeqCst);
        self.midnight_failures.store(0, Ordering::SeqCst);
        self.flags.set_state(LifecycleState::MidnightCleaned);
        info!(day_key = %inputs.day_key, "midnight clear complete — day key committed");
    }

    /// Rebuild every domain in reverse order.
    async fn run_rebuild(&self, inputs: &TickInputs) {
        let ctx = DomainContext {
            now_ms: inputs.now_ms,
            day_key: inputs.day_key.clone(),
        };

        for domain in self.domains.iter().rev() {
            if let Err(e) = domain.open_rebuild(&ctx).await {
                let failures = self.rebuild_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let delay = self.backoff_ms(failures);
                self.next_rebuild_retry_ms
                    .store(inputs.now_ms + delay, Ordering::SeqCst);
                self.flags.set_state(LifecycleState::OpenRebuildFailed);
                error!(
                    domain = domain.name(),
                    failures,
                    retry_in_ms = delay,
                    error = %e,
                    "open rebuild failed — trading stays disabled"
                );
                return;
            }
        }

        self.flags
            .pending_open_rebuild
            .store(false, Ordering::SeqCst);
        self.rebuild_failures.store(0, Ordering::SeqCst);
        self.flags.set_state(LifecycleState::Active);
        info!("open rebuild complete — trading enabled");
    }

    /// Startup fallback: park the machine in MIDNIGHT_CLEANED with a
    /// pending rebuild so the normal tick path retries at the open.
    pub fn prime_for_open_rebuild(&self) {
        self.flags
            .pending_open_rebuild
            .store(true, Ordering::SeqCst);
        self.flags.set_state(LifecycleState::MidnightCleaned);
    }

    /// Startup path: rebuild all domains (reverse order) once, enabling
    /// trading on success.
    pub async fn run_initial_rebuild(&self, inputs: &TickInputs) -> Result<()> {
        let ctx = DomainContext {
            now_ms: inputs.now_ms,
            day_key: inputs.day_key.clone(),
        };
        for domain in self.domains.iter().rev() {
            domain
                .open_rebuild(&ctx)
                .await
                .map_err(|e| e.context(format!("initial rebuild of {}", domain.name())))?;
        }
        self.flags.set_state(LifecycleState::Active);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingDomain {
        name: String,
        calls: Arc<Mutex<Vec<String>>>,
        fail_midnight: AtomicU32,
        fail_rebuild: AtomicU32,
    }

    impl RecordingDomain {
        fn new(name: &str, calls: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls,
                fail_midnight: AtomicU32::new(0),
                fail_rebuild: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CacheDomain for RecordingDomain {
        fn name(&self) -> &str {
            &self.name
        }

        async fn midnight_clear(&self, _ctx: &DomainContext) -> Result<()> {
            self.calls.lock().push(format!("clear:{}", self.name));
            if self.fail_midnight.load(Ordering::SeqCst) > 0 {
                self.fail_midnight.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("scripted midnight failure in {}", self.name);
            }
            Ok(())
        }

        async fn open_rebuild(&self, _ctx: &DomainContext) -> Result<()> {
            self.calls.lock().push(format!("rebuild:{}", self.name));
            if self.fail_rebuild.load(Ordering::SeqCst) > 0 {
                self.fail_rebuild.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("scripted rebuild failure in {}", self.name);
            }
            Ok(())
        }
    }

    fn inputs(now_ms: i64, day_key: &str, trading: bool) -> TickInputs {
        TickInputs {
            now_ms,
            day_key: day_key.to_string(),
            is_trading_day: trading,
            can_trade_now: trading,
        }
    }

    fn manager_with_domains(
        day_key: &str,
        domains: Vec<Arc<dyn CacheDomain>>,
    ) -> DayLifecycleManager {
        let flags = Arc::new(LifecycleFlags::new(day_key.to_string()));
        flags.set_state(LifecycleState::Active);
        DayLifecycleManager::new(flags, domains, 1000)
    }

    #[tokio::test]
    async fn midnight_forward_rebuild_reverse() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingDomain::new("A", calls.clone());
        let b = RecordingDomain::new("B", calls.clone());
        let c = RecordingDomain::new("C", calls.clone());
        let mgr = manager_with_domains("2026-02-15", vec![a, b, c]);

        // Day rolls: clear A,B,C forward, then rebuild C,B,A in reverse.
        mgr.tick(&inputs(1_000, "2026-02-16", true)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::MidnightCleaned);
        mgr.tick(&inputs(2_000, "2026-02-16", true)).await;

        assert_eq!(
            calls.lock().as_slice(),
            [
                "clear:A", "clear:B", "clear:C", "rebuild:C", "rebuild:B", "rebuild:A"
            ]
        );
        assert_eq!(mgr.flags.state(), LifecycleState::Active);
        assert!(mgr.flags.is_trading_enabled());
        assert_eq!(mgr.flags.current_day_key(), "2026-02-16");
    }

    #[tokio::test]
    async fn day_key_commits_only_after_full_midnight_success() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingDomain::new("A", calls.clone());
        let b = RecordingDomain::new("B", calls.clone());
        b.fail_midnight.store(1, Ordering::SeqCst);
        let mgr = manager_with_domains("2026-02-15", vec![a, b]);

        mgr.tick(&inputs(1_000, "2026-02-16", true)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::MidnightCleaning);
        assert_eq!(mgr.flags.current_day_key(), "2026-02-15");
        assert!(!mgr.flags.is_trading_enabled());

        // Back-off: before the retry time nothing runs.
        let before = calls.lock().len();
        mgr.tick(&inputs(1_500, "2026-02-16", true)).await;
        assert_eq!(calls.lock().len(), before);

        // After the base delay the retry succeeds and commits.
        mgr.tick(&inputs(2_100, "2026-02-16", true)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::MidnightCleaned);
        assert_eq!(mgr.flags.current_day_key(), "2026-02-16");
    }

    #[tokio::test]
    async fn rebuild_waits_for_trading_day_and_session() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingDomain::new("A", calls.clone());
        let mgr = manager_with_domains("2026-02-15", vec![a]);

        mgr.tick(&inputs(1_000, "2026-02-16", false)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::MidnightCleaned);

        // Not a trading day yet: stays cleaned, trading disabled.
        mgr.tick(&inputs(2_000, "2026-02-16", false)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::MidnightCleaned);
        assert!(!mgr.flags.is_trading_enabled());

        mgr.tick(&inputs(3_000, "2026-02-16", true)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::Active);
        assert!(mgr.flags.is_trading_enabled());
    }

    #[tokio::test]
    async fn third_rebuild_attempt_succeeds_with_backoff() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingDomain::new("A", calls.clone());
        a.fail_rebuild.store(2, Ordering::SeqCst);
        let mgr = manager_with_domains("2026-02-15", vec![a]);

        mgr.tick(&inputs(1_000, "2026-02-16", true)).await; // clean
        mgr.tick(&inputs(2_000, "2026-02-16", true)).await; // rebuild #1 fails
        assert_eq!(mgr.flags.state(), LifecycleState::OpenRebuildFailed);
        assert!(!mgr.flags.is_trading_enabled());

        // Retry #2 after base delay: fails again, back-off doubles.
        mgr.tick(&inputs(3_100, "2026-02-16", true)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::OpenRebuildFailed);

        // Before the doubled delay nothing happens.
        mgr.tick(&inputs(4_000, "2026-02-16", true)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::OpenRebuildFailed);

        // Retry #3: succeeds.
        mgr.tick(&inputs(5_200, "2026-02-16", true)).await;
        assert_eq!(mgr.flags.state(), LifecycleState::Active);
        assert!(mgr.flags.is_trading_enabled());
        assert_eq!(mgr.flags.current_day_key(), "2026-02-16");
        assert!(!mgr.flags.pending_open_rebuild());
    }

    #[test]
    fn backoff_caps_at_sixteen_times_base() {
        let mgr = manager_with_domains("2026-02-15", Vec::new());
        assert_eq!(mgr.backoff_ms(1), 1_000);
        assert_eq!(mgr.backoff_ms(2), 2_000);
        assert_eq!(mgr.backoff_ms(3), 4_000);
        assert_eq!(mgr.backoff_ms(5), 16_000);
        assert_eq!(mgr.backoff_ms(10), 16_000);
    }
}
