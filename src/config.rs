// =============================================================================
// Engine Configuration — monitor definitions, risk limits, broker credentials
// =============================================================================
//
// Central configuration hub for the Victoria engine. Per-monitor settings
// (warrant auto-search, indicator periods, signal rules, risk thresholds,
// cooldowns, ownership mapping) live in the JSON config file; broker
// credentials come from the environment and are never persisted.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::SignalAction;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_buy_timeout_secs() -> u64 {
    30
}

fn default_sell_timeout_secs() -> u64 {
    20
}

fn default_price_update_interval_ms() -> u64 {
    5000
}

fn default_price_replace_threshold() -> f64 {
    0.001
}

fn default_lifecycle_base_delay_ms() -> u64 {
    5000
}

fn default_open_protection_minutes() -> u32 {
    5
}

fn default_gate_poll_secs() -> u64 {
    30
}

fn default_indicator_capacity() -> usize {
    100
}

fn default_expiry_min_months() -> u32 {
    3
}

fn default_post_open_delay_minutes() -> u32 {
    10
}

fn default_max_search_failures_per_day() -> u32 {
    3
}

fn default_verify_delays_secs() -> Vec<u64> {
    vec![5, 10]
}

fn default_ema_periods() -> Vec<u32> {
    vec![5, 10, 20]
}

fn default_rsi_periods() -> Vec<u32> {
    vec![6, 12]
}

fn default_psy_periods() -> Vec<u32> {
    vec![12]
}

fn default_should_rebuy() -> bool {
    true
}

// =============================================================================
// Per-monitor sections
// =============================================================================

/// Warrant auto-search and distance-switching parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSearchConfig {
    /// Whether auto-search drives this monitor's seats. When off, the static
    /// `long_symbol` / `short_symbol` codes are used as-is.
    #[serde(default)]
    pub enabled: bool,

    /// Minimum signed distance-to-recall for candidates, percent. Positive
    /// for the bull side (`distance > min`), negative for the bear side
    /// (`distance < min`).
    #[serde(default)]
    pub long_min_distance_pct: f64,
    #[serde(default)]
    pub short_min_distance_pct: f64,

    /// Minimum turnover per trading minute a candidate must have shown.
    #[serde(default)]
    pub min_turnover_per_minute: f64,

    /// Candidates must expire at least this many months out.
    #[serde(default = "default_expiry_min_months")]
    pub expiry_min_months: u32,

    /// Minutes after the 09:30 open before the turnover filter applies.
    #[serde(default = "default_post_open_delay_minutes")]
    pub post_open_delay_minutes: u32,

    /// Directional distance band `[min, max]`; a READY seat whose live
    /// distance leaves this band is switched out.
    #[serde(default)]
    pub switch_distance_range: Option<[f64; 2]>,

    /// Whether to re-enter a position of equivalent notional after a
    /// distance-driven switch completes.
    #[serde(default = "default_should_rebuy")]
    pub should_rebuy: bool,

    /// Searches failing this many times in one HK day freeze the seat until
    /// the next midnight clear.
    #[serde(default = "default_max_search_failures_per_day")]
    pub max_search_failures_per_day: u32,
}

impl Default for AutoSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            long_min_distance_pct: 1.0,
            short_min_distance_pct: -1.0,
            min_turnover_per_minute: 0.0,
            expiry_min_months: default_expiry_min_months(),
            post_open_delay_minutes: default_post_open_delay_minutes(),
            switch_distance_range: None,
            should_rebuy: true,
            max_search_failures_per_day: default_max_search_failures_per_day(),
        }
    }
}

/// Indicator look-back periods computed per tick.
///
/// MFI(14), KDJ(9/5) and MACD(12,26,9) are fixed; only EMA/RSI/PSY periods
/// are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorPeriods {
    #[serde(default = "default_ema_periods")]
    pub ema: Vec<u32>,
    #[serde(default = "default_rsi_periods")]
    pub rsi: Vec<u32>,
    #[serde(default = "default_psy_periods")]
    pub psy: Vec<u32>,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            ema: default_ema_periods(),
            rsi: default_rsi_periods(),
            psy: default_psy_periods(),
        }
    }
}

/// Delayed-signal verification: which indicator names must keep trending at
/// t0+5s / t0+10s before a delayed buy goes through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Indicator names checked for long-side (BUYCALL) delayed signals.
    #[serde(default)]
    pub long_indicators: Vec<String>,
    /// Indicator names checked for short-side (BUYPUT) delayed signals.
    #[serde(default)]
    pub short_indicators: Vec<String>,
    /// Verification offsets after signal registration, seconds.
    #[serde(default = "default_verify_delays_secs")]
    pub delays_secs: Vec<u64>,
}

impl VerificationConfig {
    /// Indicator set for the given action's direction.
    pub fn indicators_for(&self, action: SignalAction) -> &[String] {
        match action.direction() {
            Some(d) if d.is_long() => &self.long_indicators,
            Some(_) => &self.short_indicators,
            None => &[],
        }
    }
}

/// Comparison operator inside a signal rule condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    /// Indicator strictly above the threshold.
    Gt,
    /// Indicator strictly below the threshold.
    Lt,
    /// Indicator crossed above the threshold since the previous snapshot.
    CrossAbove,
    /// Indicator crossed below the threshold since the previous snapshot.
    CrossBelow,
}

/// One indicator condition, e.g. `K CrossAbove 20`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorCondition {
    /// Indicator name resolvable by `IndicatorSnapshot::value_of`
    /// (e.g. "RSI6", "K", "J", "MACD", "MFI", "price").
    pub indicator: String,
    pub op: ConditionOp,
    pub value: f64,
}

/// Whether a matched rule fires immediately or goes through the delayed
/// verifier first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDispatch {
    Immediate,
    Delayed,
}

impl Default for SignalDispatch {
    fn default() -> Self {
        Self::Immediate
    }
}

/// A rule producing a signal when all its conditions hold on the current
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRule {
    pub action: SignalAction,
    pub conditions: Vec<IndicatorCondition>,
    #[serde(default)]
    pub dispatch: SignalDispatch,
    /// Reason string attached to emitted signals.
    #[serde(default)]
    pub reason: String,
}

/// Risk thresholds per monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum unrealized loss (HKD) tolerated per warrant before protective
    /// liquidation. `0` disables the check.
    #[serde(default)]
    pub max_unrealized_loss_per_symbol: f64,

    /// Signed distance threshold at which a held bull warrant is liquidated
    /// (`distance < threshold`).
    #[serde(default)]
    pub bull_liquidation_distance_pct: f64,

    /// Signed distance threshold at which a held bear warrant is liquidated
    /// (`distance > threshold`). Usually negative.
    #[serde(default)]
    pub bear_liquidation_distance_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_unrealized_loss_per_symbol: 0.0,
            bull_liquidation_distance_pct: 0.5,
            bear_liquidation_distance_pct: -0.5,
        }
    }
}

/// Cooldown applied after a position in a (symbol, direction) closes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value")]
pub enum CooldownRule {
    /// No cooldown.
    None,
    /// Fixed number of minutes after the executed time.
    Minutes(u64),
    /// Blocked for twelve hours after the executed time.
    HalfDay,
    /// Blocked until the HK date key changes.
    OneDay,
}

impl Default for CooldownRule {
    fn default() -> Self {
        Self::None
    }
}

/// Full configuration for one monitor symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// The underlying index / stock whose K-lines drive decisions,
    /// e.g. `HSI.HK`.
    pub symbol: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Static warrant codes used when auto-search is off (or as the initial
    /// binding before the first search).
    #[serde(default)]
    pub long_symbol: Option<String>,
    #[serde(default)]
    pub short_symbol: Option<String>,

    #[serde(default)]
    pub auto_search: AutoSearchConfig,

    #[serde(default)]
    pub indicator_periods: IndicatorPeriods,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub signal_rules: Vec<SignalRule>,

    #[serde(default)]
    pub risk: RiskLimits,

    #[serde(default)]
    pub cooldown: CooldownRule,

    /// Substrings matched against normalised broker stock names to claim an
    /// order for this monitor (see `orders::ownership`).
    #[serde(default)]
    pub ownership_keys: Vec<String>,

    /// Target notional per entry, HKD. Order quantity is
    /// `floor((notional / price) / lot_size) × lot_size`.
    #[serde(default)]
    pub target_notional: f64,
}

// =============================================================================
// Global sections
// =============================================================================

/// Order-lifecycle timeouts and price-replacement tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLifecycleConfig {
    /// Buy orders older than this are cancelled outright.
    #[serde(default = "default_buy_timeout_secs")]
    pub buy_timeout_secs: u64,

    /// Sell orders older than this are cancelled and re-sent as market
    /// orders for the remaining quantity.
    #[serde(default = "default_sell_timeout_secs")]
    pub sell_timeout_secs: u64,

    /// Minimum interval between price-replacement requests per order.
    #[serde(default = "default_price_update_interval_ms")]
    pub price_update_interval_ms: u64,

    /// Minimum |quote − submitted| before a replace is worth sending.
    #[serde(default = "default_price_replace_threshold")]
    pub price_replace_threshold: f64,
}

impl Default for OrderLifecycleConfig {
    fn default() -> Self {
        Self {
            buy_timeout_secs: default_buy_timeout_secs(),
            sell_timeout_secs: default_sell_timeout_secs(),
            price_update_interval_ms: default_price_update_interval_ms(),
            price_replace_threshold: default_price_replace_threshold(),
        }
    }
}

/// Startup gate behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateMode {
    /// Wait for a trading day + continuous session + open protection.
    Strict,
    /// Return immediately (tests, replay).
    Skip,
}

impl Default for GateMode {
    fn default() -> Self {
        Self::Strict
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub mode: GateMode,

    /// Minutes after the open during which trading stays gated.
    #[serde(default = "default_open_protection_minutes")]
    pub open_protection_minutes: u32,

    /// Poll interval while waiting for the gate to open.
    #[serde(default = "default_gate_poll_secs")]
    pub poll_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mode: GateMode::Strict,
            open_protection_minutes: default_open_protection_minutes(),
            poll_secs: default_gate_poll_secs(),
        }
    }
}

/// Day-lifecycle retry behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Base delay for midnight/rebuild retries; the n-th failure waits
    /// `base × 2^(n−1)`, capped at 16× base.
    #[serde(default = "default_lifecycle_base_delay_ms")]
    pub base_retry_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            base_retry_delay_ms: default_lifecycle_base_delay_ms(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,

    /// Main-loop tick interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default)]
    pub order: OrderLifecycleConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Root directory for the append-only trade log
    /// (`<log_dir>/trades/YYYY-MM-DD.json`).
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Indicator ring-buffer capacity per monitor.
    #[serde(default = "default_indicator_capacity")]
    pub indicator_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitors: Vec::new(),
            tick_interval_ms: default_tick_interval_ms(),
            order: OrderLifecycleConfig::default(),
            gate: GateConfig::default(),
            lifecycle: LifecycleConfig::default(),
            log_dir: default_log_dir(),
            indicator_cache_capacity: default_indicator_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            monitors = config.monitors.len(),
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Find a monitor's configuration by symbol.
    pub fn monitor(&self, symbol: &str) -> Option<&MonitorConfig> {
        self.monitors.iter().find(|m| m.symbol == symbol)
    }
}

// =============================================================================
// Broker credentials (environment only — never serialised)
// =============================================================================

/// Longport OpenAPI credentials pulled from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub app_key: String,
    pub app_secret: String,
    pub access_token: String,
    /// Endpoint region, `hk` by default.
    pub region: String,
}

impl Credentials {
    /// Read `LONGPORT_APP_KEY` / `LONGPORT_APP_SECRET` /
    /// `LONGPORT_ACCESS_TOKEN` / `LONGPORT_REGION` from the environment.
    pub fn from_env() -> Result<Self> {
        let app_key =
            std::env::var("LONGPORT_APP_KEY").context("LONGPORT_APP_KEY is not set")?;
        let app_secret =
            std::env::var("LONGPORT_APP_SECRET").context("LONGPORT_APP_SECRET is not set")?;
        let access_token =
            std::env::var("LONGPORT_ACCESS_TOKEN").context("LONGPORT_ACCESS_TOKEN is not set")?;
        let region = std::env::var("LONGPORT_REGION").unwrap_or_else(|_| "hk".to_string());

        Ok(Self {
            app_key,
            app_secret,
            access_token,
            region,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &"<redacted>")
            .field("app_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert!(cfg.monitors.is_empty());
        assert_eq!(cfg.tick_interval_ms, 1000);
        assert_eq!(cfg.order.buy_timeout_secs, 30);
        assert_eq!(cfg.order.sell_timeout_secs, 20);
        assert!((cfg.order.price_replace_threshold - 0.001).abs() < f64::EPSILON);
        assert_eq!(cfg.gate.mode, GateMode::Strict);
        assert_eq!(cfg.indicator_cache_capacity, 100);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.tick_interval_ms, 1000);
        assert_eq!(cfg.lifecycle.base_retry_delay_ms, 5000);
        assert_eq!(cfg.log_dir, "logs");
    }

    #[test]
    fn deserialise_partial_monitor_fills_defaults() {
        let json = r#"{
            "monitors": [
                { "symbol": "HSI.HK", "target_notional": 5000.0 }
            ]
        }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        let m = cfg.monitor("HSI.HK").unwrap();
        assert!(!m.auto_search.enabled);
        assert_eq!(m.auto_search.max_search_failures_per_day, 3);
        assert_eq!(m.indicator_periods.rsi, vec![6, 12]);
        assert_eq!(m.verification.delays_secs, vec![5, 10]);
        assert_eq!(m.cooldown, CooldownRule::None);
        assert!((m.target_notional - 5000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cooldown_rule_roundtrip() {
        let rule = CooldownRule::Minutes(15);
        let json = serde_json::to_string(&rule).unwrap();
        let back: CooldownRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, back);
    }

    #[test]
    fn verification_indicator_sets_by_direction() {
        let v = VerificationConfig {
            long_indicators: vec!["K".into()],
            short_indicators: vec!["RSI6".into()],
            delays_secs: vec![5, 10],
        };
        assert_eq!(v.indicators_for(SignalAction::BuyCall), ["K".to_string()]);
        assert_eq!(v.indicators_for(SignalAction::BuyPut), ["RSI6".to_string()]);
        assert!(v.indicators_for(SignalAction::Hold).is_empty());
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.tick_interval_ms, cfg2.tick_interval_ms);
        assert_eq!(cfg.log_dir, cfg2.log_dir);
    }
}
