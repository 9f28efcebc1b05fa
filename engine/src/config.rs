use std::time::Duration;

use chrono::Duration as ChronoDuration;
use momentum_core::MomentumState;

pub const TIMEOUT_WIN_STRENGTH_SECS_ENV: &str = "MOMENTUM_TIMEOUT_WIN_STRENGTH_SECS";
pub const TIMEOUT_AFFIRM_PRIDE_SECS_ENV: &str = "MOMENTUM_TIMEOUT_AFFIRM_PRIDE_SECS";
pub const TIMEOUT_PIVOT_DETECT_SECS_ENV: &str = "MOMENTUM_TIMEOUT_PIVOT_DETECT_SECS";
pub const TIMEOUT_REFRAME_STRENGTH_SECS_ENV: &str = "MOMENTUM_TIMEOUT_REFRAME_STRENGTH_SECS";
pub const TIMEOUT_LAUNCH_GROWTH_SECS_ENV: &str = "MOMENTUM_TIMEOUT_LAUNCH_GROWTH_SECS";
pub const TIMEOUT_WIN_GROWTH_SECS_ENV: &str = "MOMENTUM_TIMEOUT_WIN_GROWTH_SECS";
pub const SWEEP_INTERVAL_SECS_ENV: &str = "MOMENTUM_SWEEP_INTERVAL_SECS";
pub const ATROPHY_SWEEP_INTERVAL_SECS_ENV: &str = "MOMENTUM_ATROPHY_SWEEP_INTERVAL_SECS";
pub const PRACTICE_TASKS_PER_PIVOT_ENV: &str = "MOMENTUM_PRACTICE_TASKS_PER_PIVOT";
pub const SKILL_LOSS_THRESHOLD_ENV: &str = "MOMENTUM_SKILL_LOSS_THRESHOLD";
pub const AGENCY_LOSS_THRESHOLD_ENV: &str = "MOMENTUM_AGENCY_LOSS_THRESHOLD";
pub const HIGH_RELIANCE_THRESHOLD_ENV: &str = "MOMENTUM_HIGH_RELIANCE_THRESHOLD";
pub const BOTTLENECK_COOLDOWN_SECS_ENV: &str = "MOMENTUM_BOTTLENECK_COOLDOWN_SECS";
pub const SCALER_LOOKBACK_DAYS_ENV: &str = "MOMENTUM_SCALER_LOOKBACK_DAYS";
pub const SCALER_MIN_SAMPLES_ENV: &str = "MOMENTUM_SCALER_MIN_SAMPLES";
pub const ATROPHY_WARNING_DAYS_ENV: &str = "MOMENTUM_ATROPHY_WARNING_DAYS";
pub const ATROPHY_CRITICAL_DAYS_ENV: &str = "MOMENTUM_ATROPHY_CRITICAL_DAYS";
pub const ATROPHY_LOOKBACK_DAYS_ENV: &str = "MOMENTUM_ATROPHY_LOOKBACK_DAYS";

const MAX_TIMEOUT_SECS: u64 = 30 * 24 * 3600;

/// Maximum dwell per state. `None` means the state is never timed out.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    pub win_strength: Option<Duration>,
    pub affirm_pride: Option<Duration>,
    pub pivot_detect: Option<Duration>,
    pub reframe_strength: Option<Duration>,
    pub launch_growth: Option<Duration>,
    pub win_growth: Option<Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            win_strength: Some(Duration::from_secs(3600)),
            affirm_pride: Some(Duration::from_secs(300)),
            pivot_detect: Some(Duration::from_secs(300)),
            reframe_strength: Some(Duration::from_secs(3600)),
            // Growth work may take days; long but still monitored.
            launch_growth: Some(Duration::from_secs(72 * 3600)),
            win_growth: Some(Duration::from_secs(300)),
        }
    }
}

impl TimeoutPolicy {
    pub fn limit_for(&self, state: MomentumState) -> Option<ChronoDuration> {
        let limit = match state {
            MomentumState::Idle => None,
            MomentumState::WinStrength => self.win_strength,
            MomentumState::AffirmPride => self.affirm_pride,
            MomentumState::PivotDetect => self.pivot_detect,
            MomentumState::ReframeStrength => self.reframe_strength,
            MomentumState::LaunchGrowth => self.launch_growth,
            MomentumState::WinGrowth => self.win_growth,
        }?;
        ChronoDuration::from_std(limit).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// skill_development below this fires a skill_loss task
    pub skill_loss_threshold: f64,
    /// delta_agency below this fires an agency_loss task
    pub agency_loss_threshold: f64,
    /// ai_reliance above this fires a high_reliance task
    pub high_reliance_threshold: f64,
    /// Target skill_development used for the skill-gap term
    pub ideal_skill: f64,
    /// Days since the last attempt at which the recency term saturates
    pub recency_saturation_days: f64,
    /// How long an unresolved task suppresses duplicates
    pub cooldown: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            skill_loss_threshold: -0.15,
            agency_loss_threshold: -0.10,
            high_reliance_threshold: 0.90,
            ideal_skill: 0.0,
            recency_saturation_days: 30.0,
            cooldown: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalerConfig {
    pub lookback: Duration,
    /// Below this many valid snapshots the scaler returns the comfortable default
    pub min_samples: usize,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(14 * 24 * 3600),
            min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtrophyConfig {
    /// Days unused after which a skill is flagged as declining
    pub warning_days: f64,
    /// Days unused at which time urgency saturates
    pub critical_days: f64,
    /// A slope below `-decline_slope_threshold` counts as declining
    pub decline_slope_threshold: f64,
    /// How far back a scan reads history
    pub lookback: Duration,
    /// Most recent snapshots averaged into `current_level`
    pub level_window: usize,
}

impl Default for AtrophyConfig {
    fn default() -> Self {
        Self {
            warning_days: 14.0,
            critical_days: 30.0,
            decline_slope_threshold: 0.0,
            lookback: Duration::from_secs(120 * 24 * 3600),
            level_window: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub timeouts: TimeoutPolicy,
    /// How often the timeout sweep runs
    pub sweep_interval: Duration,
    /// How often the atrophy sweep runs
    pub atrophy_sweep_interval: Duration,
    /// Practice tasks queued per PIVOT_DETECT pass
    pub practice_tasks_per_pivot: usize,
    pub detector: DetectorConfig,
    pub scaler: ScalerConfig,
    pub atrophy: AtrophyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutPolicy::default(),
            sweep_interval: Duration::from_secs(30),
            atrophy_sweep_interval: Duration::from_secs(6 * 3600),
            practice_tasks_per_pivot: 1,
            detector: DetectorConfig::default(),
            scaler: ScalerConfig::default(),
            atrophy: AtrophyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `MOMENTUM_*` variables that parse.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Option<Duration>| -> Option<Duration> {
            let fallback = default.map(|d| d.as_secs()).unwrap_or(0);
            match parse_env_u64_with_bounds(key, lookup(key), 0, MAX_TIMEOUT_SECS, fallback) {
                (0, true) => None,
                (value, true) => Some(Duration::from_secs(value)),
                (_, false) => default,
            }
        };

        let timeouts = TimeoutPolicy {
            win_strength: secs(TIMEOUT_WIN_STRENGTH_SECS_ENV, defaults.timeouts.win_strength),
            affirm_pride: secs(TIMEOUT_AFFIRM_PRIDE_SECS_ENV, defaults.timeouts.affirm_pride),
            pivot_detect: secs(TIMEOUT_PIVOT_DETECT_SECS_ENV, defaults.timeouts.pivot_detect),
            reframe_strength: secs(
                TIMEOUT_REFRAME_STRENGTH_SECS_ENV,
                defaults.timeouts.reframe_strength,
            ),
            launch_growth: secs(TIMEOUT_LAUNCH_GROWTH_SECS_ENV, defaults.timeouts.launch_growth),
            win_growth: secs(TIMEOUT_WIN_GROWTH_SECS_ENV, defaults.timeouts.win_growth),
        };

        let (sweep_secs, _) = parse_env_u64_with_bounds(
            SWEEP_INTERVAL_SECS_ENV, lookup(SWEEP_INTERVAL_SECS_ENV),
            1,
            3600,
            defaults.sweep_interval.as_secs(),
        );
        let (atrophy_sweep_secs, _) = parse_env_u64_with_bounds(
            ATROPHY_SWEEP_INTERVAL_SECS_ENV, lookup(ATROPHY_SWEEP_INTERVAL_SECS_ENV),
            60,
            7 * 24 * 3600,
            defaults.atrophy_sweep_interval.as_secs(),
        );
        let (practice_tasks_per_pivot, _) = parse_env_u64_with_bounds(
            PRACTICE_TASKS_PER_PIVOT_ENV, lookup(PRACTICE_TASKS_PER_PIVOT_ENV),
            0,
            10,
            defaults.practice_tasks_per_pivot as u64,
        );

        let detector = DetectorConfig {
            skill_loss_threshold: parse_env_f64_with_bounds(
                SKILL_LOSS_THRESHOLD_ENV, lookup(SKILL_LOSS_THRESHOLD_ENV),
                -1.0,
                0.0,
                defaults.detector.skill_loss_threshold,
            ),
            agency_loss_threshold: parse_env_f64_with_bounds(
                AGENCY_LOSS_THRESHOLD_ENV, lookup(AGENCY_LOSS_THRESHOLD_ENV),
                -1.0,
                0.0,
                defaults.detector.agency_loss_threshold,
            ),
            high_reliance_threshold: parse_env_f64_with_bounds(
                HIGH_RELIANCE_THRESHOLD_ENV, lookup(HIGH_RELIANCE_THRESHOLD_ENV),
                0.0,
                1.0,
                defaults.detector.high_reliance_threshold,
            ),
            cooldown: Duration::from_secs(
                parse_env_u64_with_bounds(
                    BOTTLENECK_COOLDOWN_SECS_ENV, lookup(BOTTLENECK_COOLDOWN_SECS_ENV),
                    0,
                    MAX_TIMEOUT_SECS,
                    defaults.detector.cooldown.as_secs(),
                )
                .0,
            ),
            ..defaults.detector
        };

        let scaler = ScalerConfig {
            lookback: days(
                parse_env_u64_with_bounds(
                    SCALER_LOOKBACK_DAYS_ENV, lookup(SCALER_LOOKBACK_DAYS_ENV),
                    1,
                    365,
                    defaults.scaler.lookback.as_secs() / 86_400,
                )
                .0,
            ),
            min_samples: parse_env_u64_with_bounds(
                SCALER_MIN_SAMPLES_ENV, lookup(SCALER_MIN_SAMPLES_ENV),
                1,
                1000,
                defaults.scaler.min_samples as u64,
            )
            .0 as usize,
        };

        let atrophy = AtrophyConfig {
            warning_days: parse_env_f64_with_bounds(
                ATROPHY_WARNING_DAYS_ENV, lookup(ATROPHY_WARNING_DAYS_ENV),
                1.0,
                365.0,
                defaults.atrophy.warning_days,
            ),
            critical_days: parse_env_f64_with_bounds(
                ATROPHY_CRITICAL_DAYS_ENV, lookup(ATROPHY_CRITICAL_DAYS_ENV),
                1.0,
                365.0,
                defaults.atrophy.critical_days,
            ),
            lookback: days(
                parse_env_u64_with_bounds(
                    ATROPHY_LOOKBACK_DAYS_ENV, lookup(ATROPHY_LOOKBACK_DAYS_ENV),
                    7,
                    730,
                    defaults.atrophy.lookback.as_secs() / 86_400,
                )
                .0,
            ),
            ..defaults.atrophy
        };

        Self {
            timeouts,
            sweep_interval: Duration::from_secs(sweep_secs),
            atrophy_sweep_interval: Duration::from_secs(atrophy_sweep_secs),
            practice_tasks_per_pivot: practice_tasks_per_pivot as usize,
            detector,
            scaler,
            atrophy,
        }
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n * 86_400)
}

/// What is wrong with a set variable, if anything.
fn env_problem<T: std::str::FromStr + PartialOrd>(raw: &str, min: T, max: T) -> Option<&'static str> {
    match raw.trim().parse::<T>() {
        Ok(parsed) if parsed >= min && parsed <= max => None,
        Ok(_) => Some("out of range, clamped"),
        Err(_) => Some("not a number, using default"),
    }
}

fn warn_env(key: &str, raw: Option<&str>, problem: Option<&'static str>) {
    if let (Some(raw), Some(problem)) = (raw, problem) {
        tracing::warn!(key, value = %raw, problem, "ignoring invalid configuration value");
    }
}

fn parse_env_u64_with_bounds(
    key: &str,
    raw: Option<String>,
    min: u64,
    max: u64,
    default: u64,
) -> (u64, bool) {
    let problem = raw.as_deref().and_then(|value| env_problem(value, min, max));
    warn_env(key, raw.as_deref(), problem);
    match raw.and_then(|value| value.trim().parse::<u64>().ok()) {
        Some(parsed) => (parsed.clamp(min, max), true),
        None => (default, false),
    }
}

fn parse_env_f64_with_bounds(
    key: &str,
    raw: Option<String>,
    min: f64,
    max: f64,
    default: f64,
) -> f64 {
    let problem = raw.as_deref().and_then(|value| match value.trim().parse::<f64>() {
        Ok(parsed) if !parsed.is_finite() => Some("not a number, using default"),
        _ => env_problem(value, min, max),
    });
    warn_env(key, raw.as_deref(), problem);
    match raw.and_then(|value| value.trim().parse::<f64>().ok()) {
        Some(parsed) if parsed.is_finite() => parsed.clamp(min, max),
        _ => default,
    }
}
