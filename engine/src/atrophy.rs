use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use momentum_core::snapshot::normalize_signed;
use momentum_core::{AgencySnapshot, BottleneckReason, BottleneckTask, MomentumError, SkillTrend};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AtrophyConfig;
use crate::detector::BottleneckDetector;
use crate::ports::SnapshotSource;

const AUTONOMY_WEIGHT: f64 = 0.5;
const INDEPENDENCE_WEIGHT: f64 = 0.3;
const SKILL_WEIGHT: f64 = 0.2;

const TIME_URGENCY_WEIGHT: f64 = 0.4;
const DECLINE_URGENCY_WEIGHT: f64 = 0.4;
const LEVEL_URGENCY_WEIGHT: f64 = 0.2;

const SECONDS_PER_WEEK: f64 = 7.0 * 86_400.0;

/// Proficiency of a single snapshot, in [0, 1].
pub fn proficiency(snapshot: &AgencySnapshot) -> f64 {
    (AUTONOMY_WEIGHT * snapshot.autonomy_retention
        + INDEPENDENCE_WEIGHT * (1.0 - snapshot.ai_reliance)
        + SKILL_WEIGHT * normalize_signed(snapshot.skill_development))
    .clamp(0.0, 1.0)
}

/// Least-squares slope of `(x, y)` points. Zero when the fit is undefined.
fn least_squares_slope(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (covariance, variance) = points.iter().fold((0.0, 0.0), |(cov, var), (x, y)| {
        let dx = x - mean_x;
        (cov + dx * (y - mean_y), var + dx * dx)
    });
    if variance <= f64::EPSILON {
        0.0
    } else {
        covariance / variance
    }
}

/// Breakdown of a practice urgency score. Every term is in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PracticeUrgency {
    pub time: f64,
    pub decline: f64,
    pub level: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeSuggestion {
    pub trend: SkillTrend,
    pub urgency: PracticeUrgency,
    pub rationale: String,
}

/// Tracks per-category usage and decline, and proposes practice.
pub struct AtrophyMonitor {
    config: AtrophyConfig,
    snapshots: Arc<dyn SnapshotSource>,
    detector: Arc<BottleneckDetector>,
    clock: Arc<dyn Clock>,
    latest: RwLock<HashMap<Uuid, Vec<SkillTrend>>>,
}

impl AtrophyMonitor {
    pub fn new(
        config: AtrophyConfig,
        snapshots: Arc<dyn SnapshotSource>,
        detector: Arc<BottleneckDetector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            snapshots,
            detector,
            clock,
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AtrophyConfig {
        &self.config
    }

    pub async fn scan(&self, user_id: Uuid) -> Result<Vec<SkillTrend>, MomentumError> {
        self.scan_at(user_id, self.clock.now()).await
    }

    /// One trend per category the user ever worked in, sorted by category.
    ///
    /// Slope and level come from the lookback window. A category with no
    /// snapshot inside the window still gets a trend built from its last
    /// snapshot, so long-abandoned skills keep showing up.
    pub async fn scan_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SkillTrend>, MomentumError> {
        let lookback = ChronoDuration::from_std(self.config.lookback)
            .unwrap_or_else(|_| ChronoDuration::days(120));
        let history = self.snapshots.history(user_id, now - lookback).await?;

        let mut by_category: BTreeMap<String, Vec<AgencySnapshot>> = BTreeMap::new();
        for snapshot in history {
            if let Err(err) = snapshot.validate() {
                tracing::warn!(
                    error = %err,
                    user_id = %user_id,
                    snapshot_id = %snapshot.task_id,
                    "skipping malformed snapshot in atrophy scan"
                );
                continue;
            }
            by_category
                .entry(snapshot.task_category.clone())
                .or_default()
                .push(snapshot);
        }

        for snapshot in self.snapshots.latest_per_category(user_id).await? {
            if by_category.contains_key(&snapshot.task_category) {
                continue;
            }
            if let Err(err) = snapshot.validate() {
                tracing::warn!(
                    error = %err,
                    user_id = %user_id,
                    snapshot_id = %snapshot.task_id,
                    "skipping malformed snapshot in atrophy scan"
                );
                continue;
            }
            by_category.insert(snapshot.task_category.clone(), vec![snapshot]);
        }

        let trends: Vec<SkillTrend> = by_category
            .into_iter()
            .filter_map(|(category, mut snapshots)| {
                snapshots.sort_by_key(|s| s.timestamp);
                self.trend_for(user_id, category, &snapshots)
            })
            .collect();

        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, trends.clone());
        Ok(trends)
    }

    fn trend_for(
        &self,
        user_id: Uuid,
        task_category: String,
        snapshots: &[AgencySnapshot],
    ) -> Option<SkillTrend> {
        let first = snapshots.first()?;
        let last = snapshots.last()?;

        let points: Vec<(f64, f64)> = snapshots
            .iter()
            .map(|s| {
                let seconds = s.timestamp.signed_duration_since(first.timestamp).num_seconds();
                (seconds as f64 / SECONDS_PER_WEEK, proficiency(s))
            })
            .collect();

        let window = self.config.level_window.max(1).min(points.len());
        let recent = &points[points.len() - window..];
        let current_level = recent.iter().map(|(_, y)| y).sum::<f64>() / window as f64;

        Some(SkillTrend {
            user_id,
            task_category,
            last_used_at: last.timestamp,
            decline_slope: least_squares_slope(&points),
            current_level: current_level.clamp(0.0, 1.0),
        })
    }

    /// Trends from the most recent scan, if one ran.
    pub fn latest_trends(&self, user_id: Uuid) -> Option<Vec<SkillTrend>> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .cloned()
    }

    pub fn is_declining(&self, trend: &SkillTrend, now: DateTime<Utc>) -> bool {
        trend.days_unused(now) >= self.config.warning_days
            || trend.decline_slope < -self.config.decline_slope_threshold
    }

    pub async fn detect_declining(&self, user_id: Uuid) -> Result<Vec<SkillTrend>, MomentumError> {
        let now = self.clock.now();
        let trends = self.scan_at(user_id, now).await?;
        Ok(trends
            .into_iter()
            .filter(|trend| self.is_declining(trend, now))
            .collect())
    }

    pub fn practice_urgency(&self, trend: &SkillTrend, now: DateTime<Utc>) -> PracticeUrgency {
        let time = if self.config.critical_days > 0.0 {
            (trend.days_unused(now) / self.config.critical_days).min(1.0)
        } else {
            1.0
        };
        let decline = (-trend.decline_slope).clamp(0.0, 1.0);
        let level = trend.current_level.clamp(0.0, 1.0);
        let total = (TIME_URGENCY_WEIGHT * time
            + DECLINE_URGENCY_WEIGHT * decline
            + LEVEL_URGENCY_WEIGHT * level)
            .clamp(0.0, 1.0);
        PracticeUrgency {
            time,
            decline,
            level,
            total,
        }
    }

    /// Declining categories ranked by urgency, most urgent first.
    pub async fn generate_practice_suggestions(
        &self,
        user_id: Uuid,
        max_n: usize,
    ) -> Result<Vec<PracticeSuggestion>, MomentumError> {
        let now = self.clock.now();
        let declining = self.detect_declining(user_id).await?;
        let mut suggestions: Vec<PracticeSuggestion> = declining
            .into_iter()
            .map(|trend| {
                let urgency = self.practice_urgency(&trend, now);
                let rationale = rationale(&trend, &urgency, now);
                PracticeSuggestion {
                    trend,
                    urgency,
                    rationale,
                }
            })
            .collect();
        suggestions.sort_by(|a, b| {
            b.urgency
                .total
                .partial_cmp(&a.urgency.total)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.trend.task_category.cmp(&b.trend.task_category))
        });
        suggestions.truncate(max_n);
        Ok(suggestions)
    }

    /// Turn the top suggestions into atrophy tasks. Categories with an open
    /// atrophy task inside the cooldown are skipped. The caller enqueues.
    pub async fn queue_practice_tasks(
        &self,
        user_id: Uuid,
        max_n: usize,
    ) -> Result<Vec<BottleneckTask>, MomentumError> {
        if max_n == 0 {
            return Ok(Vec::new());
        }
        let suggestions = self.generate_practice_suggestions(user_id, max_n).await?;
        let tasks: Vec<BottleneckTask> = suggestions
            .iter()
            .filter_map(|suggestion| {
                self.detector.register(
                    user_id,
                    &suggestion.trend.task_category,
                    BottleneckReason::Atrophy,
                    suggestion.urgency.total,
                )
            })
            .collect();
        if !tasks.is_empty() {
            tracing::info!(
                user_id = %user_id,
                created = tasks.len(),
                suggested = suggestions.len(),
                "practice tasks created"
            );
        }
        Ok(tasks)
    }
}

fn rationale(trend: &SkillTrend, urgency: &PracticeUrgency, now: DateTime<Utc>) -> String {
    let days = trend.days_unused(now);
    let mut parts = Vec::new();
    if days >= 1.0 {
        parts.push(format!("unused for {:.0} days", days.floor()));
    }
    if trend.decline_slope < 0.0 {
        parts.push(format!(
            "proficiency falling {:.2} per week",
            -trend.decline_slope
        ));
    }
    parts.push(format!("current level {:.2}", trend.current_level));
    format!(
        "Practice {}: {} (urgency {:.2})",
        trend.task_category,
        parts.join(", "),
        urgency.total
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DetectorConfig;
    use crate::memory::MemorySnapshotSource;

    struct Fixture {
        monitor: AtrophyMonitor,
        source: Arc<MemorySnapshotSource>,
        clock: Arc<ManualClock>,
        user_id: Uuid,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let source = Arc::new(MemorySnapshotSource::new());
        let detector = Arc::new(BottleneckDetector::new(DetectorConfig::default(), clock.clone()));
        let monitor = AtrophyMonitor::new(
            AtrophyConfig::default(),
            source.clone(),
            detector,
            clock.clone(),
        );
        Fixture {
            monitor,
            source,
            clock,
            user_id: Uuid::now_v7(),
        }
    }

    fn snapshot(user_id: Uuid, category: &str, at: DateTime<Utc>, autonomy: f64) -> AgencySnapshot {
        AgencySnapshot {
            timestamp: at,
            task_id: Uuid::now_v7(),
            task_category: category.to_string(),
            user_id,
            skill_development: 0.0,
            delta_agency: 0.0,
            ai_reliance: 0.5,
            autonomy_retention: autonomy,
        }
    }

    #[test]
    fn proficiency_weights_sum_to_one() {
        let perfect = AgencySnapshot {
            skill_development: 1.0,
            ai_reliance: 0.0,
            autonomy_retention: 1.0,
            ..snapshot(Uuid::now_v7(), "x", Utc::now(), 1.0)
        };
        assert!((proficiency(&perfect) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn slope_of_flat_or_single_point_is_zero() {
        assert_eq!(least_squares_slope(&[]), 0.0);
        assert_eq!(least_squares_slope(&[(1.0, 0.5)]), 0.0);
        assert_eq!(least_squares_slope(&[(1.0, 0.5), (1.0, 0.9)]), 0.0);
        assert!((least_squares_slope(&[(0.0, 1.0), (1.0, 0.5), (2.0, 0.0)]) + 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unused_category_is_declining_and_urgent() {
        let f = fixture();
        let now = f.clock.now();
        f.source
            .push(snapshot(f.user_id, "writing", now - ChronoDuration::days(20), 0.6));

        let declining = f.monitor.detect_declining(f.user_id).await.unwrap();
        assert_eq!(declining.len(), 1);
        let trend = &declining[0];
        assert_eq!(trend.task_category, "writing");
        assert_eq!(trend.decline_slope, 0.0);

        let urgency = f.monitor.practice_urgency(trend, now);
        assert!(urgency.total > 0.0);
        assert!((urgency.time - 20.0 / 30.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn time_urgency_saturates_past_critical_days() {
        let f = fixture();
        let now = f.clock.now();
        f.source
            .push(snapshot(f.user_id, "writing", now - ChronoDuration::days(35), 0.6));

        let declining = f.monitor.detect_declining(f.user_id).await.unwrap();
        assert_eq!(declining.len(), 1);
        let urgency = f.monitor.practice_urgency(&declining[0], now);
        assert_eq!(urgency.time, 1.0);
    }

    #[tokio::test]
    async fn skill_unused_beyond_lookback_is_still_reported() {
        let f = fixture();
        let now = f.clock.now();
        f.source
            .push(snapshot(f.user_id, "recent", now - ChronoDuration::days(35), 0.6));
        f.source
            .push(snapshot(f.user_id, "ancient", now - ChronoDuration::days(160), 0.4));
        f.source
            .push(snapshot(f.user_id, "ancient", now - ChronoDuration::days(150), 0.6));

        let declining = f.monitor.detect_declining(f.user_id).await.unwrap();
        let categories: Vec<_> = declining.iter().map(|t| t.task_category.as_str()).collect();
        assert_eq!(categories, vec!["ancient", "recent"]);

        let ancient = &declining[0];
        assert_eq!(ancient.last_used_at, now - ChronoDuration::days(150));
        assert_eq!(ancient.decline_slope, 0.0);
        assert_eq!(f.monitor.practice_urgency(ancient, now).time, 1.0);
    }

    #[tokio::test]
    async fn recently_used_stable_category_is_not_declining() {
        let f = fixture();
        let now = f.clock.now();
        for day in [3, 2, 1] {
            f.source
                .push(snapshot(f.user_id, "writing", now - ChronoDuration::days(day), 0.6));
        }
        assert!(f.monitor.detect_declining(f.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn falling_proficiency_is_declining_with_negative_weekly_slope() {
        let f = fixture();
        let now = f.clock.now();
        for (week, autonomy) in [(3, 0.9), (2, 0.7), (1, 0.5), (0, 0.3)] {
            f.source.push(snapshot(
                f.user_id,
                "debugging",
                now - ChronoDuration::weeks(week),
                autonomy,
            ));
        }
        let trends = f.monitor.scan(f.user_id).await.unwrap();
        assert_eq!(trends.len(), 1);
        // 0.5 weight on autonomy dropping 0.2 per week.
        assert!((trends[0].decline_slope + 0.1).abs() < 1e-6, "{}", trends[0].decline_slope);
        assert!(f.monitor.is_declining(&trends[0], now));
        assert_eq!(f.monitor.latest_trends(f.user_id), Some(trends));
    }

    #[tokio::test]
    async fn current_level_averages_recent_window() {
        let f = fixture();
        let now = f.clock.now();
        for i in 0..8 {
            let autonomy = if i < 3 { 0.0 } else { 1.0 };
            f.source.push(snapshot(
                f.user_id,
                "writing",
                now - ChronoDuration::hours(8 - i),
                autonomy,
            ));
        }
        let trends = f.monitor.scan(f.user_id).await.unwrap();
        // Last five snapshots all have autonomy 1.0, reliance 0.5, skill 0.
        assert!((trends[0].current_level - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn suggestions_are_ranked_by_urgency() {
        let f = fixture();
        let now = f.clock.now();
        f.source
            .push(snapshot(f.user_id, "design", now - ChronoDuration::days(15), 0.5));
        f.source
            .push(snapshot(f.user_id, "writing", now - ChronoDuration::days(40), 0.5));
        f.source
            .push(snapshot(f.user_id, "fresh", now - ChronoDuration::hours(1), 0.5));

        let suggestions = f
            .monitor
            .generate_practice_suggestions(f.user_id, 5)
            .await
            .unwrap();
        let categories: Vec<_> = suggestions
            .iter()
            .map(|s| s.trend.task_category.as_str())
            .collect();
        assert_eq!(categories, vec!["writing", "design"]);
        assert!(suggestions[0].rationale.contains("writing"));
        assert!(suggestions[0].rationale.contains("unused for 40 days"));

        let limited = f
            .monitor
            .generate_practice_suggestions(f.user_id, 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn queued_practice_tasks_are_suppressed_on_repeat() {
        let f = fixture();
        let now = f.clock.now();
        f.source
            .push(snapshot(f.user_id, "writing", now - ChronoDuration::days(30), 0.5));

        let first = f.monitor.queue_practice_tasks(f.user_id, 3).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].reason, BottleneckReason::Atrophy);
        let expected = f.monitor.practice_urgency(&f.monitor.latest_trends(f.user_id).unwrap()[0], now);
        assert!((first[0].severity - expected.total).abs() < 1e-9);

        let second = f.monitor.queue_practice_tasks(f.user_id, 3).await.unwrap();
        assert!(second.is_empty());
        assert!(f.monitor.queue_practice_tasks(f.user_id, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_history_is_skipped() {
        let f = fixture();
        let now = f.clock.now();
        let mut broken = snapshot(f.user_id, "writing", now - ChronoDuration::days(1), 0.5);
        broken.skill_development = f64::NAN;
        f.source.push(broken);
        assert!(f.monitor.scan(f.user_id).await.unwrap().is_empty());
    }
}
