use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use momentum_core::snapshot::normalize_signed;
use momentum_core::{AgencySnapshot, DifficultyProfile, MomentumError};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ScalerConfig;
use crate::ports::SnapshotSource;

const SKILL_TREND_WEIGHT: f64 = 0.3;
const INDEPENDENCE_WEIGHT: f64 = 0.3;
const AUTONOMY_WEIGHT: f64 = 0.2;
const AGENCY_WEIGHT: f64 = 0.2;

/// Performance score in [0, 1] over a set of snapshots, or `None` when the
/// set is empty. Callers are expected to have validated the snapshots.
pub fn performance_score(snapshots: &[AgencySnapshot]) -> Option<f64> {
    if snapshots.is_empty() {
        return None;
    }
    let n = snapshots.len() as f64;
    let mean = |f: fn(&AgencySnapshot) -> f64| snapshots.iter().map(f).sum::<f64>() / n;

    let skill_trend = normalize_signed(mean(|s| s.skill_development));
    let independence = 1.0 - mean(|s| s.ai_reliance);
    let autonomy = mean(|s| s.autonomy_retention);
    let agency = normalize_signed(mean(|s| s.delta_agency));

    let score = SKILL_TREND_WEIGHT * skill_trend
        + INDEPENDENCE_WEIGHT * independence
        + AUTONOMY_WEIGHT * autonomy
        + AGENCY_WEIGHT * agency;
    Some(score.clamp(0.0, 1.0))
}

/// Sizes the next growth task from recent performance. Stateless between
/// calls; the profile is always recomputable from snapshot history.
pub struct DifficultyScaler {
    config: ScalerConfig,
    snapshots: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,
}

impl DifficultyScaler {
    pub fn new(config: ScalerConfig, snapshots: Arc<dyn SnapshotSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            snapshots,
            clock,
        }
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    /// Recommend a profile from the snapshots inside `lookback`.
    ///
    /// When `category` is given and has enough samples on its own, only that
    /// category is scored; otherwise every category counts.
    pub async fn recommend(
        &self,
        user_id: Uuid,
        lookback: Duration,
        category: Option<&str>,
    ) -> Result<DifficultyProfile, MomentumError> {
        let lookback = ChronoDuration::from_std(lookback).unwrap_or_else(|_| ChronoDuration::days(14));
        let since = self.clock.now() - lookback;
        let history = self.snapshots.history(user_id, since).await?;

        let valid: Vec<AgencySnapshot> = history
            .into_iter()
            .filter(|snapshot| match snapshot.validate() {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        user_id = %user_id,
                        snapshot_id = %snapshot.task_id,
                        "skipping malformed snapshot in difficulty history"
                    );
                    false
                }
            })
            .collect();

        let focused: Vec<AgencySnapshot> = match category {
            Some(category) => valid
                .iter()
                .filter(|s| s.task_category == category)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let sample = if !focused.is_empty() && focused.len() >= self.config.min_samples {
            &focused
        } else {
            &valid
        };

        if sample.len() < self.config.min_samples {
            tracing::debug!(
                user_id = %user_id,
                samples = sample.len(),
                min_samples = self.config.min_samples,
                "insufficient history, using comfortable default"
            );
            return Ok(DifficultyProfile::comfortable_default());
        }

        let profile = match performance_score(sample) {
            Some(score) => DifficultyProfile::from_score(score),
            None => DifficultyProfile::comfortable_default(),
        };
        tracing::debug!(
            user_id = %user_id,
            samples = sample.len(),
            score = profile.performance_score,
            tier = profile.complexity_tier.as_str(),
            "difficulty recommended"
        );
        Ok(profile)
    }

    /// `recommend` with the configured lookback.
    pub async fn recommend_default(
        &self,
        user_id: Uuid,
        category: Option<&str>,
    ) -> Result<DifficultyProfile, MomentumError> {
        self.recommend(user_id, self.config.lookback, category).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemorySnapshotSource;
    use chrono::Utc;
    use momentum_core::{ComplexityTier, TimeBlockTier};

    fn snapshot(user_id: Uuid, category: &str, minutes_ago: i64, now: chrono::DateTime<Utc>) -> AgencySnapshot {
        AgencySnapshot {
            timestamp: now - ChronoDuration::minutes(minutes_ago),
            task_id: Uuid::now_v7(),
            task_category: category.to_string(),
            user_id,
            skill_development: 0.6,
            delta_agency: 0.6,
            ai_reliance: 0.2,
            autonomy_retention: 0.8,
        }
    }

    fn scaler(source: Arc<MemorySnapshotSource>, now: chrono::DateTime<Utc>) -> DifficultyScaler {
        DifficultyScaler::new(
            ScalerConfig::default(),
            source,
            Arc::new(ManualClock::new(now)),
        )
    }

    #[test]
    fn strong_history_scores_point_eight() {
        let now = Utc::now();
        let user_id = Uuid::now_v7();
        let history: Vec<_> = (0..5).map(|i| snapshot(user_id, "writing", i, now)).collect();
        let score = performance_score(&history).unwrap();
        assert!((score - 0.8).abs() < 1e-9, "score {score}");
        let profile = DifficultyProfile::from_score(score);
        assert_eq!(profile.complexity_tier, ComplexityTier::Challenging);
        assert_eq!(profile.time_block_tier, TimeBlockTier::Large);
        assert!(profile.growth_ratio >= 0.45 && profile.growth_ratio <= 0.50);
    }

    #[test]
    fn empty_history_has_no_score() {
        assert_eq!(performance_score(&[]), None);
    }

    #[test]
    fn extreme_inputs_stay_in_unit_interval() {
        let now = Utc::now();
        let user_id = Uuid::now_v7();
        let best = AgencySnapshot {
            skill_development: 1.0,
            delta_agency: 1.0,
            ai_reliance: 0.0,
            autonomy_retention: 1.0,
            ..snapshot(user_id, "x", 0, now)
        };
        let worst = AgencySnapshot {
            skill_development: -1.0,
            delta_agency: -1.0,
            ai_reliance: 1.0,
            autonomy_retention: 0.0,
            ..snapshot(user_id, "x", 0, now)
        };
        assert!((performance_score(&[best]).unwrap() - 1.0).abs() < 1e-9);
        assert!(performance_score(&[worst]).unwrap().abs() < 1e-9);
    }

    #[tokio::test]
    async fn recommend_uses_history_inside_lookback() {
        let now = Utc::now();
        let user_id = Uuid::now_v7();
        let source = Arc::new(MemorySnapshotSource::new());
        for i in 0..5 {
            source.push(snapshot(user_id, "writing", i, now));
        }
        let profile = scaler(source, now)
            .recommend(user_id, Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert_eq!(profile.complexity_tier, ComplexityTier::Challenging);
    }

    #[tokio::test]
    async fn too_few_samples_returns_comfortable_default() {
        let now = Utc::now();
        let user_id = Uuid::now_v7();
        let source = Arc::new(MemorySnapshotSource::new());
        for i in 0..4 {
            source.push(snapshot(user_id, "writing", i, now));
        }
        // Outside the lookback window.
        source.push(snapshot(user_id, "writing", 24 * 60, now));

        let profile = scaler(source, now)
            .recommend(user_id, Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert_eq!(profile, DifficultyProfile::comfortable_default());
        assert_eq!(profile.complexity_tier, ComplexityTier::Comfortable);
    }

    #[tokio::test]
    async fn malformed_snapshots_are_skipped() {
        let now = Utc::now();
        let user_id = Uuid::now_v7();
        let source = Arc::new(MemorySnapshotSource::new());
        for i in 0..4 {
            source.push(snapshot(user_id, "writing", i, now));
        }
        let mut broken = snapshot(user_id, "writing", 5, now);
        broken.ai_reliance = 4.0;
        source.push(broken);

        let profile = scaler(source, now)
            .recommend(user_id, Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert_eq!(profile, DifficultyProfile::comfortable_default());
    }

    #[tokio::test]
    async fn focus_category_is_preferred_when_well_sampled() {
        let now = Utc::now();
        let user_id = Uuid::now_v7();
        let source = Arc::new(MemorySnapshotSource::new());
        for i in 0..5 {
            source.push(snapshot(user_id, "writing", i, now));
            source.push(AgencySnapshot {
                skill_development: -0.8,
                delta_agency: -0.8,
                ai_reliance: 0.9,
                autonomy_retention: 0.1,
                ..snapshot(user_id, "debugging", i, now)
            });
        }
        let scaler = scaler(source, now);

        let focused = scaler
            .recommend(user_id, Duration::from_secs(3600), Some("debugging"))
            .await
            .unwrap();
        assert_eq!(focused.complexity_tier, ComplexityTier::Easy);

        let sparse = scaler
            .recommend(user_id, Duration::from_secs(3600), Some("design"))
            .await
            .unwrap();
        let overall = scaler
            .recommend(user_id, Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert_eq!(sparse, overall);
    }
}
