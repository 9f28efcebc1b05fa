use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Usage and decline of one skill category for one user.
/// Recomputed by the atrophy monitor on each scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillTrend {
    pub user_id: Uuid,
    pub task_category: String,
    pub last_used_at: DateTime<Utc>,
    /// Least-squares slope of proficiency, in level units per week.
    /// Negative means the skill is declining.
    pub decline_slope: f64,
    /// Recent proficiency in [0, 1]
    pub current_level: f64,
}

impl SkillTrend {
    /// Days (fractional) since the category was last practiced, never negative.
    pub fn days_unused(&self, now: DateTime<Utc>) -> f64 {
        let seconds = now.signed_duration_since(self.last_used_at).num_seconds().max(0);
        seconds as f64 / 86_400.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn days_unused_caps_future_timestamps_at_zero() {
        let now = Utc::now();
        let trend = SkillTrend {
            user_id: Uuid::now_v7(),
            task_category: "writing".to_string(),
            last_used_at: now + Duration::hours(3),
            decline_slope: 0.0,
            current_level: 0.5,
        };
        assert_eq!(trend.days_unused(now), 0.0);
    }

    #[test]
    fn days_unused_counts_fractional_days() {
        let now = Utc::now();
        let trend = SkillTrend {
            user_id: Uuid::now_v7(),
            task_category: "writing".to_string(),
            last_used_at: now - Duration::hours(36),
            decline_slope: 0.0,
            current_level: 0.5,
        };
        assert!((trend.days_unused(now) - 1.5).abs() < 1e-9);
    }
}
