use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MomentumError;

/// Inclusive range for signed per-task deltas (`skill_development`, `delta_agency`).
pub const SIGNED_SIGNAL_RANGE: (f64, f64) = (-1.0, 1.0);
/// Inclusive range for ratio signals (`ai_reliance`, `autonomy_retention`).
pub const RATIO_SIGNAL_RANGE: (f64, f64) = (0.0, 1.0);

/// One completed unit of work, scored by the external producer.
/// Snapshots are immutable; the engine only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgencySnapshot {
    /// When the unit of work was completed
    pub timestamp: DateTime<Utc>,
    pub task_id: Uuid,
    /// Free-form skill category (e.g. "writing", "debugging")
    pub task_category: String,
    pub user_id: Uuid,
    /// Skill gained (+) or lost (-) on this task, in [-1, 1]
    pub skill_development: f64,
    /// Change in measured agency, in [-1, 1]
    pub delta_agency: f64,
    /// Share of the work delegated to an assistant, in [0, 1]
    pub ai_reliance: f64,
    /// Share of decisions the user kept, in [0, 1]
    pub autonomy_retention: f64,
}

impl AgencySnapshot {
    /// Reject out-of-range or non-finite signals. Values are never clamped here:
    /// the producer owns clamping, so anything outside the range is a data error.
    pub fn validate(&self) -> Result<(), MomentumError> {
        if self.task_category.trim().is_empty() {
            return Err(MomentumError::MalformedSnapshot {
                snapshot_id: self.task_id,
                field: "task_category",
                value: None,
                expected: "non-empty category".to_string(),
            });
        }
        check_range(self, "skill_development", self.skill_development, SIGNED_SIGNAL_RANGE)?;
        check_range(self, "delta_agency", self.delta_agency, SIGNED_SIGNAL_RANGE)?;
        check_range(self, "ai_reliance", self.ai_reliance, RATIO_SIGNAL_RANGE)?;
        check_range(
            self,
            "autonomy_retention",
            self.autonomy_retention,
            RATIO_SIGNAL_RANGE,
        )?;
        Ok(())
    }
}

fn check_range(
    snapshot: &AgencySnapshot,
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), MomentumError> {
    if value.is_finite() && value >= min && value <= max {
        return Ok(());
    }
    Err(MomentumError::MalformedSnapshot {
        snapshot_id: snapshot.task_id,
        field,
        value: Some(value),
        expected: format!("[{min}, {max}]"),
    })
}

/// Map a signed signal in [-1, 1] onto [0, 1].
pub fn normalize_signed(value: f64) -> f64 {
    ((value + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    fn snapshot() -> AgencySnapshot {
        AgencySnapshot {
            timestamp: Utc::now(),
            task_id: Uuid::now_v7(),
            task_category: "writing".to_string(),
            user_id: Uuid::now_v7(),
            skill_development: 0.1,
            delta_agency: 0.0,
            ai_reliance: 0.4,
            autonomy_retention: 0.7,
        }
    }

    #[test]
    fn boundary_values_are_accepted() {
        let mut low = snapshot();
        low.skill_development = -1.0;
        low.delta_agency = -1.0;
        low.ai_reliance = 0.0;
        low.autonomy_retention = 0.0;
        assert!(low.validate().is_ok());

        let mut high = snapshot();
        high.skill_development = 1.0;
        high.delta_agency = 1.0;
        high.ai_reliance = 1.0;
        high.autonomy_retention = 1.0;
        assert!(high.validate().is_ok());
    }

    #[test]
    fn out_of_range_reliance_is_rejected_not_clamped() {
        let mut s = snapshot();
        s.ai_reliance = 1.2;
        let err = s.validate().unwrap_err();
        assert_eq!(err.code(), codes::MALFORMED_SNAPSHOT);
        match err {
            MomentumError::MalformedSnapshot { field, value, .. } => {
                assert_eq!(field, "ai_reliance");
                assert_eq!(value, Some(1.2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(s.ai_reliance, 1.2);
    }

    #[test]
    fn non_finite_signal_is_rejected() {
        let mut s = snapshot();
        s.delta_agency = f64::NAN;
        assert!(s.validate().is_err());
    }

    #[test]
    fn empty_category_is_rejected() {
        let mut s = snapshot();
        s.task_category = "  ".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn normalize_signed_maps_endpoints() {
        assert_eq!(normalize_signed(-1.0), 0.0);
        assert_eq!(normalize_signed(0.0), 0.5);
        assert_eq!(normalize_signed(1.0), 1.0);
    }
}
