use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::difficulty::DifficultyProfile;

pub const URGENCY_CRITICAL_THRESHOLD: f64 = 0.8;
pub const URGENCY_HIGH_THRESHOLD: f64 = 0.6;
pub const URGENCY_MEDIUM_THRESHOLD: f64 = 0.4;

/// Why a remedial task was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckReason {
    SkillLoss,
    AgencyLoss,
    HighReliance,
    Atrophy,
}

impl BottleneckReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BottleneckReason::SkillLoss => "skill_loss",
            BottleneckReason::AgencyLoss => "agency_loss",
            BottleneckReason::HighReliance => "high_reliance",
            BottleneckReason::Atrophy => "atrophy",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "skill_loss" => Some(BottleneckReason::SkillLoss),
            "agency_loss" => Some(BottleneckReason::AgencyLoss),
            "high_reliance" => Some(BottleneckReason::HighReliance),
            "atrophy" => Some(BottleneckReason::Atrophy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyTier {
    pub fn from_severity(severity: f64) -> Self {
        if severity >= URGENCY_CRITICAL_THRESHOLD {
            UrgencyTier::Critical
        } else if severity >= URGENCY_HIGH_THRESHOLD {
            UrgencyTier::High
        } else if severity >= URGENCY_MEDIUM_THRESHOLD {
            UrgencyTier::Medium
        } else {
            UrgencyTier::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyTier::Low => "low",
            UrgencyTier::Medium => "medium",
            UrgencyTier::High => "high",
            UrgencyTier::Critical => "critical",
        }
    }
}

/// A detected capability gap, handed to the external task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_category: String,
    /// Weighted severity in [0, 1]
    pub severity: f64,
    pub urgency_tier: UrgencyTier,
    pub reason: BottleneckReason,
    pub created_at: DateTime<Utc>,
    /// Set by the queue once the user has worked the task
    pub resolved: bool,
}

impl BottleneckTask {
    pub fn new(
        user_id: Uuid,
        task_category: impl Into<String>,
        reason: BottleneckReason,
        severity: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let severity = if severity.is_finite() {
            severity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            id: Uuid::now_v7(),
            user_id,
            task_category: task_category.into(),
            severity,
            urgency_tier: UrgencyTier::from_severity(severity),
            reason,
            created_at,
            resolved: false,
        }
    }
}

/// A sized growth assignment produced when a cycle enters LAUNCH_GROWTH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cycle_id: Uuid,
    /// Category the growth work targets; None when no focus was detected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_category: Option<String>,
    pub profile: DifficultyProfile,
    pub created_at: DateTime<Utc>,
}
