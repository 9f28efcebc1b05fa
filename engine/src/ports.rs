//! Interfaces to the collaborators the engine consumes.
//!
//! Implementations live outside the core: `memory` ships in-process versions
//! for tests and offline replay, `postgres` ships durable ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use momentum_core::{AgencySnapshot, BottleneckTask, GrowthTask, MomentumCycle, MomentumError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supplies scored snapshots after each completed unit of work.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Most recent snapshot for the user, if any.
    async fn latest(&self, user_id: Uuid) -> Result<Option<AgencySnapshot>, MomentumError>;

    /// Snapshots with `timestamp >= since`, oldest first.
    async fn history(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AgencySnapshot>, MomentumError>;

    /// The most recent snapshot of every category the user ever worked in,
    /// regardless of age. Ordered by category.
    async fn latest_per_category(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AgencySnapshot>, MomentumError>;

    /// Every user with at least one snapshot.
    async fn users(&self) -> Result<Vec<Uuid>, MomentumError>;
}

/// External durable queue of remedial and growth tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &BottleneckTask) -> Result<(), MomentumError>;

    async fn enqueue_growth(&self, task: &GrowthTask) -> Result<(), MomentumError>;

    /// Mark a task resolved. Returns false when the task is unknown.
    async fn resolve(&self, task_id: Uuid) -> Result<bool, MomentumError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    StrengthWin,
    GrowthWin,
}

impl RewardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RewardKind::StrengthWin => "strength_win",
            RewardKind::GrowthWin => "growth_win",
        }
    }
}

/// Displays rewards. The engine never generates reward text itself.
#[async_trait]
pub trait RewardNotifier: Send + Sync {
    async fn emit(&self, user_id: Uuid, cycle_id: Uuid, kind: RewardKind)
    -> Result<(), MomentumError>;
}

/// Durable home of per-user cycles.
#[async_trait]
pub trait CycleStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<Option<MomentumCycle>, MomentumError>;

    /// Persist the cycle. Must only return `Ok` once the write is durable.
    ///
    /// `expected_revision` is the revision of the copy the change was based
    /// on. When a stored record exists with a different revision the write is
    /// refused with `PersistenceError::Conflict`.
    async fn save(
        &self,
        cycle: &MomentumCycle,
        expected_revision: u64,
    ) -> Result<(), MomentumError>;

    /// Users whose cycle is outside IDLE.
    async fn list_active(&self) -> Result<Vec<Uuid>, MomentumError>;
}
