//! Durable collaborators backed by Postgres. Schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use momentum_core::{
    AgencySnapshot, BottleneckReason, BottleneckTask, GrowthTask, MomentumCycle, MomentumError,
    PersistenceError, UrgencyTier, decode_cycle, encode_cycle,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::ports::{CycleStore, SnapshotSource, TaskQueue};

fn storage_error(err: sqlx::Error) -> MomentumError {
    MomentumError::storage(err)
}

fn to_db_revision(revision: u64) -> Result<i64, MomentumError> {
    i64::try_from(revision)
        .map_err(|_| MomentumError::storage(format!("revision {revision} out of range")))
}

/// Cycles are stored as the versioned codec payload plus a denormalized
/// state column so active cycles can be listed without decoding.
#[derive(Clone)]
pub struct PgCycleStore {
    pool: PgPool,
}

impl PgCycleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CycleRow {
    payload: Vec<u8>,
}

#[async_trait]
impl CycleStore for PgCycleStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<MomentumCycle>, MomentumError> {
        let row = sqlx::query_as::<_, CycleRow>(
            r#"
            SELECT payload
            FROM momentum_cycles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => Ok(Some(decode_cycle(&row.payload)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        cycle: &MomentumCycle,
        expected_revision: u64,
    ) -> Result<(), MomentumError> {
        let payload = encode_cycle(cycle)?;
        let revision = to_db_revision(cycle.revision())?;
        let expected = to_db_revision(expected_revision)?;
        let result = sqlx::query(
            r#"
            INSERT INTO momentum_cycles (user_id, state, cycle_id, revision, payload, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET state = EXCLUDED.state,
                cycle_id = EXCLUDED.cycle_id,
                revision = EXCLUDED.revision,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            WHERE momentum_cycles.revision = $6
            "#,
        )
        .bind(cycle.user_id)
        .bind(cycle.current_state.as_str())
        .bind(cycle.cycle_id)
        .bind(revision)
        .bind(payload)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            let found = sqlx::query_scalar::<_, i64>(
                "SELECT revision FROM momentum_cycles WHERE user_id = $1",
            )
            .bind(cycle.user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?
            .unwrap_or_default();
            return Err(PersistenceError::Conflict {
                user_id: cycle.user_id,
                expected: expected_revision,
                found: u64::try_from(found).unwrap_or_default(),
            }
            .into());
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Uuid>, MomentumError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id
            FROM momentum_cycles
            WHERE state <> 'idle'
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    task_id: Uuid,
    user_id: Uuid,
    task_category: String,
    recorded_at: DateTime<Utc>,
    skill_development: f64,
    delta_agency: f64,
    ai_reliance: f64,
    autonomy_retention: f64,
}

impl From<SnapshotRow> for AgencySnapshot {
    fn from(row: SnapshotRow) -> Self {
        AgencySnapshot {
            timestamp: row.recorded_at,
            task_id: row.task_id,
            task_category: row.task_category,
            user_id: row.user_id,
            skill_development: row.skill_development,
            delta_agency: row.delta_agency,
            ai_reliance: row.ai_reliance,
            autonomy_retention: row.autonomy_retention,
        }
    }
}

/// Reads snapshots written by the external scoring producer.
#[derive(Clone)]
pub struct PgSnapshotSource {
    pool: PgPool,
}

impl PgSnapshotSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotSource for PgSnapshotSource {
    async fn latest(&self, user_id: Uuid) -> Result<Option<AgencySnapshot>, MomentumError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT task_id, user_id, task_category, recorded_at,
                   skill_development, delta_agency, ai_reliance, autonomy_retention
            FROM agency_snapshots
            WHERE user_id = $1
            ORDER BY recorded_at DESC, task_id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(row.map(AgencySnapshot::from))
    }

    async fn history(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AgencySnapshot>, MomentumError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT task_id, user_id, task_category, recorded_at,
                   skill_development, delta_agency, ai_reliance, autonomy_retention
            FROM agency_snapshots
            WHERE user_id = $1 AND recorded_at >= $2
            ORDER BY recorded_at ASC, task_id ASC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(rows.into_iter().map(AgencySnapshot::from).collect())
    }

    async fn latest_per_category(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AgencySnapshot>, MomentumError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT DISTINCT ON (task_category)
                   task_id, user_id, task_category, recorded_at,
                   skill_development, delta_agency, ai_reliance, autonomy_retention
            FROM agency_snapshots
            WHERE user_id = $1
            ORDER BY task_category, recorded_at DESC, task_id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(rows.into_iter().map(AgencySnapshot::from).collect())
    }

    async fn users(&self) -> Result<Vec<Uuid>, MomentumError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT user_id
            FROM agency_snapshots
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)
    }
}

#[derive(sqlx::FromRow)]
struct BottleneckTaskRow {
    id: Uuid,
    user_id: Uuid,
    task_category: String,
    severity: f64,
    urgency_tier: String,
    reason: String,
    created_at: DateTime<Utc>,
    resolved: bool,
}

impl BottleneckTaskRow {
    fn into_task(self) -> Result<BottleneckTask, MomentumError> {
        let reason = BottleneckReason::from_db_value(&self.reason).ok_or_else(|| {
            MomentumError::storage(format!("unknown bottleneck reason '{}'", self.reason))
        })?;
        let task = BottleneckTask {
            id: self.id,
            user_id: self.user_id,
            task_category: self.task_category,
            severity: self.severity,
            // Derived from severity; the stored label is informational.
            urgency_tier: UrgencyTier::from_severity(self.severity),
            reason,
            created_at: self.created_at,
            resolved: self.resolved,
        };
        if task.urgency_tier.as_str() != self.urgency_tier {
            tracing::debug!(
                task_id = %task.id,
                stored = %self.urgency_tier,
                derived = task.urgency_tier.as_str(),
                "stored urgency tier differs from severity"
            );
        }
        Ok(task)
    }
}

#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Unresolved remedial tasks for a user, most severe first.
    pub async fn open_tasks(&self, user_id: Uuid) -> Result<Vec<BottleneckTask>, MomentumError> {
        let rows = sqlx::query_as::<_, BottleneckTaskRow>(
            r#"
            SELECT id, user_id, task_category, severity, urgency_tier, reason, created_at, resolved
            FROM bottleneck_tasks
            WHERE user_id = $1 AND resolved = FALSE
            ORDER BY severity DESC, created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.into_iter().map(BottleneckTaskRow::into_task).collect()
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, task: &BottleneckTask) -> Result<(), MomentumError> {
        sqlx::query(
            r#"
            INSERT INTO bottleneck_tasks
                (id, user_id, task_category, severity, urgency_tier, reason, created_at, resolved)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(task.id)
        .bind(task.user_id)
        .bind(&task.task_category)
        .bind(task.severity)
        .bind(task.urgency_tier.as_str())
        .bind(task.reason.as_str())
        .bind(task.created_at)
        .bind(task.resolved)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn enqueue_growth(&self, task: &GrowthTask) -> Result<(), MomentumError> {
        sqlx::query(
            r#"
            INSERT INTO growth_tasks
                (id, user_id, cycle_id, task_category, performance_score,
                 complexity_tier, time_block_tier, growth_ratio, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(task.id)
        .bind(task.user_id)
        .bind(task.cycle_id)
        .bind(task.task_category.as_deref())
        .bind(task.profile.performance_score)
        .bind(task.profile.complexity_tier.as_str())
        .bind(task.profile.time_block_tier.as_str())
        .bind(task.profile.growth_ratio)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn resolve(&self, task_id: Uuid) -> Result<bool, MomentumError> {
        let result = sqlx::query(
            r#"
            UPDATE bottleneck_tasks
            SET resolved = TRUE, resolved_at = COALESCE(resolved_at, NOW())
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }
}
