//! In-process collaborators for tests, offline replay and single-node use.
//!
//! Each one can be told to fail so error paths can be driven on demand.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use momentum_core::{
    AgencySnapshot, BottleneckTask, GrowthTask, MomentumCycle, MomentumError, PersistenceError,
    decode_cycle, encode_cycle,
};
use uuid::Uuid;

use crate::ports::{CycleStore, RewardKind, RewardNotifier, SnapshotSource, TaskQueue};

/// Keeps the encoded record rather than the struct, so every save and load
/// goes through the versioned codec.
#[derive(Default)]
pub struct MemoryCycleStore {
    records: Mutex<HashMap<Uuid, Vec<u8>>>,
    fail_saves: AtomicBool,
}

impl MemoryCycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Raw stored bytes for a user.
    pub fn raw(&self, user_id: Uuid) -> Option<Vec<u8>> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .cloned()
    }

    pub fn put_raw(&self, user_id: Uuid, bytes: Vec<u8>) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, bytes);
    }
}

#[async_trait]
impl CycleStore for MemoryCycleStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<MomentumCycle>, MomentumError> {
        let bytes = self.raw(user_id);
        match bytes {
            Some(bytes) => Ok(Some(decode_cycle(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        cycle: &MomentumCycle,
        expected_revision: u64,
    ) -> Result<(), MomentumError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(MomentumError::storage("memory store rejected write"));
        }
        let bytes = encode_cycle(cycle)?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = records.get(&cycle.user_id) {
            let found = decode_cycle(existing)?.revision();
            if found != expected_revision {
                return Err(PersistenceError::Conflict {
                    user_id: cycle.user_id,
                    expected: expected_revision,
                    found,
                }
                .into());
            }
        }
        records.insert(cycle.user_id, bytes);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Uuid>, MomentumError> {
        let records: Vec<(Uuid, Vec<u8>)> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(user_id, bytes)| (*user_id, bytes.clone()))
            .collect();
        let mut active = Vec::new();
        for (user_id, bytes) in records {
            match decode_cycle(&bytes) {
                Ok(cycle) if !cycle.current_state.is_terminal() => active.push(user_id),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, user_id = %user_id, "undecodable cycle record");
                }
            }
        }
        active.sort();
        Ok(active)
    }
}

#[derive(Default)]
pub struct MemorySnapshotSource {
    snapshots: Mutex<HashMap<Uuid, Vec<AgencySnapshot>>>,
    failing: AtomicBool,
}

impl MemorySnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a snapshot, keeping each user's history ordered by timestamp.
    pub fn push(&self, snapshot: AgencySnapshot) {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        let history = snapshots.entry(snapshot.user_id).or_default();
        let position = history.partition_point(|s| s.timestamp <= snapshot.timestamp);
        history.insert(position, snapshot);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), MomentumError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MomentumError::collaborator("snapshot_source", "source unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotSource for MemorySnapshotSource {
    async fn latest(&self, user_id: Uuid) -> Result<Option<AgencySnapshot>, MomentumError> {
        self.check()?;
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn history(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AgencySnapshot>, MomentumError> {
        self.check()?;
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|s| s.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_per_category(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AgencySnapshot>, MomentumError> {
        self.check()?;
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        let mut latest: BTreeMap<&str, &AgencySnapshot> = BTreeMap::new();
        // History is sorted by timestamp, so later entries win.
        for snapshot in snapshots.get(&user_id).into_iter().flatten() {
            latest.insert(snapshot.task_category.as_str(), snapshot);
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn users(&self) -> Result<Vec<Uuid>, MomentumError> {
        self.check()?;
        let mut users: Vec<Uuid> = self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, history)| !history.is_empty())
            .map(|(user_id, _)| *user_id)
            .collect();
        users.sort();
        Ok(users)
    }
}

#[derive(Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<Vec<BottleneckTask>>,
    growth: Mutex<Vec<GrowthTask>>,
    failing: AtomicBool,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn tasks(&self) -> Vec<BottleneckTask> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn open_tasks(&self) -> Vec<BottleneckTask> {
        self.tasks()
            .into_iter()
            .filter(|task| !task.resolved)
            .collect()
    }

    pub fn growth_tasks(&self) -> Vec<GrowthTask> {
        self.growth.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check(&self) -> Result<(), MomentumError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MomentumError::collaborator("task_queue", "queue unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: &BottleneckTask) -> Result<(), MomentumError> {
        self.check()?;
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task.clone());
        Ok(())
    }

    async fn enqueue_growth(&self, task: &GrowthTask) -> Result<(), MomentumError> {
        self.check()?;
        self.growth
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task.clone());
        Ok(())
    }

    async fn resolve(&self, task_id: Uuid) -> Result<bool, MomentumError> {
        self.check()?;
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.iter_mut().find(|task| task.id == task_id) {
            Some(task) => {
                task.resolved = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Records every emitted reward in order.
#[derive(Default)]
pub struct RecordingRewardNotifier {
    rewards: Mutex<Vec<(Uuid, Uuid, RewardKind)>>,
    failing: AtomicBool,
}

impl RecordingRewardNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn rewards(&self) -> Vec<(Uuid, Uuid, RewardKind)> {
        self.rewards.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<RewardKind> {
        self.rewards().into_iter().map(|(_, _, kind)| kind).collect()
    }
}

#[async_trait]
impl RewardNotifier for RecordingRewardNotifier {
    async fn emit(
        &self,
        user_id: Uuid,
        cycle_id: Uuid,
        kind: RewardKind,
    ) -> Result<(), MomentumError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MomentumError::collaborator("reward_notifier", "display unavailable"));
        }
        self.rewards
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((user_id, cycle_id, kind));
        Ok(())
    }
}

/// Emits rewards as structured log lines. Used by the worker when no
/// display service is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRewardNotifier;

#[async_trait]
impl RewardNotifier for LogRewardNotifier {
    async fn emit(
        &self,
        user_id: Uuid,
        cycle_id: Uuid,
        kind: RewardKind,
    ) -> Result<(), MomentumError> {
        tracing::info!(
            user_id = %user_id,
            cycle_id = %cycle_id,
            kind = kind.as_str(),
            "reward emitted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use momentum_core::{BottleneckReason, MomentumEvent, MomentumState};

    #[tokio::test]
    async fn cycle_store_round_trips_through_codec() {
        let store = MemoryCycleStore::new();
        let user_id = Uuid::now_v7();
        let now = Utc::now();
        let mut cycle = MomentumCycle::new(user_id, now);
        cycle.apply(MomentumEvent::BlockCompleted, now).unwrap();

        store.save(&cycle, 0).await.unwrap();
        assert_eq!(store.load(user_id).await.unwrap(), Some(cycle));
        assert!(String::from_utf8(store.raw(user_id).unwrap())
            .unwrap()
            .contains("\"version\":1"));
        assert_eq!(store.list_active().await.unwrap(), vec![user_id]);
    }

    #[tokio::test]
    async fn idle_cycles_are_not_active() {
        let store = MemoryCycleStore::new();
        let cycle = MomentumCycle::new(Uuid::now_v7(), Utc::now());
        store.save(&cycle, 0).await.unwrap();
        assert!(store.list_active().await.unwrap().is_empty());
        assert_eq!(cycle.current_state, MomentumState::Idle);
    }

    #[tokio::test]
    async fn save_from_outdated_copy_is_refused() {
        let store = MemoryCycleStore::new();
        let user_id = Uuid::now_v7();
        let now = Utc::now();
        let mut base = MomentumCycle::new(user_id, now);
        base.apply(MomentumEvent::BlockCompleted, now).unwrap();
        store.save(&base, 0).await.unwrap();

        let mut ahead = base.clone();
        ahead.apply(MomentumEvent::RewardEmitted, now).unwrap();
        store.save(&ahead, base.revision()).await.unwrap();

        let mut stale = base.clone();
        stale.apply(MomentumEvent::Timeout, now).unwrap();
        let err = store.save(&stale, base.revision()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.load(user_id).await.unwrap(), Some(ahead));
    }

    #[tokio::test]
    async fn snapshot_source_lists_users_and_latest_per_category() {
        let source = MemorySnapshotSource::new();
        let user_id = Uuid::now_v7();
        let now = Utc::now();
        for (category, days) in [("writing", 200), ("writing", 150), ("design", 3)] {
            source.push(AgencySnapshot {
                timestamp: now - Duration::days(days),
                task_id: Uuid::now_v7(),
                task_category: category.to_string(),
                user_id,
                skill_development: 0.0,
                delta_agency: 0.0,
                ai_reliance: 0.5,
                autonomy_retention: 0.5,
            });
        }
        let latest = source.latest_per_category(user_id).await.unwrap();
        let seen: Vec<_> = latest
            .iter()
            .map(|s| (s.task_category.as_str(), s.timestamp))
            .collect();
        assert_eq!(
            seen,
            vec![("design", now - Duration::days(3)), ("writing", now - Duration::days(150))]
        );
        assert_eq!(source.users().await.unwrap(), vec![user_id]);
        assert!(source.latest_per_category(Uuid::now_v7()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_version_surfaces_as_persistence_error() {
        let store = MemoryCycleStore::new();
        let user_id = Uuid::now_v7();
        store.put_raw(user_id, br#"{"version":9,"cycle":{}}"#.to_vec());
        let err = store.load(user_id).await.unwrap_err();
        assert_eq!(err.code(), momentum_core::error::codes::PERSISTENCE_FAILURE);
    }

    #[tokio::test]
    async fn snapshot_history_is_ordered_and_filtered() {
        let source = MemorySnapshotSource::new();
        let user_id = Uuid::now_v7();
        let now = Utc::now();
        for hours in [1, 5, 3] {
            source.push(AgencySnapshot {
                timestamp: now - Duration::hours(hours),
                task_id: Uuid::now_v7(),
                task_category: "writing".to_string(),
                user_id,
                skill_development: 0.0,
                delta_agency: 0.0,
                ai_reliance: 0.5,
                autonomy_retention: 0.5,
            });
        }
        let history = source.history(user_id, now - Duration::hours(4)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp < history[1].timestamp);
        assert_eq!(
            source.latest(user_id).await.unwrap().unwrap().timestamp,
            now - Duration::hours(1)
        );
    }

    #[tokio::test]
    async fn task_queue_resolves_known_tasks_only() {
        let queue = MemoryTaskQueue::new();
        let task = BottleneckTask::new(
            Uuid::now_v7(),
            "writing",
            BottleneckReason::SkillLoss,
            0.5,
            Utc::now(),
        );
        queue.enqueue(&task).await.unwrap();
        assert!(queue.resolve(task.id).await.unwrap());
        assert!(!queue.resolve(Uuid::now_v7()).await.unwrap());
        assert!(queue.open_tasks().is_empty());

        queue.set_failing(true);
        assert!(queue.enqueue(&task).await.is_err());
    }
}
