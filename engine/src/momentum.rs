use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use momentum_core::{
    BottleneckTask, GrowthTask, MomentumCycle, MomentumError, MomentumEvent, MomentumState,
    TransitionRecord,
};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::atrophy::AtrophyMonitor;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::detector::BottleneckDetector;
use crate::hooks::{HookRegistry, StateChange, StateListener, SubscriptionId};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::ports::{CycleStore, RewardKind, RewardNotifier, SnapshotSource, TaskQueue};
use crate::scaler::DifficultyScaler;

/// Collaborators injected into the engine.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn CycleStore>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub tasks: Arc<dyn TaskQueue>,
    pub rewards: Arc<dyn RewardNotifier>,
    pub clock: Arc<dyn Clock>,
}

/// Who is submitting an event. All three share the same locked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    External,
    Sweep,
    Abandon,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub timed_out: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AtrophySweepReport {
    pub users: usize,
    pub tasks_created: usize,
    pub failed: usize,
}

struct Submitted {
    state: MomentumState,
    committed: bool,
}

struct PivotOutcome {
    found: bool,
    focus_category: Option<String>,
}

type Slot = Arc<AsyncMutex<Option<MomentumCycle>>>;

/// Owns every user's momentum cycle and is the only code that mutates one.
///
/// Each user has an async mutex slot, so at most one transition per user is
/// in flight while different users proceed in parallel. A transition is
/// persisted before it becomes visible in memory, and listeners only hear
/// about persisted transitions.
pub struct MomentumEngine {
    config: EngineConfig,
    store: Arc<dyn CycleStore>,
    snapshots: Arc<dyn SnapshotSource>,
    tasks: Arc<dyn TaskQueue>,
    rewards: Arc<dyn RewardNotifier>,
    clock: Arc<dyn Clock>,
    detector: Arc<BottleneckDetector>,
    scaler: DifficultyScaler,
    atrophy: AtrophyMonitor,
    hooks: HookRegistry,
    metrics: EngineMetrics,
    slots: RwLock<HashMap<Uuid, Slot>>,
}

impl MomentumEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let detector = Arc::new(BottleneckDetector::new(
            config.detector.clone(),
            deps.clock.clone(),
        ));
        let scaler = DifficultyScaler::new(
            config.scaler.clone(),
            deps.snapshots.clone(),
            deps.clock.clone(),
        );
        let atrophy = AtrophyMonitor::new(
            config.atrophy.clone(),
            deps.snapshots.clone(),
            detector.clone(),
            deps.clock.clone(),
        );
        Self {
            config,
            store: deps.store,
            snapshots: deps.snapshots,
            tasks: deps.tasks,
            rewards: deps.rewards,
            clock: deps.clock,
            detector,
            scaler,
            atrophy,
            hooks: HookRegistry::new(),
            metrics: EngineMetrics::new(),
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detector(&self) -> &BottleneckDetector {
        &self.detector
    }

    pub fn scaler(&self) -> &DifficultyScaler {
        &self.scaler
    }

    pub fn atrophy(&self) -> &AtrophyMonitor {
        &self.atrophy
    }

    /// Submit an external event. Returns the state the cycle settled in
    /// after any automatic follow-up transitions.
    pub async fn trigger(
        &self,
        user_id: Uuid,
        event: MomentumEvent,
    ) -> Result<MomentumState, MomentumError> {
        Ok(self.submit(user_id, event, Origin::External).await?.state)
    }

    /// Cancel the user's cycle. A no-op when the cycle is already IDLE.
    pub async fn abandon(&self, user_id: Uuid) -> Result<MomentumState, MomentumError> {
        Ok(self
            .submit(user_id, MomentumEvent::Abandon, Origin::Abandon)
            .await?
            .state)
    }

    pub async fn current_state(&self, user_id: Uuid) -> Result<MomentumCycle, MomentumError> {
        let slot = self.slot(user_id);
        let mut guard = slot.lock().await;
        let cycle = self.cycle_in(&mut guard, user_id).await?.clone();
        if cycle.current_state.is_terminal() {
            *guard = None;
            drop(guard);
            self.release_slot(user_id, &slot);
        }
        Ok(cycle)
    }

    pub fn subscribe(&self, listener: Arc<dyn StateListener>) -> SubscriptionId {
        self.hooks.subscribe(listener)
    }

    pub fn subscribe_fn<F>(&self, name: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(&StateChange) -> Result<(), MomentumError> + Send + Sync + 'static,
    {
        self.hooks.subscribe_fn(name, f)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hooks.unsubscribe(id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn user_metrics(&self, user_id: Uuid) -> MetricsSnapshot {
        self.metrics.user_snapshot(user_id)
    }

    /// Mark a remedial task resolved in the queue and lift its suppression.
    /// Returns false when the queue does not know the task.
    pub async fn resolve_task(&self, task_id: Uuid) -> Result<bool, MomentumError> {
        let known = self.tasks.resolve(task_id).await?;
        let suppressed = self.detector.resolve(task_id);
        tracing::info!(task_id = %task_id, known, suppressed, "bottleneck task resolved");
        Ok(known)
    }

    /// Users with a cached cycle plus users the store reports as active.
    pub async fn known_users(&self) -> Result<Vec<Uuid>, MomentumError> {
        let mut users: BTreeSet<Uuid> = self.store.list_active().await?.into_iter().collect();
        users.extend(
            self.slots
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .keys()
                .copied(),
        );
        Ok(users.into_iter().collect())
    }

    /// Fire TIMEOUT for every cycle that overstayed its state.
    ///
    /// Per-user failures are logged and counted; the next sweep retries them.
    pub async fn sweep_timeouts(&self) -> Result<SweepReport, MomentumError> {
        let users = self.known_users().await?;
        let mut report = SweepReport::default();
        for user_id in users {
            report.checked += 1;
            match self.submit(user_id, MomentumEvent::Timeout, Origin::Sweep).await {
                Ok(outcome) => {
                    if outcome.committed {
                        report.timed_out += 1;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(error = %err, user_id = %user_id, "timeout sweep failed for user");
                }
            }
        }
        if report.timed_out > 0 || report.failed > 0 {
            tracing::info!(
                checked = report.checked,
                timed_out = report.timed_out,
                failed = report.failed,
                "timeout sweep finished"
            );
        }
        Ok(report)
    }

    /// Queue practice tasks for decaying skills of every user with snapshot
    /// history, whatever state their cycle is in.
    pub async fn sweep_atrophy(&self) -> Result<AtrophySweepReport, MomentumError> {
        let pruned = self.detector.prune_expired();
        if pruned > 0 {
            tracing::debug!(pruned, "expired bottleneck suppressions pruned");
        }
        let users = self.snapshots.users().await?;
        let per_user = self.config.practice_tasks_per_pivot.max(1);
        let mut report = AtrophySweepReport::default();
        for user_id in users {
            report.users += 1;
            match self.queue_practice(user_id, per_user).await {
                Ok(created) => report.tasks_created += created.len(),
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(error = %err, user_id = %user_id, "atrophy sweep failed for user");
                }
            }
        }
        Ok(report)
    }

    /// Create and enqueue up to `max_n` practice tasks for decaying skills.
    pub async fn queue_practice(
        &self,
        user_id: Uuid,
        max_n: usize,
    ) -> Result<Vec<BottleneckTask>, MomentumError> {
        let tasks = self.atrophy.queue_practice_tasks(user_id, max_n).await?;
        self.enqueue_all(&tasks).await?;
        Ok(tasks)
    }

    /// Drop the user's slot from the map when nobody else holds it. Slots are
    /// only cloned under the map lock, so the count cannot grow meanwhile.
    fn release_slot(&self, user_id: Uuid, slot: &Slot) {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let unused = Arc::strong_count(slot) == 2
            && slots
                .get(&user_id)
                .is_some_and(|cached| Arc::ptr_eq(cached, slot));
        if unused {
            slots.remove(&user_id);
        }
    }

    fn slot(&self, user_id: Uuid) -> Slot {
        {
            let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = slots.get(&user_id) {
                return slot.clone();
            }
        }
        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user_id)
            .or_default()
            .clone()
    }

    /// Cached cycle for the slot, loading it from the store (or starting a
    /// fresh IDLE cycle) on first use.
    async fn cycle_in<'a>(
        &self,
        slot: &'a mut Option<MomentumCycle>,
        user_id: Uuid,
    ) -> Result<&'a mut MomentumCycle, MomentumError> {
        let cycle = match slot.take() {
            Some(cycle) => cycle,
            None => match self.store.load(user_id).await? {
                Some(cycle) => cycle,
                None => MomentumCycle::new(user_id, self.clock.now()),
            },
        };
        Ok(slot.insert(cycle))
    }

    async fn submit(
        &self,
        user_id: Uuid,
        event: MomentumEvent,
        origin: Origin,
    ) -> Result<Submitted, MomentumError> {
        let unchanged = |state| Submitted {
            state,
            committed: false,
        };
        let slot = self.slot(user_id);
        let mut guard = slot.lock().await;
        if origin == Origin::Sweep {
            // Another process sharing the store may have moved the cycle on
            // since it was cached here.
            *guard = None;
        }
        let cycle = self.cycle_in(&mut guard, user_id).await?;
        let state = cycle.current_state;

        match origin {
            Origin::External if !event.is_external() => {
                return Err(MomentumError::InvalidTransition { state, event });
            }
            Origin::Abandon if state.is_terminal() => return Ok(unchanged(state)),
            Origin::Sweep => {
                // Re-check under the lock: the cycle may have moved on since
                // the sweep listed it.
                let Some(limit) = self.config.timeouts.limit_for(state) else {
                    return Ok(unchanged(state));
                };
                if cycle.dwell(self.clock.now()) < limit {
                    return Ok(unchanged(state));
                }
            }
            _ => {}
        }

        // The growth task reaches the queue before LAUNCH_GROWTH is committed,
        // so a queue failure leaves REFRAME_COMPLETE retryable.
        let growth_task_id = match (state, event) {
            (MomentumState::ReframeStrength, MomentumEvent::ReframeComplete) => {
                self.launch_growth(&mut guard, user_id).await?
            }
            _ => None,
        };
        let committed = self
            .commit(&mut guard, user_id, event, move |cycle| {
                if growth_task_id.is_some() {
                    cycle.growth_task_id = growth_task_id;
                }
            })
            .await;
        let record = match committed {
            Ok(record) => record,
            Err(err) => {
                if let Some(task_id) = growth_task_id {
                    tracing::warn!(
                        error = %err,
                        user_id = %user_id,
                        task_id = %task_id,
                        "growth task queued but launch not committed"
                    );
                }
                return Err(err);
            }
        };

        let outcome = match record {
            Some(record) => Submitted {
                state: self.advance(&mut guard, user_id, record).await?,
                committed: true,
            },
            None => unchanged(state),
        };
        if outcome.state.is_terminal() {
            *guard = None;
            drop(guard);
            self.release_slot(user_id, &slot);
        }
        Ok(outcome)
    }

    /// Apply one event to a copy of the cycle, persist it, then publish it.
    /// `Ok(None)` means the event was an accepted no-op.
    async fn commit<F>(
        &self,
        slot: &mut Option<MomentumCycle>,
        user_id: Uuid,
        event: MomentumEvent,
        amend: F,
    ) -> Result<Option<TransitionRecord>, MomentumError>
    where
        F: FnOnce(&mut MomentumCycle),
    {
        let now = self.clock.now();
        let mut next = self.cycle_in(slot, user_id).await?.clone();
        let expected_revision = next.revision();
        let dwell = next.dwell(now);
        let Some(record) = next.apply(event, now)? else {
            return Ok(None);
        };
        amend(&mut next);

        if let Err(err) = self.store.save(&next, expected_revision).await {
            if err.is_conflict() {
                // The cached copy is outdated; the next call reloads it.
                *slot = None;
                tracing::warn!(error = %err, user_id = %user_id, "cycle changed underneath, cache dropped");
            }
            return Err(err);
        }
        *slot = Some(next.clone());

        self.metrics.record_transition(user_id, &record, dwell);
        tracing::info!(
            user_id = %user_id,
            from = record.from.as_str(),
            to = record.to.as_str(),
            event = record.event.as_str(),
            dwell_ms = dwell.num_milliseconds(),
            "momentum transition"
        );

        let change = StateChange {
            user_id,
            from: record.from,
            to: record.to,
            event: record.event,
            at: record.at,
            cycle: next,
        };
        let failures = self.hooks.notify(&change);
        self.metrics
            .record_hook_failures(user_id, failures.len() as u64);
        Ok(Some(record))
    }

    /// Run entry actions for the state just entered, following automatic
    /// transitions until the cycle rests in a state that waits for input.
    async fn advance(
        &self,
        slot: &mut Option<MomentumCycle>,
        user_id: Uuid,
        record: TransitionRecord,
    ) -> Result<MomentumState, MomentumError> {
        let mut entered = record.to;
        loop {
            let next = match entered {
                MomentumState::AffirmPride => {
                    self.emit_reward(slot, user_id, RewardKind::StrengthWin)
                        .await?;
                    self.commit(slot, user_id, MomentumEvent::Auto, |_| {})
                        .await?
                }
                MomentumState::PivotDetect => {
                    let outcome = self.pivot(user_id).await?;
                    let focus_category = outcome.focus_category;
                    self.commit(
                        slot,
                        user_id,
                        MomentumEvent::BottleneckChecked {
                            found: outcome.found,
                        },
                        move |cycle| cycle.focus_category = focus_category,
                    )
                    .await?
                }
                MomentumState::WinGrowth => {
                    self.emit_reward(slot, user_id, RewardKind::GrowthWin)
                        .await?;
                    self.commit(slot, user_id, MomentumEvent::Auto, |_| {})
                        .await?
                }
                MomentumState::Idle
                | MomentumState::WinStrength
                | MomentumState::ReframeStrength
                | MomentumState::LaunchGrowth => return Ok(entered),
            };
            match next {
                Some(record) => entered = record.to,
                None => return Ok(entered),
            }
        }
    }

    /// Reward display is best effort; a failure is logged and the cycle moves on.
    async fn emit_reward(
        &self,
        slot: &mut Option<MomentumCycle>,
        user_id: Uuid,
        kind: RewardKind,
    ) -> Result<(), MomentumError> {
        let cycle_id = self.cycle_in(slot, user_id).await?.cycle_id;
        let Some(cycle_id) = cycle_id else {
            tracing::warn!(user_id = %user_id, kind = kind.as_str(), "no cycle id, reward skipped");
            return Ok(());
        };
        if let Err(err) = self.rewards.emit(user_id, cycle_id, kind).await {
            tracing::warn!(
                error = %err,
                user_id = %user_id,
                cycle_id = %cycle_id,
                kind = kind.as_str(),
                "reward notification failed"
            );
        }
        Ok(())
    }

    async fn pivot(&self, user_id: Uuid) -> Result<PivotOutcome, MomentumError> {
        let mut found = false;
        let mut focus_category = None;
        let mut created: Vec<BottleneckTask> = Vec::new();

        if let Some(snapshot) = self.snapshots.latest(user_id).await? {
            match self.detector.analyze_detailed(&snapshot) {
                Ok(analysis) => {
                    if analysis.assessment.is_some() {
                        found = true;
                        focus_category = Some(snapshot.task_category.clone());
                    }
                    created.extend(analysis.task);
                }
                Err(err @ MomentumError::StaleSnapshot { .. }) => {
                    tracing::warn!(error = %err, user_id = %user_id, "ignoring stale snapshot");
                }
                Err(err) => return Err(err),
            }
        }

        let practice = match self
            .atrophy
            .queue_practice_tasks(user_id, self.config.practice_tasks_per_pivot)
            .await
        {
            Ok(practice) => practice,
            Err(err) => {
                created.iter().for_each(|task| self.detector.release(task));
                return Err(err);
            }
        };
        if let Some(first) = practice.first() {
            found = true;
            if focus_category.is_none() {
                focus_category = Some(first.task_category.clone());
            }
        }
        created.extend(practice);

        self.enqueue_all(&created).await?;
        tracing::debug!(
            user_id = %user_id,
            found,
            tasks = created.len(),
            "bottleneck check finished"
        );
        Ok(PivotOutcome {
            found,
            focus_category,
        })
    }

    /// Enqueue in order. On failure the tasks that did not reach the queue
    /// are released so a later check can recreate them.
    async fn enqueue_all(&self, tasks: &[BottleneckTask]) -> Result<(), MomentumError> {
        for (index, task) in tasks.iter().enumerate() {
            if let Err(err) = self.tasks.enqueue(task).await {
                tasks[index..]
                    .iter()
                    .for_each(|task| self.detector.release(task));
                return Err(err);
            }
        }
        Ok(())
    }

    /// Size and enqueue the growth task for the cycle. Returns its id.
    async fn launch_growth(
        &self,
        slot: &mut Option<MomentumCycle>,
        user_id: Uuid,
    ) -> Result<Option<Uuid>, MomentumError> {
        let cycle = self.cycle_in(slot, user_id).await?;
        let Some(cycle_id) = cycle.cycle_id else {
            tracing::warn!(user_id = %user_id, "no cycle id, growth task skipped");
            return Ok(None);
        };
        let focus_category = cycle.focus_category.clone();

        let profile = self
            .scaler
            .recommend(user_id, self.config.scaler.lookback, focus_category.as_deref())
            .await?;
        let task = GrowthTask {
            id: Uuid::now_v7(),
            user_id,
            cycle_id,
            task_category: focus_category,
            profile,
            created_at: self.clock.now(),
        };
        self.tasks.enqueue_growth(&task).await?;
        tracing::info!(
            user_id = %user_id,
            cycle_id = %cycle_id,
            task_id = %task.id,
            tier = profile.complexity_tier.as_str(),
            growth_ratio = profile.growth_ratio,
            "growth task launched"
        );
        Ok(Some(task.id))
    }
}
