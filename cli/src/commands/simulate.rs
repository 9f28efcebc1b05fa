//! Offline replay of a scripted scenario through an in-memory engine.
//!
//! ```json
//! {
//!   "start": "2026-03-01T09:00:00Z",
//!   "steps": [
//!     { "action": "snapshot", "task_category": "writing", "skill_development": -0.3,
//!       "delta_agency": 0.0, "ai_reliance": 0.6, "autonomy_retention": 0.4 },
//!     { "action": "trigger", "event": { "type": "block_completed" } },
//!     { "action": "advance", "seconds": 120 },
//!     { "action": "trigger", "event": { "type": "reward_emitted" } },
//!     { "action": "sweep_timeouts" }
//!   ]
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use momentum_core::{
    AgencySnapshot, BottleneckTask, ErrorReport, GrowthTask, MomentumCycle, MomentumError,
    MomentumEvent, MomentumState,
};
use momentum_engine::memory::{
    MemoryCycleStore, MemorySnapshotSource, MemoryTaskQueue, RecordingRewardNotifier,
};
use momentum_engine::{
    Clock, EngineConfig, EngineDeps, ManualClock, MetricsSnapshot, MomentumEngine, RewardKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::{exit_error, print_json, read_json_from_file, report_error};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Clock start; defaults to the current time
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Advance {
        seconds: i64,
    },
    Snapshot {
        task_category: String,
        skill_development: f64,
        delta_agency: f64,
        ai_reliance: f64,
        autonomy_retention: f64,
        /// Backdate the snapshot relative to the scenario clock
        #[serde(default)]
        age_seconds: i64,
    },
    Trigger {
        event: MomentumEvent,
    },
    Abandon,
    SweepTimeouts,
    SweepAtrophy,
    /// Resolve every open remedial task
    ResolveTasks,
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Advance { .. } => "advance",
            Step::Snapshot { .. } => "snapshot",
            Step::Trigger { .. } => "trigger",
            Step::Abandon => "abandon",
            Step::SweepTimeouts => "sweep_timeouts",
            Step::SweepAtrophy => "sweep_atrophy",
            Step::ResolveTasks => "resolve_tasks",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub action: &'static str,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<MomentumState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub user_id: Uuid,
    pub steps: Vec<StepOutcome>,
    pub cycle: MomentumCycle,
    pub metrics: MetricsSnapshot,
    pub tasks: Vec<BottleneckTask>,
    pub growth_tasks: Vec<GrowthTask>,
    pub rewards: Vec<RewardKind>,
}

pub async fn run(path: &str) -> i32 {
    let raw = match read_json_from_file(path) {
        Ok(raw) => raw,
        Err(message) => exit_error(&message, None),
    };
    let scenario: Scenario = match serde_json::from_str(&raw) {
        Ok(scenario) => scenario,
        Err(e) => exit_error(
            &format!("Invalid scenario in '{path}': {e}"),
            Some("Expected {\"steps\": [{\"action\": \"trigger\", \"event\": {\"type\": \"block_completed\"}}, ...]}"),
        ),
    };
    match simulate(scenario).await {
        Ok(report) => print_json(&report),
        Err(err) => report_error(&err),
    }
}

/// Replay the scenario. Step-level engine errors are recorded in the
/// report and the replay continues; only the final read can fail.
pub async fn simulate(scenario: Scenario) -> Result<SimulationReport, MomentumError> {
    let user_id = scenario.user_id.unwrap_or_else(Uuid::now_v7);
    let clock = Arc::new(ManualClock::new(scenario.start.unwrap_or_else(Utc::now)));
    let snapshots = Arc::new(MemorySnapshotSource::new());
    let tasks = Arc::new(MemoryTaskQueue::new());
    let rewards = Arc::new(RecordingRewardNotifier::new());
    let engine = MomentumEngine::new(
        EngineConfig::default(),
        EngineDeps {
            store: Arc::new(MemoryCycleStore::new()),
            snapshots: snapshots.clone(),
            tasks: tasks.clone(),
            rewards: rewards.clone(),
            clock: clock.clone(),
        },
    );

    let mut outcomes = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.into_iter().enumerate() {
        let action = step.name();
        let result: Result<Option<MomentumState>, MomentumError> = match step {
            Step::Advance { seconds } => {
                clock.advance(ChronoDuration::seconds(seconds.max(0)));
                Ok(None)
            }
            Step::Snapshot {
                task_category,
                skill_development,
                delta_agency,
                ai_reliance,
                autonomy_retention,
                age_seconds,
            } => {
                snapshots.push(AgencySnapshot {
                    timestamp: clock.now() - ChronoDuration::seconds(age_seconds.max(0)),
                    task_id: Uuid::now_v7(),
                    task_category,
                    user_id,
                    skill_development,
                    delta_agency,
                    ai_reliance,
                    autonomy_retention,
                });
                Ok(None)
            }
            Step::Trigger { event } => engine.trigger(user_id, event).await.map(Some),
            Step::Abandon => engine.abandon(user_id).await.map(Some),
            Step::SweepTimeouts => match engine.sweep_timeouts().await {
                Ok(_) => engine
                    .current_state(user_id)
                    .await
                    .map(|cycle| Some(cycle.current_state)),
                Err(err) => Err(err),
            },
            Step::SweepAtrophy => engine.sweep_atrophy().await.map(|_| None),
            Step::ResolveTasks => {
                let mut result = Ok(None);
                for task in tasks.open_tasks() {
                    if let Err(err) = engine.resolve_task(task.id).await {
                        result = Err(err);
                        break;
                    }
                }
                result
            }
        };

        let (state, error) = match result {
            Ok(state) => (state, None),
            Err(err) => (None, Some(err.report())),
        };
        outcomes.push(StepOutcome {
            index,
            action,
            at: clock.now(),
            state,
            error,
        });
    }

    Ok(SimulationReport {
        user_id,
        steps: outcomes,
        cycle: engine.current_state(user_id).await?,
        metrics: engine.user_metrics(user_id),
        tasks: tasks.tasks(),
        growth_tasks: tasks.growth_tasks(),
        rewards: rewards.kinds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use momentum_core::error::codes;

    fn scenario(json: &str) -> Scenario {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn healthy_block_completes_one_cycle() {
        let report = simulate(scenario(
            r#"{
                "start": "2026-03-01T09:00:00Z",
                "steps": [
                    { "action": "trigger", "event": { "type": "block_completed" } },
                    { "action": "trigger", "event": { "type": "reward_emitted" } }
                ]
            }"#,
        ))
        .await
        .unwrap();

        assert_eq!(report.steps[1].state, Some(MomentumState::Idle));
        assert_eq!(report.cycle.cycle_count, 1);
        assert_eq!(report.cycle.history.len(), 4);
        assert_eq!(report.rewards, vec![RewardKind::StrengthWin]);
        assert_eq!(report.metrics.cycles_completed, 1);
    }

    #[tokio::test]
    async fn bottleneck_scenario_reaches_growth() {
        let report = simulate(scenario(
            r#"{
                "start": "2026-03-01T09:00:00Z",
                "steps": [
                    { "action": "snapshot", "task_category": "writing", "skill_development": -0.3,
                      "delta_agency": 0.0, "ai_reliance": 0.6, "autonomy_retention": 0.4 },
                    { "action": "trigger", "event": { "type": "block_completed" } },
                    { "action": "trigger", "event": { "type": "reward_emitted" } },
                    { "action": "trigger", "event": { "type": "reframe_complete" } },
                    { "action": "trigger", "event": { "type": "growth_started" } },
                    { "action": "trigger", "event": { "type": "growth_completed" } },
                    { "action": "resolve_tasks" }
                ]
            }"#,
        ))
        .await
        .unwrap();

        assert_eq!(report.steps[2].state, Some(MomentumState::ReframeStrength));
        assert_eq!(report.steps[3].state, Some(MomentumState::LaunchGrowth));
        assert_eq!(report.steps[5].state, Some(MomentumState::Idle));
        assert_eq!(report.tasks.len(), 1);
        assert!(report.tasks[0].resolved);
        assert_eq!(report.growth_tasks.len(), 1);
        assert_eq!(
            report.rewards,
            vec![RewardKind::StrengthWin, RewardKind::GrowthWin]
        );
    }

    #[tokio::test]
    async fn illegal_step_is_reported_and_replay_continues() {
        let report = simulate(scenario(
            r#"{
                "steps": [
                    { "action": "trigger", "event": { "type": "growth_completed" } },
                    { "action": "trigger", "event": { "type": "block_completed" } },
                    { "action": "advance", "seconds": 7200 },
                    { "action": "sweep_timeouts" }
                ]
            }"#,
        ))
        .await
        .unwrap();

        let error = report.steps[0].error.as_ref().unwrap();
        assert_eq!(error.error, codes::INVALID_TRANSITION);
        assert_eq!(report.steps[1].state, Some(MomentumState::WinStrength));
        assert_eq!(report.steps[3].state, Some(MomentumState::Idle));
        assert_eq!(report.cycle.incomplete_count, 1);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed: Result<Scenario, _> =
            serde_json::from_str(r#"{ "steps": [ { "action": "teleport" } ] }"#);
        assert!(parsed.is_err());
    }
}
