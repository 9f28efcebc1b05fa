use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MomentumError;

/// Position of a user inside the win → reflect → grow loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumState {
    Idle,
    WinStrength,
    AffirmPride,
    PivotDetect,
    ReframeStrength,
    LaunchGrowth,
    WinGrowth,
}

impl MomentumState {
    pub const ALL: [MomentumState; 7] = [
        MomentumState::Idle,
        MomentumState::WinStrength,
        MomentumState::AffirmPride,
        MomentumState::PivotDetect,
        MomentumState::ReframeStrength,
        MomentumState::LaunchGrowth,
        MomentumState::WinGrowth,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MomentumState::Idle => "idle",
            MomentumState::WinStrength => "win_strength",
            MomentumState::AffirmPride => "affirm_pride",
            MomentumState::PivotDetect => "pivot_detect",
            MomentumState::ReframeStrength => "reframe_strength",
            MomentumState::LaunchGrowth => "launch_growth",
            MomentumState::WinGrowth => "win_growth",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }

    /// IDLE is both the initial and the terminal state.
    pub fn is_terminal(self) -> bool {
        self == MomentumState::Idle
    }

    /// States left immediately through an automatic transition.
    pub fn is_transient(self) -> bool {
        matches!(self, MomentumState::AffirmPride | MomentumState::WinGrowth)
    }
}

impl fmt::Display for MomentumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MomentumEvent {
    BlockCompleted,
    RewardEmitted,
    BottleneckChecked { found: bool },
    ReframeComplete,
    GrowthStarted,
    GrowthCompleted,
    Timeout,
    /// Explicit cancellation by an external caller
    Abandon,
    /// Immediate advance out of a transient state; engine-internal only
    Auto,
}

impl MomentumEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            MomentumEvent::BlockCompleted => "block_completed",
            MomentumEvent::RewardEmitted => "reward_emitted",
            MomentumEvent::BottleneckChecked { found: true } => "bottleneck_checked(found)",
            MomentumEvent::BottleneckChecked { found: false } => "bottleneck_checked(clear)",
            MomentumEvent::ReframeComplete => "reframe_complete",
            MomentumEvent::GrowthStarted => "growth_started",
            MomentumEvent::GrowthCompleted => "growth_completed",
            MomentumEvent::Timeout => "timeout",
            MomentumEvent::Abandon => "abandon",
            MomentumEvent::Auto => "auto",
        }
    }

    /// Events an external caller may submit through `trigger`.
    pub fn is_external(self) -> bool {
        !matches!(self, MomentumEvent::Auto)
    }
}

impl fmt::Display for MomentumEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table. `None` means the event is illegal from `from`.
pub fn next_state(from: MomentumState, event: MomentumEvent) -> Option<MomentumState> {
    use MomentumEvent as E;
    use MomentumState as S;

    match (from, event) {
        (S::Idle, E::BlockCompleted) => Some(S::WinStrength),
        (S::WinStrength, E::RewardEmitted) => Some(S::AffirmPride),
        (S::AffirmPride, E::Auto) => Some(S::PivotDetect),
        (S::PivotDetect, E::BottleneckChecked { found: true }) => Some(S::ReframeStrength),
        (S::PivotDetect, E::BottleneckChecked { found: false }) => Some(S::Idle),
        (S::ReframeStrength, E::ReframeComplete) => Some(S::LaunchGrowth),
        (S::LaunchGrowth, E::GrowthStarted) => Some(S::LaunchGrowth),
        (S::LaunchGrowth, E::GrowthCompleted) => Some(S::WinGrowth),
        (S::WinGrowth, E::Auto) => Some(S::Idle),
        (S::Idle, E::Timeout | E::Abandon) => None,
        (_, E::Timeout | E::Abandon) => Some(S::Idle),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteReason {
    TimedOut,
    Abandoned,
}

/// How the most recent cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    Incomplete { reason: IncompleteReason },
}

/// One committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: MomentumState,
    pub to: MomentumState,
    pub event: MomentumEvent,
    pub at: DateTime<Utc>,
}

/// Per-user mutable loop state. Owned exclusively by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumCycle {
    pub user_id: Uuid,
    /// Identifier of the current (or most recent) cycle; assigned on BLOCK_COMPLETED
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cycle_id: Option<Uuid>,
    pub current_state: MomentumState,
    pub history: Vec<TransitionRecord>,
    pub entered_state_at: DateTime<Utc>,
    /// Cycles that returned to IDLE through the normal path
    pub cycle_count: u64,
    /// Cycles that returned to IDLE through TIMEOUT or ABANDON
    #[serde(default)]
    pub incomplete_count: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_outcome: Option<CycleOutcome>,
    /// Category chosen at PIVOT_DETECT for the growth task
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub focus_category: Option<String>,
    /// Growth task handed to the queue for this cycle
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub growth_task_id: Option<Uuid>,
}

impl MomentumCycle {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            cycle_id: None,
            current_state: MomentumState::Idle,
            history: Vec::new(),
            entered_state_at: now,
            cycle_count: 0,
            incomplete_count: 0,
            last_outcome: None,
            focus_category: None,
            growth_task_id: None,
        }
    }

    /// Number of committed transitions. Every persisted write bumps it, so
    /// stores use it to reject writes based on an outdated copy.
    pub fn revision(&self) -> u64 {
        self.history.len() as u64
    }

    /// Time spent in the current state, never negative.
    pub fn dwell(&self, now: DateTime<Utc>) -> Duration {
        let dwell = now.signed_duration_since(self.entered_state_at);
        if dwell < Duration::zero() {
            Duration::zero()
        } else {
            dwell
        }
    }

    /// Apply `event` at `at`.
    ///
    /// Returns `Ok(None)` for an accepted self-loop that changes nothing
    /// (GROWTH_STARTED while already launching). Illegal events leave the
    /// cycle untouched and return `InvalidTransition`.
    pub fn apply(
        &mut self,
        event: MomentumEvent,
        at: DateTime<Utc>,
    ) -> Result<Option<TransitionRecord>, MomentumError> {
        let from = self.current_state;
        let to = next_state(from, event).ok_or(MomentumError::InvalidTransition {
            state: from,
            event,
        })?;
        if from == to {
            return Ok(None);
        }

        match (to, event) {
            (MomentumState::WinStrength, _) => {
                self.cycle_id = Some(Uuid::now_v7());
                self.focus_category = None;
                self.growth_task_id = None;
            }
            (MomentumState::Idle, MomentumEvent::Timeout) => {
                self.incomplete_count += 1;
                self.last_outcome = Some(CycleOutcome::Incomplete {
                    reason: IncompleteReason::TimedOut,
                });
            }
            (MomentumState::Idle, MomentumEvent::Abandon) => {
                self.incomplete_count += 1;
                self.last_outcome = Some(CycleOutcome::Incomplete {
                    reason: IncompleteReason::Abandoned,
                });
            }
            (MomentumState::Idle, _) => {
                self.cycle_count += 1;
                self.last_outcome = Some(CycleOutcome::Completed);
            }
            _ => {}
        }

        let record = TransitionRecord { from, to, event, at };
        self.current_state = to;
        self.entered_state_at = at;
        self.history.push(record.clone());
        Ok(Some(record))
    }
}
