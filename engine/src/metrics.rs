use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::Duration as ChronoDuration;
use momentum_core::{MomentumEvent, MomentumState, TransitionRecord};
use serde::Serialize;
use uuid::Uuid;

/// Dwell samples kept per state. Older samples are overwritten round-robin.
const DWELL_RESERVOIR: usize = 1024;

#[derive(Debug, Clone, Default)]
struct DwellSamples {
    samples: Vec<f64>,
    next: usize,
    total_count: u64,
}

impl DwellSamples {
    fn record(&mut self, seconds: f64) {
        self.total_count += 1;
        if self.samples.len() < DWELL_RESERVOIR {
            self.samples.push(seconds);
        } else {
            self.samples[self.next] = seconds;
            self.next = (self.next + 1) % DWELL_RESERVOIR;
        }
    }

    fn summary(&self) -> DwellSummary {
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mean = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };
        DwellSummary {
            count: self.total_count,
            mean_seconds: mean,
            p50_seconds: nearest_rank(&sorted, 0.50),
            p95_seconds: nearest_rank(&sorted, 0.95),
            max_seconds: sorted.last().copied().unwrap_or(0.0),
        }
    }
}

fn nearest_rank(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DwellSummary {
    pub count: u64,
    pub mean_seconds: f64,
    pub p50_seconds: f64,
    pub p95_seconds: f64,
    pub max_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionCount {
    pub from: MomentumState,
    pub to: MomentumState,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub transitions: Vec<TransitionCount>,
    /// Keyed by state name
    pub dwell: BTreeMap<String, DwellSummary>,
    pub cycles_completed: u64,
    pub cycles_incomplete: u64,
    pub hook_failures: u64,
}

impl MetricsSnapshot {
    pub fn transition_count(&self, from: MomentumState, to: MomentumState) -> u64 {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
            .map(|t| t.count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    transitions: HashMap<(MomentumState, MomentumState), u64>,
    dwell: HashMap<MomentumState, DwellSamples>,
    cycles_completed: u64,
    cycles_incomplete: u64,
    hook_failures: u64,
}

impl Counters {
    fn record(&mut self, record: &TransitionRecord, dwell: ChronoDuration) {
        *self.transitions.entry((record.from, record.to)).or_insert(0) += 1;
        let seconds = dwell.num_milliseconds().max(0) as f64 / 1000.0;
        self.dwell.entry(record.from).or_default().record(seconds);
        if record.to == MomentumState::Idle {
            match record.event {
                MomentumEvent::Timeout | MomentumEvent::Abandon => self.cycles_incomplete += 1,
                _ => self.cycles_completed += 1,
            }
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut transitions: Vec<TransitionCount> = self
            .transitions
            .iter()
            .map(|(&(from, to), &count)| TransitionCount { from, to, count })
            .collect();
        transitions.sort_by_key(|t| (t.from, t.to));
        MetricsSnapshot {
            transitions,
            dwell: self
                .dwell
                .iter()
                .map(|(state, samples)| (state.as_str().to_string(), samples.summary()))
                .collect(),
            cycles_completed: self.cycles_completed,
            cycles_incomplete: self.cycles_incomplete,
            hook_failures: self.hook_failures,
        }
    }
}

/// Users whose per-user counters are kept; the least recently updated
/// user is dropped beyond this.
pub const DEFAULT_TRACKED_USERS: usize = 10_000;

#[derive(Default)]
struct UserCounters {
    counters: Counters,
    touched: u64,
}

#[derive(Default)]
struct Inner {
    aggregate: Counters,
    per_user: HashMap<Uuid, UserCounters>,
    tick: u64,
}

impl Inner {
    fn user(&mut self, user_id: Uuid, limit: usize) -> &mut Counters {
        self.tick += 1;
        if !self.per_user.contains_key(&user_id) && self.per_user.len() >= limit.max(1) {
            let oldest = self
                .per_user
                .iter()
                .min_by_key(|(_, user)| user.touched)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                self.per_user.remove(&oldest);
            }
        }
        let user = self.per_user.entry(user_id).or_default();
        user.touched = self.tick;
        &mut user.counters
    }
}

/// In-process transition metrics, aggregate and per user.
pub struct EngineMetrics {
    inner: Mutex<Inner>,
    user_limit: usize,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::with_user_limit(DEFAULT_TRACKED_USERS)
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_limit(user_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            user_limit,
        }
    }

    /// `dwell` is the time spent in `record.from` before leaving it.
    pub fn record_transition(&self, user_id: Uuid, record: &TransitionRecord, dwell: ChronoDuration) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.aggregate.record(record, dwell);
        inner.user(user_id, self.user_limit).record(record, dwell);
    }

    pub fn record_hook_failures(&self, user_id: Uuid, failures: u64) {
        if failures == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.aggregate.hook_failures += failures;
        inner.user(user_id, self.user_limit).hook_failures += failures;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .aggregate
            .snapshot()
    }

    pub fn user_snapshot(&self, user_id: Uuid) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .per_user
            .get(&user_id)
            .map(|user| user.counters.snapshot())
            .unwrap_or_default()
    }

    pub fn tracked_users(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .per_user
            .len()
    }
}
