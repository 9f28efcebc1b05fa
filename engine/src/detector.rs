use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use momentum_core::{AgencySnapshot, BottleneckReason, BottleneckTask, MomentumError, UrgencyTier};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DetectorConfig;

const SKILL_GAP_WEIGHT: f64 = 0.4;
const AVOIDANCE_WEIGHT: f64 = 0.3;
const AGENCY_IMPACT_WEIGHT: f64 = 0.2;
const RECENCY_WEIGHT: f64 = 0.1;

/// Normalized severity terms, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeverityComponents {
    pub skill_gap: f64,
    pub avoidance_frequency: f64,
    pub agency_impact: f64,
    pub time_since_last_attempt: f64,
}

impl SeverityComponents {
    pub fn severity(&self) -> f64 {
        let raw = SKILL_GAP_WEIGHT * self.skill_gap
            + AVOIDANCE_WEIGHT * self.avoidance_frequency
            + AGENCY_IMPACT_WEIGHT * self.agency_impact
            + RECENCY_WEIGHT * self.time_since_last_attempt;
        raw.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BottleneckAssessment {
    /// Primary reason; the task is created under this one
    pub reason: BottleneckReason,
    /// Every trigger that fired, in priority order
    pub triggers: Vec<BottleneckReason>,
    pub components: SeverityComponents,
    pub severity: f64,
    pub urgency_tier: UrgencyTier,
}

/// Result of analyzing one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub assessment: Option<BottleneckAssessment>,
    /// Newly created task; None when nothing fired or a duplicate was suppressed
    pub task: Option<BottleneckTask>,
}

#[derive(Debug, Clone)]
struct OpenTask {
    task_id: Uuid,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct UserLedger {
    last_analyzed_at: Option<DateTime<Utc>>,
    last_attempt_by_category: HashMap<String, DateTime<Utc>>,
    open: HashMap<(String, BottleneckReason), OpenTask>,
}

/// Decides whether a snapshot reveals a capability gap and creates remedial
/// tasks, suppressing duplicates per (user, category, reason).
pub struct BottleneckDetector {
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    ledgers: RwLock<HashMap<Uuid, Arc<Mutex<UserLedger>>>>,
}

impl BottleneckDetector {
    pub fn new(config: DetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            ledgers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Triggers that fire for the snapshot, in priority order.
    pub fn triggers(&self, snapshot: &AgencySnapshot) -> Vec<BottleneckReason> {
        let mut triggers = Vec::new();
        if snapshot.skill_development < self.config.skill_loss_threshold {
            triggers.push(BottleneckReason::SkillLoss);
        }
        if snapshot.delta_agency < self.config.agency_loss_threshold {
            triggers.push(BottleneckReason::AgencyLoss);
        }
        if snapshot.ai_reliance > self.config.high_reliance_threshold {
            triggers.push(BottleneckReason::HighReliance);
        }
        triggers
    }

    pub fn severity_components(
        &self,
        snapshot: &AgencySnapshot,
        days_since_last_attempt: f64,
    ) -> SeverityComponents {
        let skill_gap = (self.config.ideal_skill - snapshot.skill_development).clamp(0.0, 1.0);
        // Heavy delegation plus low retained autonomy stands in for avoidance.
        let avoidance_frequency = (0.5 * snapshot.ai_reliance
            + 0.5 * (1.0 - snapshot.autonomy_retention))
            .clamp(0.0, 1.0);
        let agency_impact = snapshot.delta_agency.abs().min(1.0);
        let time_since_last_attempt = if self.config.recency_saturation_days > 0.0 {
            (days_since_last_attempt.max(0.0) / self.config.recency_saturation_days).min(1.0)
        } else {
            0.0
        };
        SeverityComponents {
            skill_gap,
            avoidance_frequency,
            agency_impact,
            time_since_last_attempt,
        }
    }

    fn assess_with(
        &self,
        snapshot: &AgencySnapshot,
        last_attempt: Option<DateTime<Utc>>,
    ) -> Option<BottleneckAssessment> {
        let triggers = self.triggers(snapshot);
        let reason = *triggers.first()?;
        let days_since_last_attempt = last_attempt
            .map(|at| days_between(at, snapshot.timestamp))
            .unwrap_or(0.0);
        let components = self.severity_components(snapshot, days_since_last_attempt);
        let severity = components.severity();
        Some(BottleneckAssessment {
            reason,
            triggers,
            components,
            severity,
            urgency_tier: UrgencyTier::from_severity(severity),
        })
    }

    /// Score the snapshot without touching suppression state.
    pub fn assess(
        &self,
        snapshot: &AgencySnapshot,
    ) -> Result<Option<BottleneckAssessment>, MomentumError> {
        snapshot.validate()?;
        let ledger = self.ledger(snapshot.user_id);
        let ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
        let last_attempt = ledger
            .last_attempt_by_category
            .get(&snapshot.task_category)
            .copied();
        Ok(self.assess_with(snapshot, last_attempt))
    }

    /// Create a task when the snapshot reveals a gap and no unresolved task
    /// for the same (user, category, reason) exists inside the cooldown.
    pub fn analyze(&self, snapshot: &AgencySnapshot) -> Result<Option<BottleneckTask>, MomentumError> {
        Ok(self.analyze_detailed(snapshot)?.task)
    }

    pub fn analyze_detailed(&self, snapshot: &AgencySnapshot) -> Result<Analysis, MomentumError> {
        snapshot.validate()?;
        let now = self.clock.now();
        let ledger = self.ledger(snapshot.user_id);
        let mut ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(last_analyzed_at) = ledger.last_analyzed_at
            && snapshot.timestamp < last_analyzed_at
        {
            return Err(MomentumError::StaleSnapshot {
                user_id: snapshot.user_id,
                snapshot_at: snapshot.timestamp,
                last_analyzed_at,
            });
        }

        let last_attempt = ledger
            .last_attempt_by_category
            .get(&snapshot.task_category)
            .copied()
            .filter(|at| *at < snapshot.timestamp);
        let assessment = self.assess_with(snapshot, last_attempt);

        ledger.last_analyzed_at = Some(snapshot.timestamp);
        ledger
            .last_attempt_by_category
            .insert(snapshot.task_category.clone(), snapshot.timestamp);

        let task = match &assessment {
            Some(assessment) => self.register_locked(
                &mut ledger,
                snapshot.user_id,
                &snapshot.task_category,
                assessment.reason,
                assessment.severity,
                now,
            ),
            None => None,
        };

        if let Some(task) = &task {
            tracing::info!(
                user_id = %task.user_id,
                task_id = %task.id,
                category = %task.task_category,
                reason = task.reason.as_str(),
                severity = task.severity,
                urgency = task.urgency_tier.as_str(),
                "bottleneck task created"
            );
        } else if let Some(assessment) = &assessment {
            tracing::debug!(
                user_id = %snapshot.user_id,
                category = %snapshot.task_category,
                reason = assessment.reason.as_str(),
                "bottleneck suppressed by open task"
            );
        }

        Ok(Analysis { assessment, task })
    }

    /// Create a task through the duplicate-suppression path without a snapshot.
    pub fn register(
        &self,
        user_id: Uuid,
        task_category: &str,
        reason: BottleneckReason,
        severity: f64,
    ) -> Option<BottleneckTask> {
        let now = self.clock.now();
        let ledger = self.ledger(user_id);
        let mut ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
        self.register_locked(&mut ledger, user_id, task_category, reason, severity, now)
    }

    fn register_locked(
        &self,
        ledger: &mut UserLedger,
        user_id: Uuid,
        task_category: &str,
        reason: BottleneckReason,
        severity: f64,
        now: DateTime<Utc>,
    ) -> Option<BottleneckTask> {
        let key = (task_category.to_string(), reason);
        let cooldown = self.cooldown();
        ledger.open.retain(|_, open| now - open.created_at < cooldown);
        if ledger.open.contains_key(&key) {
            return None;
        }

        let task = BottleneckTask::new(user_id, task_category, reason, severity, now);
        ledger.open.insert(
            key,
            OpenTask {
                task_id: task.id,
                created_at: now,
            },
        );
        Some(task)
    }

    /// Whether a new task for (user, category, reason) would be suppressed now.
    pub fn is_suppressed(&self, user_id: Uuid, task_category: &str, reason: BottleneckReason) -> bool {
        let now = self.clock.now();
        let cooldown = self.cooldown();
        let ledgers = self.ledgers.read().unwrap_or_else(|e| e.into_inner());
        let Some(ledger) = ledgers.get(&user_id) else {
            return false;
        };
        let ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger
            .open
            .get(&(task_category.to_string(), reason))
            .is_some_and(|open| now - open.created_at < cooldown)
    }

    /// Clear suppression for a resolved task. Returns false when unknown.
    pub fn resolve(&self, task_id: Uuid) -> bool {
        let ledgers: Vec<_> = self
            .ledgers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for ledger in ledgers {
            let mut ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
            let before = ledger.open.len();
            ledger.open.retain(|_, open| open.task_id != task_id);
            if ledger.open.len() != before {
                return true;
            }
        }
        false
    }

    /// Drop the suppression entry for a task that never reached the queue.
    pub fn release(&self, task: &BottleneckTask) {
        let ledger = self.ledger(task.user_id);
        let mut ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
        let key = (task.task_category.clone(), task.reason);
        if ledger.open.get(&key).is_some_and(|open| open.task_id == task.id) {
            ledger.open.remove(&key);
        }
    }

    /// Drop suppression entries whose cooldown has passed. Returns how many
    /// were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let cooldown = self.cooldown();
        let ledgers: Vec<_> = self
            .ledgers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let mut removed = 0;
        for ledger in ledgers {
            let mut ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
            let before = ledger.open.len();
            ledger.open.retain(|_, open| now - open.created_at < cooldown);
            removed += before - ledger.open.len();
        }
        removed
    }

    /// Suppression entries still held, across all users.
    pub fn open_entries(&self) -> usize {
        self.ledgers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|ledger| ledger.lock().unwrap_or_else(|e| e.into_inner()).open.len())
            .sum()
    }

    fn cooldown(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.config.cooldown).unwrap_or_else(|_| ChronoDuration::days(1))
    }

    /// Forget everything known about the user (fresh start).
    pub fn reset(&self, user_id: Uuid) {
        self.ledgers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&user_id);
    }

    fn ledger(&self, user_id: Uuid) -> Arc<Mutex<UserLedger>> {
        {
            let ledgers = self.ledgers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(ledger) = ledgers.get(&user_id) {
                return ledger.clone();
            }
        }
        self.ledgers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user_id)
            .or_default()
            .clone()
    }
}

fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let seconds = later.signed_duration_since(earlier).num_seconds().max(0);
    seconds as f64 / 86_400.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn detector() -> (BottleneckDetector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (
            BottleneckDetector::new(DetectorConfig::default(), clock.clone()),
            clock,
        )
    }

    fn snapshot(user_id: Uuid, at: DateTime<Utc>) -> AgencySnapshot {
        AgencySnapshot {
            timestamp: at,
            task_id: Uuid::now_v7(),
            task_category: "writing".to_string(),
            user_id,
            skill_development: 0.0,
            delta_agency: 0.0,
            ai_reliance: 0.5,
            autonomy_retention: 0.5,
        }
    }

    #[test]
    fn skill_loss_snapshot_yields_skill_loss_task() {
        let (detector, clock) = detector();
        let mut s = snapshot(Uuid::now_v7(), clock.now());
        s.skill_development = -0.2;
        s.delta_agency = -0.05;
        s.ai_reliance = 0.5;
        let task = detector.analyze(&s).unwrap().expect("task");
        assert_eq!(task.reason, BottleneckReason::SkillLoss);
        assert_eq!(task.task_category, "writing");
        assert!(!task.resolved);
    }

    #[test]
    fn high_reliance_snapshot_yields_high_reliance_task() {
        let (detector, clock) = detector();
        let mut s = snapshot(Uuid::now_v7(), clock.now());
        s.ai_reliance = 0.95;
        let task = detector.analyze(&s).unwrap().expect("task");
        assert_eq!(task.reason, BottleneckReason::HighReliance);
    }

    #[test]
    fn healthy_snapshot_yields_nothing() {
        let (detector, clock) = detector();
        let s = snapshot(Uuid::now_v7(), clock.now());
        assert_eq!(detector.analyze(&s).unwrap(), None);
    }

    #[test]
    fn thresholds_are_strict_inequalities() {
        let (detector, clock) = detector();
        let mut s = snapshot(Uuid::now_v7(), clock.now());
        s.skill_development = -0.15;
        s.delta_agency = -0.10;
        s.ai_reliance = 0.90;
        assert!(detector.triggers(&s).is_empty());
    }

    #[test]
    fn primary_reason_follows_priority_order() {
        let (detector, clock) = detector();
        let mut s = snapshot(Uuid::now_v7(), clock.now());
        s.ai_reliance = 0.99;
        s.delta_agency = -0.5;
        let assessment = detector.assess(&s).unwrap().unwrap();
        assert_eq!(assessment.reason, BottleneckReason::AgencyLoss);
        assert_eq!(
            assessment.triggers,
            vec![BottleneckReason::AgencyLoss, BottleneckReason::HighReliance]
        );
    }

    #[test]
    fn duplicate_analysis_inside_cooldown_creates_one_task() {
        let (detector, clock) = detector();
        let user_id = Uuid::now_v7();
        let mut s = snapshot(user_id, clock.now());
        s.skill_development = -0.4;

        let first = detector.analyze(&s).unwrap();
        clock.advance(ChronoDuration::hours(2));
        let second = detector.analyze(&s).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(detector.is_suppressed(user_id, "writing", BottleneckReason::SkillLoss));
    }

    #[test]
    fn cooldown_expiry_allows_recreation() {
        let (detector, clock) = detector();
        let mut s = snapshot(Uuid::now_v7(), clock.now());
        s.skill_development = -0.4;
        assert!(detector.analyze(&s).unwrap().is_some());

        clock.advance(ChronoDuration::hours(25));
        assert!(detector.analyze(&s).unwrap().is_some());
    }

    #[test]
    fn resolving_task_lifts_suppression() {
        let (detector, clock) = detector();
        let mut s = snapshot(Uuid::now_v7(), clock.now());
        s.skill_development = -0.4;
        let task = detector.analyze(&s).unwrap().unwrap();

        assert!(detector.resolve(task.id));
        assert!(!detector.resolve(task.id));
        assert!(detector.analyze(&s).unwrap().is_some());
    }

    #[test]
    fn other_reasons_and_categories_are_not_suppressed() {
        let (detector, clock) = detector();
        let user_id = Uuid::now_v7();
        let mut s = snapshot(user_id, clock.now());
        s.skill_development = -0.4;
        assert!(detector.analyze(&s).unwrap().is_some());

        let mut other_category = s.clone();
        other_category.task_category = "debugging".to_string();
        assert!(detector.analyze(&other_category).unwrap().is_some());

        assert!(
            detector
                .register(user_id, "writing", BottleneckReason::Atrophy, 0.5)
                .is_some()
        );
    }

    #[test]
    fn stale_snapshot_is_rejected() {
        let (detector, clock) = detector();
        let user_id = Uuid::now_v7();
        let now = clock.now();
        detector.analyze(&snapshot(user_id, now)).unwrap();
        let err = detector
            .analyze(&snapshot(user_id, now - ChronoDuration::minutes(1)))
            .unwrap_err();
        assert_eq!(err.code(), momentum_core::error::codes::STALE_SNAPSHOT);
    }

    #[test]
    fn malformed_snapshot_is_rejected() {
        let (detector, clock) = detector();
        let mut s = snapshot(Uuid::now_v7(), clock.now());
        s.autonomy_retention = -0.1;
        let err = detector.analyze(&s).unwrap_err();
        assert_eq!(err.code(), momentum_core::error::codes::MALFORMED_SNAPSHOT);
    }

    #[test]
    fn reset_clears_suppression_and_staleness() {
        let (detector, clock) = detector();
        let user_id = Uuid::now_v7();
        let now = clock.now();
        let mut s = snapshot(user_id, now);
        s.skill_development = -0.4;
        assert!(detector.analyze(&s).unwrap().is_some());

        detector.reset(user_id);
        let mut older = snapshot(user_id, now - ChronoDuration::hours(1));
        older.skill_development = -0.4;
        assert!(detector.analyze(&older).unwrap().is_some());
    }

    #[test]
    fn release_undoes_registration() {
        let (detector, _clock) = detector();
        let user_id = Uuid::now_v7();
        let task = detector
            .register(user_id, "writing", BottleneckReason::Atrophy, 0.7)
            .unwrap();
        detector.release(&task);
        assert!(!detector.is_suppressed(user_id, "writing", BottleneckReason::Atrophy));
    }

    #[test]
    fn severity_stays_in_unit_interval_at_boundaries() {
        let (detector, clock) = detector();
        let user_id = Uuid::now_v7();
        let now = clock.now();
        for value in [0.0_f64, 1.0] {
            for signed in [-1.0_f64, 0.0, 1.0] {
                let s = AgencySnapshot {
                    skill_development: signed,
                    delta_agency: signed,
                    ai_reliance: value,
                    autonomy_retention: value,
                    ..snapshot(user_id, now)
                };
                for days in [0.0, 15.0, 30.0, 400.0] {
                    let severity = detector.severity_components(&s, days).severity();
                    assert!((0.0..=1.0).contains(&severity), "severity {severity}");
                }
            }
        }
    }

    #[test]
    fn worst_case_snapshot_is_critical() {
        let (detector, clock) = detector();
        let s = AgencySnapshot {
            skill_development: -1.0,
            delta_agency: -1.0,
            ai_reliance: 1.0,
            autonomy_retention: 0.0,
            ..snapshot(Uuid::now_v7(), clock.now())
        };
        let components = detector.severity_components(&s, 30.0);
        assert!((components.severity() - 1.0).abs() < 1e-9);
        assert_eq!(
            UrgencyTier::from_severity(components.severity()),
            UrgencyTier::Critical
        );
    }

    #[test]
    fn recency_term_uses_previous_attempt_in_category() {
        let (detector, clock) = detector();
        let user_id = Uuid::now_v7();
        let start = clock.now();
        detector.analyze(&snapshot(user_id, start)).unwrap();

        let mut later = snapshot(user_id, start + ChronoDuration::days(15));
        later.skill_development = -0.5;
        let assessment = detector.assess(&later).unwrap().unwrap();
        assert!((assessment.components.time_since_last_attempt - 0.5).abs() < 1e-6);
    }

    #[test]
    fn configured_cooldown_is_respected() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let detector = BottleneckDetector::new(
            DetectorConfig {
                cooldown: Duration::from_secs(60),
                ..DetectorConfig::default()
            },
            clock.clone(),
        );
        let user_id = Uuid::now_v7();
        assert!(detector.register(user_id, "x", BottleneckReason::Atrophy, 0.5).is_some());
        assert!(detector.register(user_id, "x", BottleneckReason::Atrophy, 0.5).is_none());
        clock.advance(ChronoDuration::seconds(61));
        assert!(detector.register(user_id, "x", BottleneckReason::Atrophy, 0.5).is_some());
    }

    #[test]
    fn expired_suppression_entries_are_pruned() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let detector = BottleneckDetector::new(
            DetectorConfig {
                cooldown: Duration::from_secs(60),
                ..DetectorConfig::default()
            },
            clock.clone(),
        );
        for _ in 0..3 {
            detector.register(Uuid::now_v7(), "x", BottleneckReason::Atrophy, 0.5);
        }
        clock.advance(ChronoDuration::seconds(30));
        let fresh = Uuid::now_v7();
        detector.register(fresh, "y", BottleneckReason::SkillLoss, 0.5);
        assert_eq!(detector.open_entries(), 4);

        clock.advance(ChronoDuration::seconds(31));
        assert_eq!(detector.prune_expired(), 3);
        assert_eq!(detector.open_entries(), 1);
        assert!(detector.is_suppressed(fresh, "y", BottleneckReason::SkillLoss));
    }

    #[test]
    fn concurrent_duplicate_analysis_yields_single_task() {
        let (detector, clock) = detector();
        let detector = Arc::new(detector);
        let mut s = snapshot(Uuid::now_v7(), clock.now());
        s.ai_reliance = 0.97;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let detector = detector.clone();
                let s = s.clone();
                std::thread::spawn(move || detector.analyze(&s).unwrap())
            })
            .collect();
        let created = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(created, 1);
    }
}
