//! Background sweeps.
//!
//! The scheduler never touches cycle state itself: each tick calls back into
//! the engine, which fires TIMEOUT through the same locked path external
//! events use.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::momentum::MomentumEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Timeouts,
    Atrophy,
}

impl SweepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SweepKind::Timeouts => "timeouts",
            SweepKind::Atrophy => "atrophy",
        }
    }
}

/// Run one sweep of the given kind. Errors are logged, never propagated;
/// the next tick retries.
pub async fn sweep_once(engine: &MomentumEngine, kind: SweepKind) {
    let outcome = match kind {
        SweepKind::Timeouts => engine.sweep_timeouts().await.map(|report| report.failed),
        SweepKind::Atrophy => engine.sweep_atrophy().await.map(|report| report.failed),
    };
    match outcome {
        Ok(0) => {}
        Ok(failed) => {
            tracing::warn!(sweep = kind.as_str(), failed, "sweep finished with failures");
        }
        Err(err) => {
            tracing::warn!(error = %err, sweep = kind.as_str(), "sweep failed, retrying next tick");
        }
    }
}

/// Handle to the running sweep loops.
pub struct SweepScheduler {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SweepScheduler {
    /// Spawn the timeout and atrophy loops with the engine's configured intervals.
    pub fn start(engine: Arc<MomentumEngine>) -> Self {
        let timeouts = engine.config().sweep_interval;
        let atrophy = engine.config().atrophy_sweep_interval;
        Self::start_with(engine, timeouts, atrophy)
    }

    pub fn start_with(
        engine: Arc<MomentumEngine>,
        timeout_interval: Duration,
        atrophy_interval: Duration,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let handles = vec![
            tokio::spawn(sweep_loop(
                engine.clone(),
                SweepKind::Timeouts,
                timeout_interval,
                receiver.clone(),
            )),
            tokio::spawn(sweep_loop(
                engine,
                SweepKind::Atrophy,
                atrophy_interval,
                receiver,
            )),
        ];
        Self { shutdown, handles }
    }

    /// Signal both loops and wait for them to finish their current sweep.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "sweep loop ended abnormally");
            }
        }
    }
}

async fn sweep_loop(
    engine: Arc<MomentumEngine>,
    kind: SweepKind,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // tokio::time::interval panics on a zero period.
    let every = every.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(sweep = kind.as_str(), interval_ms = every.as_millis() as u64, "sweep loop started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = interval.tick() => {
                sweep_once(&engine, kind).await;
            }
        }
    }

    tracing::info!(sweep = kind.as_str(), "sweep loop stopped");
}
