//! Adaptive momentum engine: the per-user win → reflect → grow state
//! machine and the analyzers it consults at each step.

pub mod atrophy;
pub mod clock;
pub mod config;
pub mod detector;
pub mod hooks;
pub mod memory;
pub mod metrics;
pub mod momentum;
pub mod ports;
pub mod postgres;
pub mod scaler;
pub mod scheduler;

pub use atrophy::{AtrophyMonitor, PracticeSuggestion, PracticeUrgency};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AtrophyConfig, DetectorConfig, EngineConfig, ScalerConfig, TimeoutPolicy};
pub use detector::{Analysis, BottleneckAssessment, BottleneckDetector, SeverityComponents};
pub use hooks::{ChannelListener, HookRegistry, StateChange, StateListener, SubscriptionId};
pub use metrics::{DwellSummary, EngineMetrics, MetricsSnapshot, TransitionCount};
pub use momentum::{AtrophySweepReport, EngineDeps, MomentumEngine, SweepReport};
pub use ports::{CycleStore, RewardKind, RewardNotifier, SnapshotSource, TaskQueue};
pub use scaler::{DifficultyScaler, performance_score};
pub use scheduler::{SweepKind, SweepScheduler, sweep_once};
