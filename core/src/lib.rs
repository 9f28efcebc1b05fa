//! Shared data model for the adaptive momentum engine: snapshots, remedial
//! and growth tasks, difficulty profiles, skill trends, the momentum cycle
//! with its transition table, and the versioned cycle codec.

pub mod codec;
pub mod cycle;
pub mod difficulty;
pub mod error;
pub mod skill;
pub mod snapshot;
pub mod tasks;

pub use codec::{CYCLE_RECORD_VERSION, decode_cycle, encode_cycle};
pub use cycle::{
    CycleOutcome, IncompleteReason, MomentumCycle, MomentumEvent, MomentumState,
    TransitionRecord, next_state,
};
pub use difficulty::{ComplexityTier, DifficultyProfile, TimeBlockTier};
pub use error::{ErrorReport, MomentumError, PersistenceError};
pub use skill::SkillTrend;
pub use snapshot::AgencySnapshot;
pub use tasks::{BottleneckReason, BottleneckTask, GrowthTask, UrgencyTier};
