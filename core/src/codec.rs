//! Versioned persistence format for [`MomentumCycle`].
//!
//! Records are tagged JSON: `{"version": 1, "cycle": {...}}`. Timestamps are
//! RFC 3339 with full sub-second precision, so encode/decode is lossless.
//! New schema versions add a branch to [`decode_cycle`] that migrates the old
//! shape forward.

use serde::{Deserialize, Serialize};

use crate::cycle::MomentumCycle;
use crate::error::PersistenceError;

pub const CYCLE_RECORD_VERSION: u32 = 1;

#[derive(Serialize)]
struct CycleRecordRef<'a> {
    version: u32,
    cycle: &'a MomentumCycle,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Deserialize)]
struct CycleRecordV1 {
    cycle: MomentumCycle,
}

pub fn encode_cycle(cycle: &MomentumCycle) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(&CycleRecordRef {
        version: CYCLE_RECORD_VERSION,
        cycle,
    })
    .map_err(PersistenceError::Encode)
}

pub fn decode_cycle(bytes: &[u8]) -> Result<MomentumCycle, PersistenceError> {
    let header: VersionHeader = serde_json::from_slice(bytes).map_err(PersistenceError::Decode)?;
    match header.version {
        1 => {
            let record: CycleRecordV1 =
                serde_json::from_slice(bytes).map_err(PersistenceError::Decode)?;
            Ok(record.cycle)
        }
        found => Err(PersistenceError::UnsupportedVersion {
            found,
            supported: CYCLE_RECORD_VERSION,
        }),
    }
}
