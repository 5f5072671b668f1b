//! Journal operation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    model::Entity,
    types::{EntityRef, OpSeq},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// One effective change inside a committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Insert or replace a full record.
    Put {
        /// New record contents.
        entity: Entity,
    },
    /// Remove a record.
    Remove {
        /// Removed record.
        target: EntityRef,
    },
}

impl Op {
    /// Record touched by this op.
    pub fn target(&self) -> EntityRef {
        match self {
            Op::Put { entity } => entity.entity_ref(),
            Op::Remove { target } => target.clone(),
        }
    }
}

/// Journal row: one committed batch with its sequence and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic batch sequence.
    pub seq: OpSeq,
    /// Commit timestamp in milliseconds.
    pub ts_ms: u64,
    /// Effective changes, in application order.
    pub ops: Vec<Op>,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped batch.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
