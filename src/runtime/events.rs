//! Runtime event stream payloads.

use crate::types::{EntityRef, OpSeq};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A batch changed the store.
    Committed {
        /// Sequence assigned to the batch.
        seq: OpSeq,
        /// Records put or removed, in batch order.
        changed: Vec<EntityRef>,
    },
    /// Persistence has reached at least this sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
