//! Reply shapes shared by every RPC.

use serde::{Deserialize, Serialize};

use crate::{
    core::store::VersionedEntity,
    engine::{BatchOutcome, MutationError, Violation, ViolationKind},
    runtime::handle::RuntimeError,
    types::{EntityRef, OpSeq},
};

/// Machine-readable failure category carried in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A required record does not exist.
    NotFound,
    /// An upsert points at a missing record.
    ReferenceViolation,
    /// A delete target still has live dependents.
    DependentExists,
    /// A start regressed from a terminal state.
    StateRegression,
    /// A record appears twice in one batch.
    Conflict,
    /// A record is malformed.
    InvalidRecord,
    /// The batch exceeds the configured item limit.
    BatchTooLarge,
    /// The store runtime is not running.
    Unavailable,
    /// Persistence or another internal failure.
    Internal,
}

impl From<ViolationKind> for ErrorCode {
    fn from(kind: ViolationKind) -> Self {
        match kind {
            ViolationKind::NotFound => ErrorCode::NotFound,
            ViolationKind::ReferenceViolation => ErrorCode::ReferenceViolation,
            ViolationKind::DependentExists => ErrorCode::DependentExists,
            ViolationKind::StateRegression => ErrorCode::StateRegression,
            ViolationKind::Conflict => ErrorCode::Conflict,
            ViolationKind::InvalidRecord => ErrorCode::InvalidRecord,
        }
    }
}

/// One failed (or flagged) batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Position in the request batch, when the failure is item-specific.
    pub index: Option<usize>,
    /// Offending record.
    pub target: Option<EntityRef>,
    /// Missing reference or blocking dependent.
    pub related: Option<EntityRef>,
    /// Failure category.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl ItemError {
    fn general(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            index: None,
            target: None,
            related: None,
            code,
            message: message.into(),
        }
    }
}

impl From<Violation> for ItemError {
    fn from(v: Violation) -> Self {
        Self {
            index: v.index,
            target: Some(v.target),
            related: v.related,
            code: v.kind.into(),
            message: v.message,
        }
    }
}

/// Overall result of an RPC.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    /// True when the whole batch was applied (or had no effect).
    pub success: bool,
    /// Sequence assigned to the committed batch, or the latest sequence for `Ping`.
    pub seq: Option<OpSeq>,
    /// Items that changed the store.
    pub applied: usize,
    /// Items that had no effect.
    pub unchanged: usize,
    /// Failures when `success` is false; the first entry is the primary one.
    pub errors: Vec<ItemError>,
    /// Advisory findings on a successful batch.
    pub warnings: Vec<ItemError>,
}

impl Status {
    /// Plain success with no batch detail.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Failure carrying `errors`.
    pub fn failed(errors: Vec<ItemError>) -> Self {
        Self {
            success: false,
            errors,
            ..Self::default()
        }
    }

    /// Primary failure, if any.
    pub fn first_error(&self) -> Option<&ItemError> {
        self.errors.first()
    }
}

impl From<BatchOutcome> for Status {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            success: true,
            seq: outcome.seq(),
            applied: outcome.applied,
            unchanged: outcome.unchanged,
            errors: Vec::new(),
            warnings: outcome.warnings.into_iter().map(ItemError::from).collect(),
        }
    }
}

impl From<RuntimeError> for Status {
    fn from(err: RuntimeError) -> Self {
        let errors = match err {
            RuntimeError::Mutation(MutationError::Rejected(violations)) => {
                violations.into_iter().map(ItemError::from).collect()
            }
            RuntimeError::Mutation(err @ MutationError::BatchTooLarge { .. }) => {
                vec![ItemError::general(ErrorCode::BatchTooLarge, err.to_string())]
            }
            RuntimeError::ChannelClosed => {
                vec![ItemError::general(ErrorCode::Unavailable, RuntimeError::ChannelClosed.to_string())]
            }
            other => vec![ItemError::general(ErrorCode::Internal, other.to_string())],
        };
        Status::failed(errors)
    }
}

/// Reply to a point lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReply {
    /// Lookup status; `NotFound` when the record is absent.
    pub status: Status,
    /// The record with its version.
    pub entity: Option<VersionedEntity>,
}
