//! Structured integrity violations.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::EntityRef;

/// Category of an integrity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required record does not exist.
    NotFound,
    /// An upserted record points at a record that does not exist.
    ReferenceViolation,
    /// A deleted record is still referenced by a live record outside the batch.
    DependentExists,
    /// A start moved from a terminal state back to a live one.
    StateRegression,
    /// The same record appears more than once in a batch.
    Conflict,
    /// A record is malformed (empty key, duplicate fleet start, ...).
    InvalidRecord,
}

impl ViolationKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::NotFound => "not_found",
            ViolationKind::ReferenceViolation => "reference_violation",
            ViolationKind::DependentExists => "dependent_exists",
            ViolationKind::StateRegression => "state_regression",
            ViolationKind::Conflict => "conflict",
            ViolationKind::InvalidRecord => "invalid_record",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One integrity failure, pinned to the offending batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} on {target}: {message}")]
pub struct Violation {
    /// Failure category.
    pub kind: ViolationKind,
    /// Offending record.
    pub target: EntityRef,
    /// Position of the offending item in the request batch.
    pub index: Option<usize>,
    /// The missing reference or the blocking dependent, when there is one.
    pub related: Option<EntityRef>,
    /// Human-readable detail.
    pub message: String,
}

impl Violation {
    /// Creates a violation with no index or related record.
    pub fn new(kind: ViolationKind, target: EntityRef, message: impl Into<String>) -> Self {
        Self {
            kind,
            target,
            index: None,
            related: None,
            message: message.into(),
        }
    }

    /// Attaches the batch position.
    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Attaches the related record.
    pub fn with_related(mut self, related: EntityRef) -> Self {
        self.related = Some(related);
        self
    }
}
