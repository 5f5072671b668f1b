//! Mutation engine: staging, integrity validation, and atomic commit.

/// Batch pipeline and outcomes.
pub mod mutation;
/// Staged changes layered over the committed store.
pub mod staged;
/// Integrity rules and policy.
pub mod validator;
/// Structured violations.
pub mod violation;

pub use mutation::{BatchOutcome, MutationEngine, MutationError};
pub use validator::{IntegrityPolicy, RegressionPolicy};
pub use violation::{Violation, ViolationKind};
