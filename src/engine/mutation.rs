//! All-or-nothing upsert and delete batches.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    core::store::{EntityStore, StoreError},
    model::{Entity, Record},
    op::StoredOp,
    types::{EntityKind, EntityRef, OpSeq},
};

use super::{
    staged::StagedView,
    validator::{IntegrityPolicy, IntegrityValidator},
    violation::Violation,
};

/// Default upper bound on items per batch.
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("batch rejected: {}", first_violation(.0))]
    Rejected(Vec<Violation>),
    #[error("batch of {len} items exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MutationError {
    /// Violations behind a rejection, first one first.
    pub fn violations(&self) -> &[Violation] {
        match self {
            MutationError::Rejected(violations) => violations,
            _ => &[],
        }
    }
}

fn first_violation(violations: &[Violation]) -> String {
    violations
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "no violations recorded".to_string())
}

/// What a committed batch did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Journal entry for the batch; `None` when nothing changed.
    pub committed: Option<StoredOp>,
    /// Items that changed the store.
    pub applied: usize,
    /// Items with no effect (identical upserts, deletes of absent keys).
    pub unchanged: usize,
    /// Advisory findings accepted under the current policy.
    pub warnings: Vec<Violation>,
}

impl BatchOutcome {
    /// Sequence assigned to the batch, if it changed anything.
    pub fn seq(&self) -> Option<OpSeq> {
        self.committed.as_ref().map(|stored| stored.seq)
    }
}

/// Stages, validates, and commits batches against an [`EntityStore`].
///
/// Every entry point runs the same pipeline: stage each item into a
/// [`StagedView`], validate the whole view, then commit the effective ops in
/// one call. A rejected batch leaves the store untouched.
#[derive(Debug, Clone)]
pub struct MutationEngine {
    validator: IntegrityValidator,
    max_batch_items: usize,
}

impl Default for MutationEngine {
    fn default() -> Self {
        Self::new(IntegrityPolicy::default())
    }
}

impl MutationEngine {
    pub fn new(policy: IntegrityPolicy) -> Self {
        Self {
            validator: IntegrityValidator::new(policy),
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
        }
    }

    pub fn with_max_batch_items(mut self, max: usize) -> Self {
        self.max_batch_items = max;
        self
    }

    pub fn policy(&self) -> IntegrityPolicy {
        self.validator.policy()
    }

    /// Creates or fully replaces each record by key. Kinds may be mixed.
    pub fn upsert(
        &self,
        store: &mut EntityStore,
        batch: Vec<Entity>,
    ) -> Result<BatchOutcome, MutationError> {
        let len = batch.len();
        self.run(store, "upsert", len, move |view| {
            for (index, entity) in batch.into_iter().enumerate() {
                view.stage_put(index, entity);
            }
        })
    }

    /// Typed form of [`MutationEngine::upsert`] for a single entity type.
    pub fn upsert_records<R: Record>(
        &self,
        store: &mut EntityStore,
        batch: Vec<R>,
    ) -> Result<BatchOutcome, MutationError> {
        self.upsert(store, batch.into_iter().map(Into::into).collect())
    }

    /// Removes each target. Absent targets are no-ops; a target with live
    /// dependents is only removable when the batch removes them too.
    pub fn delete(
        &self,
        store: &mut EntityStore,
        targets: Vec<EntityRef>,
    ) -> Result<BatchOutcome, MutationError> {
        let len = targets.len();
        self.run(store, "delete", len, move |view| {
            for (index, target) in targets.into_iter().enumerate() {
                view.stage_remove(index, target);
            }
        })
    }

    /// Removes `keys` of a single kind.
    pub fn delete_keys(
        &self,
        store: &mut EntityStore,
        kind: EntityKind,
        keys: Vec<String>,
    ) -> Result<BatchOutcome, MutationError> {
        self.delete(
            store,
            keys.into_iter().map(|key| EntityRef::new(kind, key)).collect(),
        )
    }

    fn run(
        &self,
        store: &mut EntityStore,
        action: &'static str,
        len: usize,
        stage: impl FnOnce(&mut StagedView<'_>),
    ) -> Result<BatchOutcome, MutationError> {
        if len > self.max_batch_items {
            warn!(
                target: "sailrace::engine",
                action,
                len,
                max = self.max_batch_items,
                "batch too large"
            );
            return Err(MutationError::BatchTooLarge {
                len,
                max: self.max_batch_items,
            });
        }

        let (changes, warnings) = {
            let mut view = StagedView::new(store);
            stage(&mut view);
            let validation = self.validator.check(&view);
            if !validation.is_accepted() {
                warn!(
                    target: "sailrace::engine",
                    action,
                    len,
                    violations = validation.violations.len(),
                    first = %first_violation(&validation.violations),
                    "batch rejected"
                );
                return Err(MutationError::Rejected(validation.violations));
            }
            (view.into_changes(), validation.warnings)
        };

        for warning in &warnings {
            warn!(
                target: "sailrace::engine",
                action,
                kind = %warning.kind,
                record = %warning.target,
                related = ?warning.related,
                detail = %warning.message,
                "accepting batch with warning"
            );
        }

        let applied = changes.ops.len();
        let committed = store.commit(changes.ops)?;
        match &committed {
            Some(stored) => info!(
                target: "sailrace::engine",
                action,
                seq = stored.seq,
                applied,
                unchanged = changes.unchanged,
                "batch committed"
            ),
            None => debug!(
                target: "sailrace::engine",
                action,
                unchanged = changes.unchanged,
                "batch had no effect"
            ),
        }

        Ok(BatchOutcome {
            committed,
            applied,
            unchanged: changes.unchanged,
            warnings,
        })
    }
}
