//! Cross-reference and invariant checks over a staged batch.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    model::{Entity, Race, Record},
    types::EntityRef,
};

use super::{
    staged::{StagedChange, StagedView},
    violation::{Violation, ViolationKind},
};

/// What to do when an upsert moves a finished or abandoned start back to a
/// live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionPolicy {
    /// Reject the batch with [`ViolationKind::StateRegression`].
    #[default]
    Reject,
    /// Accept the batch and report the regression as a warning.
    Warn,
}

/// Tunable integrity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityPolicy {
    /// Race-state regression handling.
    pub regression: RegressionPolicy,
}

/// Result of checking a staged batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Validation {
    /// Hard failures; any entry rejects the batch.
    pub violations: Vec<Violation>,
    /// Advisory findings that do not block the commit.
    pub warnings: Vec<Violation>,
}

impl Validation {
    /// True when the batch may be committed.
    pub fn is_accepted(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks a [`StagedView`] against the invariants of the data model.
#[derive(Debug, Clone, Default)]
pub struct IntegrityValidator {
    policy: IntegrityPolicy,
}

impl IntegrityValidator {
    pub fn new(policy: IntegrityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> IntegrityPolicy {
        self.policy
    }

    /// Validates every staged item. Violations are reported in batch order;
    /// warnings only matter if the batch is accepted.
    pub fn check(&self, view: &StagedView<'_>) -> Validation {
        let mut out = Validation::default();

        for (index, target) in view.duplicates() {
            out.violations.push(
                Violation::new(
                    ViolationKind::Conflict,
                    target.clone(),
                    "record appears more than once in the batch",
                )
                .at(*index),
            );
        }

        for (index, target, change) in view.staged() {
            match change {
                StagedChange::Put => {
                    if let Some(entity) = view.staged_entity(target) {
                        self.check_put(view, index, entity, &mut out);
                    }
                }
                StagedChange::Remove => self.check_remove(view, index, target, &mut out),
            }
        }

        out.violations.sort_by_key(|v| v.index);
        out
    }

    fn check_put(&self, view: &StagedView<'_>, index: usize, entity: &Entity, out: &mut Validation) {
        let target = entity.entity_ref();

        if target.key.is_empty() {
            out.violations.push(
                Violation::new(ViolationKind::InvalidRecord, target.clone(), "key must not be empty")
                    .at(index),
            );
        }

        for reference in entity.references() {
            if reference.key.is_empty() {
                out.violations.push(
                    Violation::new(
                        ViolationKind::InvalidRecord,
                        target.clone(),
                        format!("empty {} reference", reference.kind),
                    )
                    .at(index),
                );
            } else if !view.exists(&reference) {
                out.violations.push(
                    Violation::new(
                        ViolationKind::ReferenceViolation,
                        target.clone(),
                        format!("referenced {reference} does not exist"),
                    )
                    .at(index)
                    .with_related(reference),
                );
            }
        }

        if let Entity::Race(race) = entity {
            self.check_race(view, index, race, out);
        }
    }

    fn check_race(&self, view: &StagedView<'_>, index: usize, race: &Race, out: &mut Validation) {
        let target = EntityRef::race(race.key.clone());

        let mut seen = HashSet::with_capacity(race.starts.len());
        for start in &race.starts {
            if !seen.insert(start.fleet.as_str()) {
                out.violations.push(
                    Violation::new(
                        ViolationKind::InvalidRecord,
                        target.clone(),
                        format!("fleet {} starts more than once", start.fleet),
                    )
                    .at(index)
                    .with_related(EntityRef::fleet(start.fleet.clone())),
                );
            }
        }

        let Some(previous) = view
            .committed(&target)
            .and_then(|rec| Race::from_entity(&rec.entity))
        else {
            return;
        };

        for start in &race.starts {
            let Some(old) = previous.starts.iter().find(|s| s.fleet == start.fleet) else {
                continue;
            };
            let (from, to) = (old.race_state, start.race_state);

            if from.is_regression_to(to) {
                let violation = Violation::new(
                    ViolationKind::StateRegression,
                    target.clone(),
                    format!("start for fleet {} moves from {from:?} to {to:?}", start.fleet),
                )
                .at(index)
                .with_related(EntityRef::fleet(start.fleet.clone()));

                match self.policy.regression {
                    RegressionPolicy::Reject => out.violations.push(violation),
                    RegressionPolicy::Warn => out.warnings.push(violation),
                }
            } else if !from.can_transition_to(to) {
                debug!(
                    target: "sailrace::engine",
                    race = %race.key,
                    fleet = %start.fleet,
                    from = ?from,
                    to = ?to,
                    "unusual race state transition"
                );
            }
        }
    }

    fn check_remove(
        &self,
        view: &StagedView<'_>,
        index: usize,
        target: &EntityRef,
        out: &mut Validation,
    ) {
        if view.committed(target).is_none() {
            return;
        }

        let dependents = view.dependents(target);
        if let Some(first) = dependents.iter().next() {
            out.violations.push(
                Violation::new(
                    ViolationKind::DependentExists,
                    target.clone(),
                    format!(
                        "still referenced by {} record(s), first {first}",
                        dependents.len()
                    ),
                )
                .at(index)
                .with_related(first.clone()),
            );
        }
    }
}
