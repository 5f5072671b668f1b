//! Staged view: a batch's pending changes layered over the committed store.

use std::collections::BTreeSet;

use hashbrown::{HashMap, HashSet};

use crate::{
    core::store::{EntityStore, VersionedEntity},
    model::Entity,
    op::Op,
    types::EntityRef,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StagedChange {
    Put,
    Remove,
}

/// Pending puts and removes for one batch, read through to `store` for
/// everything the batch does not touch. Never mutates the store.
#[derive(Debug)]
pub struct StagedView<'a> {
    store: &'a EntityStore,
    puts: HashMap<EntityRef, Entity>,
    removes: HashSet<EntityRef>,
    order: Vec<(usize, EntityRef, StagedChange)>,
    duplicates: Vec<(usize, EntityRef)>,
    repeated_removes: usize,
}

/// Effective ops produced from a validated view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagedChanges {
    /// Ops that change the store, in batch order.
    pub ops: Vec<Op>,
    /// Items that were no-ops: identical upserts and deletes of absent keys.
    pub unchanged: usize,
}

impl<'a> StagedView<'a> {
    /// Empty view over `store`.
    pub fn new(store: &'a EntityStore) -> Self {
        Self {
            store,
            puts: HashMap::new(),
            removes: HashSet::new(),
            order: Vec::new(),
            duplicates: Vec::new(),
            repeated_removes: 0,
        }
    }

    /// Stages a full-record put for batch item `index`.
    ///
    /// A record already staged by this batch is recorded as a duplicate and
    /// the first staging is kept.
    pub fn stage_put(&mut self, index: usize, entity: Entity) {
        let target = entity.entity_ref();
        if self.is_staged(&target) {
            self.duplicates.push((index, target));
            return;
        }
        self.order.push((index, target.clone(), StagedChange::Put));
        self.puts.insert(target, entity);
    }

    /// Stages a removal for batch item `index`.
    ///
    /// Removing the same record twice is a no-op for the repeat; removing a
    /// record this batch also puts is a duplicate.
    pub fn stage_remove(&mut self, index: usize, target: EntityRef) {
        if self.removes.contains(&target) {
            self.repeated_removes += 1;
            return;
        }
        if self.puts.contains_key(&target) {
            self.duplicates.push((index, target));
            return;
        }
        self.order.push((index, target.clone(), StagedChange::Remove));
        self.removes.insert(target);
    }

    /// True when this batch already stages a change for `target`.
    pub fn is_staged(&self, target: &EntityRef) -> bool {
        self.puts.contains_key(target) || self.removes.contains(target)
    }

    /// Committed record, ignoring staged changes.
    pub fn committed(&self, target: &EntityRef) -> Option<&'a VersionedEntity> {
        self.store.get_ref(target)
    }

    /// Record as it would look after commit.
    pub fn current(&self, target: &EntityRef) -> Option<&Entity> {
        if let Some(entity) = self.puts.get(target) {
            return Some(entity);
        }
        if self.removes.contains(target) {
            return None;
        }
        self.committed(target).map(|rec| &rec.entity)
    }

    /// True when `target` would exist after commit.
    pub fn exists(&self, target: &EntityRef) -> bool {
        self.current(target).is_some()
    }

    /// Records that would still reference `target` after commit.
    ///
    /// Only kinds listed by [`crate::types::EntityKind::dependent_kinds`] are consulted.
    pub fn dependents(&self, target: &EntityRef) -> BTreeSet<EntityRef> {
        let kinds = target.kind.dependent_kinds();
        if kinds.is_empty() {
            return BTreeSet::new();
        }

        let mut out: BTreeSet<EntityRef> = self
            .store
            .referenced_by(target.kind, &target.key)
            .into_iter()
            .filter(|referrer| {
                !self.removes.contains(referrer) && !self.puts.contains_key(referrer)
            })
            .collect();

        for (referrer, entity) in &self.puts {
            if kinds.contains(&referrer.kind) && entity.refers_to(target) {
                out.insert(referrer.clone());
            }
        }
        out
    }

    pub(crate) fn staged(&self) -> impl Iterator<Item = (usize, &EntityRef, &StagedChange)> {
        self.order
            .iter()
            .map(|(index, target, change)| (*index, target, change))
    }

    pub(crate) fn staged_entity(&self, target: &EntityRef) -> Option<&Entity> {
        self.puts.get(target)
    }

    pub(crate) fn duplicates(&self) -> &[(usize, EntityRef)] {
        &self.duplicates
    }

    /// Consumes the view into effective ops, dropping no-op items.
    pub fn into_changes(mut self) -> StagedChanges {
        let mut changes = StagedChanges {
            unchanged: self.repeated_removes,
            ..StagedChanges::default()
        };

        for (_, target, change) in std::mem::take(&mut self.order) {
            let committed = self.store.get_ref(&target);
            match change {
                StagedChange::Put => {
                    let Some(entity) = self.puts.remove(&target) else {
                        continue;
                    };
                    if committed.is_some_and(|rec| rec.entity == entity) {
                        changes.unchanged += 1;
                    } else {
                        changes.ops.push(Op::Put { entity });
                    }
                }
                StagedChange::Remove => {
                    if committed.is_some() {
                        changes.ops.push(Op::Remove { target });
                    } else {
                        changes.unchanged += 1;
                    }
                }
            }
        }
        changes
    }
}
