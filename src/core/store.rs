use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    model::{Entity, Record},
    op::{Op, StoredOp},
    types::{EntityKind, EntityRef, OpSeq, Version},
};

use super::indices::RefIndex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(EntityRef),
    #[error("replayed batch {seq} is not after {latest}")]
    OutOfOrderReplay { seq: OpSeq, latest: OpSeq },
}

/// A stored record plus its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedEntity {
    pub version: Version,
    pub entity: Entity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced { previous: VersionedEntity },
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    pub next_op_seq: OpSeq,
    pub records: Vec<VersionedEntity>,
}

#[derive(Debug, Default)]
pub struct EntityStore {
    tables: HashMap<EntityKind, HashMap<String, VersionedEntity>>,
    reverse: RefIndex,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            ..Self::default()
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Self {
        let mut store = Self {
            next_op_seq: snapshot.next_op_seq.max(1),
            ..Self::default()
        };

        for rec in snapshot.records {
            let this = rec.entity.entity_ref();
            store.reverse.link(&this, &rec.entity.references());
            store
                .tables
                .entry(this.kind)
                .or_default()
                .insert(this.key, rec);
        }

        store
    }

    /// Exports every record ordered by kind (dependency order) then key.
    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        let mut records = Vec::with_capacity(self.total_len());
        for kind in EntityKind::ALL {
            for key in self.keys(kind) {
                if let Some(rec) = self.get(kind, key) {
                    records.push(rec.clone());
                }
            }
        }

        StoreSnapshotV1 {
            next_op_seq: self.next_op_seq,
            records,
        }
    }

    pub fn get(&self, kind: EntityKind, key: &str) -> Option<&VersionedEntity> {
        self.tables.get(&kind).and_then(|table| table.get(key))
    }

    pub fn get_ref(&self, target: &EntityRef) -> Option<&VersionedEntity> {
        self.get(target.kind, &target.key)
    }

    /// Typed lookup, e.g. `store.get_as::<Race>("R1")`.
    pub fn get_as<R: Record>(&self, key: &str) -> Option<&R> {
        self.get(R::KIND, key)
            .and_then(|rec| R::from_entity(&rec.entity))
    }

    pub fn contains(&self, kind: EntityKind, key: &str) -> bool {
        self.get(kind, key).is_some()
    }

    /// Keys of `kind` in ascending order.
    pub fn keys(&self, kind: EntityKind) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .tables
            .get(&kind)
            .into_iter()
            .flat_map(|table| table.keys().map(String::as_str))
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.tables.get(&kind).map_or(0, |table| table.len())
    }

    pub fn total_len(&self) -> usize {
        self.tables.values().map(|table| table.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Inserts or replaces `entity` by key, keeping the reverse index current.
    ///
    /// A record equal to the stored one is left alone and keeps its version.
    pub fn put(&mut self, entity: Entity) -> PutOutcome {
        let this = entity.entity_ref();
        let new_refs = entity.references();
        let table = self.tables.entry(this.kind).or_default();

        match table.get_mut(this.key.as_str()) {
            Some(existing) if existing.entity == entity => PutOutcome::Unchanged,
            Some(existing) => {
                let version = existing.version + 1;
                let previous = std::mem::replace(existing, VersionedEntity { version, entity });
                self.reverse.unlink(&this, &previous.entity.references());
                self.reverse.link(&this, &new_refs);
                PutOutcome::Replaced { previous }
            }
            None => {
                self.reverse.link(&this, &new_refs);
                table.insert(this.key, VersionedEntity { version: 1, entity });
                PutOutcome::Inserted
            }
        }
    }

    pub fn remove(&mut self, kind: EntityKind, key: &str) -> Result<VersionedEntity, StoreError> {
        let removed = self
            .tables
            .get_mut(&kind)
            .and_then(|table| table.remove(key))
            .ok_or_else(|| StoreError::NotFound(EntityRef::new(kind, key)))?;
        self.reverse
            .unlink(&removed.entity.entity_ref(), &removed.entity.references());
        Ok(removed)
    }

    /// Live records that reference `(kind, key)`, in sorted order.
    pub fn referenced_by(&self, kind: EntityKind, key: &str) -> BTreeSet<EntityRef> {
        self.reverse
            .referrers(&EntityRef::new(kind, key))
            .cloned()
            .collect()
    }

    /// Applies a validated batch and journals it. Returns `None` for an empty batch.
    pub fn commit(&mut self, ops: Vec<Op>) -> Result<Option<StoredOp>, StoreError> {
        if ops.is_empty() {
            return Ok(None);
        }
        let seq = self.take_next_op_seq();
        self.apply_ops(&ops)?;
        let stored = StoredOp {
            seq,
            ts_ms: now_ms(),
            ops,
        };
        self.pending_ops.push(stored.clone());
        Ok(Some(stored))
    }

    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        let latest = self.latest_op_seq();
        if stored.seq <= latest {
            return Err(StoreError::OutOfOrderReplay {
                seq: stored.seq,
                latest,
            });
        }
        self.apply_ops(&stored.ops)?;
        self.bump_next_seq_from(stored.seq);
        Ok(())
    }

    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn apply_ops(&mut self, ops: &[Op]) -> Result<(), StoreError> {
        for op in ops {
            match op {
                Op::Put { entity } => {
                    self.put(entity.clone());
                }
                Op::Remove { target } => {
                    self.remove(target.kind, &target.key)?;
                }
            }
        }
        Ok(())
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
