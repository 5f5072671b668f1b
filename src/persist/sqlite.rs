//! SQLite journal: one row per committed batch, plus periodic snapshots.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    core::store::{EntityStore, StoreSnapshotV1},
    op::{OP_FORMAT_VERSION, StoredOp, StoredOpEnvelope},
    types::OpSeq,
};

use super::{OpSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: StoreSnapshotV1,
}

/// Raw journal row, decoded after the statement is done with it.
struct EventRow {
    seq: i64,
    ts_ms: i64,
    payload: Vec<u8>,
}

impl EventRow {
    fn decode(self) -> PersistResult<StoredOp> {
        let envelope: StoredOpEnvelope = serde_json::from_slice(&self.payload)?;
        if envelope.format_version != OP_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "batch {} has unsupported format version {}",
                self.seq, envelope.format_version
            )));
        }
        Ok(StoredOp {
            seq: self.seq as OpSeq,
            ts_ms: self.ts_ms as u64,
            ..envelope.stored
        })
    }
}

/// [`OpSink`] backed by a SQLite database in WAL mode.
pub struct SqliteOpSink {
    conn: Connection,
}

impl SqliteOpSink {
    /// Opens or creates the journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let path = path.as_ref();
        info!(target: "sailrace::persist", path = ?path, "opening journal");
        Self::with_connection(Connection::open(path)?)
    }

    /// Journal that lives only as long as the sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the store: latest snapshot, then every batch journaled after it.
    pub fn load_store(&self) -> PersistResult<EntityStore> {
        let mut store = self
            .load_latest_snapshot()?
            .map_or_else(EntityStore::new, EntityStore::from_snapshot);
        let base = store.latest_op_seq();

        let tail = self.load_events_after(base)?;
        let replayed = tail.len();
        for stored in tail {
            store.apply_replayed_op(stored)?;
        }

        info!(
            target: "sailrace::persist",
            snapshot_seq = base,
            replayed,
            records = store.total_len(),
            latest_seq = store.latest_op_seq(),
            "journal loaded"
        );
        Ok(store)
    }

    /// Batches with a sequence greater than `seq`, oldest first.
    pub fn load_events_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT seq, ts_ms, payload FROM events WHERE seq > ?1 ORDER BY seq")?;
        let rows = stmt
            .query_map(params![seq as i64], |row| {
                Ok(EventRow {
                    seq: row.get(0)?,
                    ts_ms: row.get(1)?,
                    payload: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(EventRow::decode).collect()
    }

    /// Stores `snapshot` as the state as of `last_seq`.
    pub fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        let payload = serde_json::to_vec(&SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        })?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, record_count, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                last_seq as i64,
                now_ms() as i64,
                snapshot.records.len() as i64,
                payload
            ],
        )?;
        debug!(target: "sailrace::persist", last_seq, records = snapshot.records.len(), "snapshot written");
        Ok(())
    }

    /// Drops journaled batches up to and including `seq`; returns how many.
    pub fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM events WHERE seq <= ?1", params![seq as i64])?;
        debug!(target: "sailrace::persist", seq, removed, "journal compacted");
        Ok(removed)
    }

    /// Highest journaled sequence, or 0 for an empty journal.
    pub fn latest_seq(&self) -> PersistResult<OpSeq> {
        let seq: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(seq), 0) FROM events", [], |row| row.get(0))?;
        Ok(seq as OpSeq)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        let Some(payload) = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
        else {
            return Ok(None);
        };

        let envelope: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if envelope.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format version {}",
                envelope.format_version
            )));
        }
        Ok(Some(envelope.snapshot))
    }
}

impl OpSink for SqliteOpSink {
    /// Appends `ops` in one transaction. Sequences must increase past the
    /// journal's current tail.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        let tail = self.latest_seq()?;
        let Some(last) = ops.last() else {
            return Ok(tail);
        };

        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO events(seq, ts_ms, change_count, payload) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut prev = tail;
            for stored in ops {
                if stored.seq <= prev {
                    return Err(PersistError::Message(format!(
                        "batch {} does not follow journaled batch {prev}",
                        stored.seq
                    )));
                }
                let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
                insert.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    stored.ops.len() as i64,
                    payload
                ])?;
                prev = stored.seq;
            }
        }
        tx.commit()?;

        debug!(target: "sailrace::persist", batches = ops.len(), last_seq = last.seq, "journal appended");
        Ok(last.seq)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        SqliteOpSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        SqliteOpSink::compact_through(self, seq)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
