use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

use crate::{
    core::store::{EntityStore, StoreSnapshotV1, VersionedEntity},
    engine::{
        mutation::{BatchOutcome, DEFAULT_MAX_BATCH_ITEMS, MutationEngine, MutationError},
        validator::IntegrityPolicy,
    },
    model::{Entity, Record},
    op::{Op, StoredOp},
    persist::{OpSink, PersistError, PersistResult},
    types::{EntityKind, EntityRef, OpSeq},
};

use super::events::StoreEvent;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("store runtime is not running")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub flush_on_commit: bool,
    pub batch_max_ops: usize,
    pub batch_max_latency_ms: u64,
    pub persist_queue_bound: usize,
    pub command_queue_bound: usize,
    pub snapshot_every_batches: usize,
    pub compact_after_snapshot: bool,
    pub max_batch_items: usize,
    pub integrity: IntegrityPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_commit: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            command_queue_bound: 256,
            snapshot_every_batches: 2000,
            compact_after_snapshot: false,
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            integrity: IntegrityPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_integrity(mut self, integrity: IntegrityPolicy) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn with_max_batch_items(mut self, max: usize) -> Self {
        self.max_batch_items = max;
        self
    }

    pub fn with_snapshot_every_batches(mut self, batches: usize) -> Self {
        self.snapshot_every_batches = batches;
        self
    }

    fn engine(&self) -> MutationEngine {
        MutationEngine::new(self.integrity).with_max_batch_items(self.max_batch_items)
    }
}

/// Cloneable handle to the task that owns the [`EntityStore`].
///
/// Every command, reads included, is processed in arrival order by a single
/// task, so callers observe the store either before or after a batch.
#[derive(Clone)]
pub struct RaceStoreHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<StoreEvent>,
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

enum Command {
    Ping {
        resp: oneshot::Sender<OpSeq>,
    },
    Upsert {
        batch: Vec<Entity>,
        resp: Reply<BatchOutcome>,
    },
    Delete {
        targets: Vec<EntityRef>,
        resp: Reply<BatchOutcome>,
    },
    Get {
        target: EntityRef,
        resp: oneshot::Sender<Option<VersionedEntity>>,
    },
    ReferencedBy {
        target: EntityRef,
        resp: oneshot::Sender<BTreeSet<EntityRef>>,
    },
    Keys {
        kind: EntityKind,
        resp: oneshot::Sender<Vec<String>>,
    },
    Snapshot {
        resp: oneshot::Sender<StoreSnapshotV1>,
    },
    Flush {
        resp: Reply<OpSeq>,
    },
    Checkpoint {
        resp: Reply<()>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

enum PersistMsg {
    Op(StoredOp),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

struct Actor {
    store: EntityStore,
    engine: MutationEngine,
    events_tx: broadcast::Sender<StoreEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    config: RuntimeConfig,
    batches_since_snapshot: usize,
}

/// Moves `store` into a new task and returns a handle to it.
///
/// Must be called from within a tokio runtime.
pub fn spawn_race_store(
    store: EntityStore,
    sink: Option<Box<dyn OpSink>>,
    config: RuntimeConfig,
) -> RaceStoreHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<StoreEvent>(1024);

    let (persist_tx, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    info!(
        target: "sailrace::runtime",
        records = store.total_len(),
        latest_seq = store.latest_op_seq(),
        durable = persist_tx.is_some(),
        "store runtime started"
    );

    let mut actor = Actor {
        store,
        engine: config.engine(),
        events_tx: events_tx.clone(),
        persist_tx,
        config,
        batches_since_snapshot: 0,
    };

    tokio::spawn(async move {
        let mut durable_open = durable_rx.is_some();
        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if actor.handle_command(cmd).await {
                            break;
                        }
                    }
                    durable = rx.recv(), if durable_open => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = actor.events_tx.send(StoreEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(err)) => {
                                error!(target: "sailrace::runtime", error = %err, "journal write failed");
                            }
                            None => durable_open = false,
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if actor.handle_command(cmd).await {
                    break;
                }
            }
        }
        info!(target: "sailrace::runtime", "store runtime stopped");
    });

    RaceStoreHandle {
        cmd_tx,
        events_tx,
    }
}

impl RaceStoreHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    /// Round-trips through the store task; returns the latest committed sequence.
    pub async fn ping(&self) -> Result<OpSeq, RuntimeError> {
        self.request(|resp| Command::Ping { resp }).await
    }

    /// Applies a mixed-kind upsert batch atomically.
    pub async fn upsert(&self, batch: Vec<Entity>) -> Result<BatchOutcome, RuntimeError> {
        self.request(|resp| Command::Upsert { batch, resp }).await?
    }

    pub async fn upsert_records<R: Record>(&self, batch: Vec<R>) -> Result<BatchOutcome, RuntimeError> {
        self.upsert(batch.into_iter().map(Into::into).collect()).await
    }

    /// Applies a mixed-kind delete batch atomically.
    pub async fn delete(&self, targets: Vec<EntityRef>) -> Result<BatchOutcome, RuntimeError> {
        self.request(|resp| Command::Delete { targets, resp }).await?
    }

    pub async fn delete_keys(
        &self,
        kind: EntityKind,
        keys: Vec<String>,
    ) -> Result<BatchOutcome, RuntimeError> {
        self.delete(keys.into_iter().map(|key| EntityRef::new(kind, key)).collect())
            .await
    }

    pub async fn get(
        &self,
        kind: EntityKind,
        key: impl Into<String>,
    ) -> Result<Option<VersionedEntity>, RuntimeError> {
        let target = EntityRef::new(kind, key);
        self.request(|resp| Command::Get { target, resp }).await
    }

    pub async fn referenced_by(
        &self,
        kind: EntityKind,
        key: impl Into<String>,
    ) -> Result<BTreeSet<EntityRef>, RuntimeError> {
        let target = EntityRef::new(kind, key);
        self.request(|resp| Command::ReferencedBy { target, resp }).await
    }

    pub async fn keys(&self, kind: EntityKind) -> Result<Vec<String>, RuntimeError> {
        self.request(|resp| Command::Keys { kind, resp }).await
    }

    pub async fn snapshot(&self) -> Result<StoreSnapshotV1, RuntimeError> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

impl Actor {
    /// Returns true once the loop should stop.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Ping { resp } => {
                let _ = resp.send(self.store.latest_op_seq());
            }
            Command::Upsert { batch, resp } => {
                if resp.is_closed() {
                    debug!(target: "sailrace::runtime", len = batch.len(), "caller gone, upsert skipped");
                    return false;
                }
                let res = self.engine.upsert(&mut self.store, batch);
                let res = self.after_batch(res).await;
                let _ = resp.send(res);
            }
            Command::Delete { targets, resp } => {
                if resp.is_closed() {
                    debug!(target: "sailrace::runtime", len = targets.len(), "caller gone, delete skipped");
                    return false;
                }
                let res = self.engine.delete(&mut self.store, targets);
                let res = self.after_batch(res).await;
                let _ = resp.send(res);
            }
            Command::Get { target, resp } => {
                let _ = resp.send(self.store.get_ref(&target).cloned());
            }
            Command::ReferencedBy { target, resp } => {
                let _ = resp.send(self.store.referenced_by(target.kind, &target.key));
            }
            Command::Keys { kind, resp } => {
                let keys = self.store.keys(kind).into_iter().map(str::to_string).collect();
                let _ = resp.send(keys);
            }
            Command::Snapshot { resp } => {
                let _ = resp.send(self.store.export_snapshot());
            }
            Command::Flush { resp } => {
                let out = if let Some(tx) = &self.persist_tx {
                    let (flush_tx, flush_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        flush_rx
                            .await
                            .map_err(|_| RuntimeError::ChannelClosed)
                            .and_then(|r| r.map_err(RuntimeError::from))
                    }
                } else {
                    Ok(self.store.latest_op_seq())
                };
                let _ = resp.send(out);
            }
            Command::Checkpoint { resp } => {
                let out = self.checkpoint().await;
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                let out = if let Some(tx) = &self.persist_tx {
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
                    }
                } else {
                    Ok(())
                };
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    async fn after_batch(
        &mut self,
        res: Result<BatchOutcome, MutationError>,
    ) -> Result<BatchOutcome, RuntimeError> {
        let outcome = res?;
        let Some(stored) = &outcome.committed else {
            return Ok(outcome);
        };

        let seq = stored.seq;
        let changed = stored.ops.iter().map(Op::target).collect();

        // The batch is already visible in memory; a journal failure is logged,
        // not reported as a failed batch.
        if let Some(tx) = &self.persist_tx {
            if tx.send(PersistMsg::Op(stored.clone())).await.is_err() {
                error!(target: "sailrace::runtime", seq, "persistence worker is gone");
            }
        } else {
            let _ = self.events_tx.send(StoreEvent::DurableUpTo { op_seq: seq });
        }
        let _ = self.events_tx.send(StoreEvent::Committed { seq, changed });

        self.batches_since_snapshot += 1;
        self.maybe_auto_checkpoint().await;
        Ok(outcome)
    }

    async fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = &self.persist_tx else {
            return Ok(());
        };

        let snapshot = self.store.export_snapshot();
        let last_seq = self.store.latest_op_seq();
        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;

        cp_rx.await.map_err(|_| RuntimeError::ChannelClosed)??;
        self.batches_since_snapshot = 0;
        info!(target: "sailrace::runtime", last_seq, "checkpoint written");
        Ok(())
    }

    async fn maybe_auto_checkpoint(&mut self) {
        if self.config.snapshot_every_batches == 0
            || self.batches_since_snapshot < self.config.snapshot_every_batches
        {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            error!(target: "sailrace::runtime", error = %err, "auto checkpoint failed");
        }
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let writer = JournalWriter {
        sink: Arc::new(Mutex::new(sink)),
        pending: Vec::new(),
        durable: 0,
        durable_tx,
        config,
    };
    tokio::spawn(writer.run(rx));
}

/// Buffers committed batches and hands them to the sink on a blocking thread.
struct JournalWriter {
    sink: Arc<Mutex<Box<dyn OpSink>>>,
    pending: Vec<StoredOp>,
    durable: OpSeq,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
}

impl JournalWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<PersistMsg>) {
        let latency = Duration::from_millis(self.config.batch_max_latency_ms);
        let mut deadline = Instant::now() + latency;

        loop {
            let msg = tokio::select! {
                msg = rx.recv() => msg,
                _ = tokio::time::sleep_until(deadline), if !self.pending.is_empty() => {
                    let _ = self.drain(false).await;
                    deadline = Instant::now() + latency;
                    continue;
                }
            };

            match msg {
                Some(PersistMsg::Op(stored)) => {
                    self.pending.push(stored);
                    if self.config.flush_on_commit || self.pending.len() >= self.config.batch_max_ops {
                        let _ = self.drain(true).await;
                        deadline = Instant::now() + latency;
                    }
                }
                Some(PersistMsg::Flush { resp }) => {
                    let _ = resp.send(self.drain(true).await);
                    deadline = Instant::now() + latency;
                }
                Some(PersistMsg::Checkpoint {
                    snapshot,
                    last_seq,
                    compact,
                    resp,
                }) => {
                    let _ = resp.send(self.checkpoint(snapshot, last_seq, compact).await);
                    deadline = Instant::now() + latency;
                }
                Some(PersistMsg::Shutdown { resp }) => {
                    let _ = self.drain(true).await;
                    let _ = resp.send(());
                    break;
                }
                None => {
                    let _ = self.drain(true).await;
                    break;
                }
            }
        }
    }

    /// Runs `f` against the sink off the async threads.
    async fn with_sink<T, F>(&self, f: F) -> PersistResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn OpSink>) -> PersistResult<T> + Send + 'static,
    {
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || {
            let mut guard = sink.blocking_lock();
            f(&mut guard)
        })
        .await
        .map_err(|err| PersistError::Message(format!("journal task failed: {err}")))?
    }

    /// Writes everything pending; `sync` also asks the sink to flush.
    /// Returns the highest durable sequence.
    async fn drain(&mut self, sync: bool) -> PersistResult<OpSeq> {
        let batch = std::mem::take(&mut self.pending);
        let written = self
            .with_sink(move |sink| {
                let last = if batch.is_empty() {
                    None
                } else {
                    Some(sink.append_ops(&batch)?)
                };
                if sync {
                    sink.flush()?;
                }
                Ok(last)
            })
            .await;

        match written {
            Ok(Some(seq)) => {
                self.durable = self.durable.max(seq);
                let _ = self.durable_tx.send(Ok(self.durable));
                Ok(self.durable)
            }
            Ok(None) => Ok(self.durable),
            Err(err) => {
                let _ = self
                    .durable_tx
                    .send(Err(PersistError::Message(format!("append failed: {err}"))));
                Err(err)
            }
        }
    }

    async fn checkpoint(
        &mut self,
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
    ) -> PersistResult<()> {
        self.drain(true).await?;
        let removed = self
            .with_sink(move |sink| {
                sink.write_snapshot(&snapshot, last_seq)?;
                if compact { sink.compact_through(last_seq) } else { Ok(0) }
            })
            .await?;
        debug!(target: "sailrace::runtime", last_seq, compacted = removed, "journal checkpointed");
        Ok(())
    }
}
