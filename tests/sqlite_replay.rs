use tempfile::TempDir;

use sailrace::{
    core::store::EntityStore,
    engine::MutationEngine,
    model::{Fleet, Race, Start},
    persist::{OpSink, sqlite::SqliteOpSink},
    runtime::handle::{RuntimeConfig, spawn_race_store},
    types::{EntityKind, RaceState, RaceType},
};

fn fleet(key: &str) -> Fleet {
    Fleet {
        key: key.to_string(),
        name: format!("{key} fleet"),
        class: "Asymmetric".to_string(),
    }
}

fn race(key: &str, fleet: &str, state: RaceState) -> Race {
    Race {
        key: key.to_string(),
        series: None,
        epoch: 1_720_000_000,
        race_type: RaceType::AverageLap,
        starts: vec![Start {
            fleet: fleet.to_string(),
            race_state: state,
            seconds_since_epoch: 600,
        }],
    }
}

#[test]
fn sqlite_replay_round_trips_state_and_versions() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("races.db");

    let engine = MutationEngine::default();
    let mut store = EntityStore::new();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");

    engine
        .upsert_records(&mut store, vec![fleet("F1"), fleet("F2")])
        .expect("fleets");
    engine
        .upsert_records(&mut store, vec![race("R1", "F1", RaceState::Scheduled)])
        .expect("race");
    engine
        .upsert_records(&mut store, vec![race("R1", "F1", RaceState::Finished)])
        .expect("finish");
    engine
        .delete_keys(&mut store, EntityKind::Fleet, vec!["F2".to_string()])
        .expect("delete");

    let ops = store.drain_pending_ops();
    assert_eq!(ops.len(), 4);
    sink.append_ops(&ops).expect("append");
    assert_eq!(sink.latest_seq().expect("latest"), 4);

    drop(sink);

    let sink2 = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = sink2.load_store().expect("replay");

    assert_eq!(replayed.export_snapshot(), store.export_snapshot());
    assert_eq!(replayed.get(EntityKind::Race, "R1").unwrap().version, 2);
    assert_eq!(replayed.referenced_by(EntityKind::Fleet, "F1").len(), 1);
}

#[test]
fn snapshot_and_compaction_preserve_replay() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snap.db");

    let engine = MutationEngine::default();
    let mut store = EntityStore::new();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");

    for i in 0..10u64 {
        engine
            .upsert_records(&mut store, vec![fleet(&format!("F{i}"))])
            .expect("fleet");
    }
    sink.append_ops(&store.drain_pending_ops()).expect("append");

    let snapshot = store.export_snapshot();
    let last_seq = store.latest_op_seq();
    sink.write_snapshot(&snapshot, last_seq).expect("snapshot");
    let removed = sink.compact_through(last_seq).expect("compact");
    assert_eq!(removed, 10);

    engine
        .upsert_records(&mut store, vec![race("R1", "F3", RaceState::Started)])
        .expect("race after snapshot");
    sink.append_ops(&store.drain_pending_ops()).expect("append tail");

    drop(sink);

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = reopened.load_store().expect("replay");

    assert_eq!(replayed.export_snapshot(), store.export_snapshot());
    assert_eq!(replayed.latest_op_seq(), 11);
}

#[tokio::test]
async fn runtime_checkpoint_survives_restart() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("runtime.db");

    let sink = SqliteOpSink::open(&db_path).expect("open");
    let handle = spawn_race_store(
        EntityStore::new(),
        Some(Box::new(sink)),
        RuntimeConfig::default(),
    );
    handle
        .upsert_records(vec![fleet("F1")])
        .await
        .expect("fleet");
    handle
        .upsert_records(vec![race("R1", "F1", RaceState::Scheduled)])
        .await
        .expect("race");
    handle.checkpoint().await.expect("checkpoint");
    handle
        .delete_keys(EntityKind::Race, vec!["R1".to_string()])
        .await
        .expect("delete");
    let expected = handle.snapshot().await.expect("snapshot");
    handle.shutdown().await.expect("shutdown");

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = reopened.load_store().expect("replay");
    assert_eq!(replayed.export_snapshot(), expected);
    assert!(replayed.contains(EntityKind::Fleet, "F1"));
    assert!(!replayed.contains(EntityKind::Race, "R1"));
}

#[test]
fn in_memory_sink_appends_and_reports_latest() {
    let engine = MutationEngine::default();
    let mut store = EntityStore::new();
    let mut sink = SqliteOpSink::open_in_memory().expect("open");
    assert_eq!(sink.latest_seq().expect("empty"), 0);

    engine
        .upsert_records(&mut store, vec![fleet("F1")])
        .expect("fleet");
    engine
        .upsert_records(&mut store, vec![fleet("F1")])
        .expect("unchanged");
    let ops = store.drain_pending_ops();
    assert_eq!(ops.len(), 1);
    assert_eq!(sink.append_ops(&ops).expect("append"), 1);
    assert_eq!(sink.append_ops(&[]).expect("empty append"), 1);

    let tail = sink.load_events_after(0).expect("tail");
    assert_eq!(tail, ops);
}

#[test]
fn journal_refuses_batches_that_do_not_advance() {
    let engine = MutationEngine::default();
    let mut store = EntityStore::new();
    let mut sink = SqliteOpSink::open_in_memory().expect("open");

    engine
        .upsert_records(&mut store, vec![fleet("F1")])
        .expect("fleet");
    let ops = store.drain_pending_ops();
    sink.append_ops(&ops).expect("append");

    assert!(sink.append_ops(&ops).is_err());
    assert_eq!(sink.load_events_after(0).expect("tail").len(), 1);
}

#[tokio::test]
async fn auto_checkpoint_counts_committed_batches() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("auto.db");

    let config = RuntimeConfig {
        compact_after_snapshot: true,
        ..RuntimeConfig::default().with_snapshot_every_batches(2)
    };
    let sink = SqliteOpSink::open(&db_path).expect("open");
    let handle = spawn_race_store(EntityStore::new(), Some(Box::new(sink)), config);

    for key in ["F1", "F2", "F3"] {
        handle
            .upsert_records(vec![fleet(key)])
            .await
            .expect("fleet");
    }
    // An unchanged batch is not counted.
    handle
        .upsert_records(vec![fleet("F3")])
        .await
        .expect("no-op");
    let expected = handle.snapshot().await.expect("snapshot");
    handle.shutdown().await.expect("shutdown");

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    let tail: Vec<_> = reopened
        .load_events_after(0)
        .expect("tail")
        .into_iter()
        .map(|stored| stored.seq)
        .collect();
    assert_eq!(tail, vec![3]);
    assert_eq!(reopened.load_store().expect("replay").export_snapshot(), expected);
}
