use sailrace::{
    core::store::EntityStore,
    engine::{IntegrityPolicy, RegressionPolicy},
    model::{Entity, Fleet, Lap, Participant, Race, Racer, Series, Start},
    runtime::handle::{RuntimeConfig, spawn_race_store},
    service::{ErrorCode, RaceService},
    types::{EntityKind, EntityRef, RaceState, RaceType},
};

fn service(config: RuntimeConfig) -> RaceService {
    RaceService::new(spawn_race_store(EntityStore::new(), None, config))
}

fn fleet(key: &str) -> Fleet {
    Fleet {
        key: key.to_string(),
        name: "Fast".to_string(),
        class: "PY".to_string(),
    }
}

fn race(key: &str, fleet: &str, state: RaceState) -> Race {
    Race {
        key: key.to_string(),
        series: None,
        epoch: 1_700_000_000,
        race_type: RaceType::Handicap,
        starts: vec![Start {
            fleet: fleet.to_string(),
            race_state: state,
            seconds_since_epoch: 0,
        }],
    }
}

#[tokio::test]
async fn fleet_race_delete_walkthrough() {
    let svc = service(RuntimeConfig::default());

    assert!(svc.ping().await.success);
    assert!(svc.upsert_fleets(vec![fleet("F1")]).await.success);
    assert!(
        svc.upsert_races(vec![race("R1", "F1", RaceState::Scheduled)])
            .await
            .success
    );

    let status = svc.delete_fleets(vec!["F1".to_string()]).await;
    assert!(!status.success);
    let err = status.first_error().expect("error detail");
    assert_eq!(err.code, ErrorCode::DependentExists);
    assert_eq!(err.target, Some(EntityRef::fleet("F1")));
    assert_eq!(err.related, Some(EntityRef::race("R1")));
    assert_eq!(err.index, Some(0));

    assert!(svc.delete_races(vec!["R1".to_string()]).await.success);
    assert!(svc.delete_fleets(vec!["F1".to_string()]).await.success);

    svc.store().shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn replies_report_counts_and_sequence() {
    let svc = service(RuntimeConfig::default());
    let series = vec![Series {
        key: "S1".to_string(),
        name: "Spring".to_string(),
    }];

    let first = svc.upsert_series(series.clone()).await;
    assert!(first.success);
    assert_eq!((first.applied, first.unchanged, first.seq), (1, 0, Some(1)));

    let again = svc.upsert_series(series).await;
    assert!(again.success);
    assert_eq!((again.applied, again.unchanged, again.seq), (0, 1, None));

    let gone = svc.delete_series(vec!["never-existed".to_string()]).await;
    assert!(gone.success);
    assert_eq!(gone.unchanged, 1);

    assert_eq!(svc.ping().await.seq, Some(1));
    svc.store().shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn racer_batch_failure_lists_every_bad_item() {
    let svc = service(RuntimeConfig::default());
    assert!(
        svc.upsert_participants(vec![Participant {
            key: "P1".to_string(),
            sail_number: "GBR 1".to_string(),
            helm: "Ann".to_string(),
            boat_class: "ILCA 7".to_string(),
        }])
        .await
        .success
    );

    let racers = vec![
        Racer {
            key: "X1".to_string(),
            participant: "P1".to_string(),
            laps: vec![Lap { elapsed: 400 }],
        },
        Racer {
            key: "X2".to_string(),
            participant: "P2".to_string(),
            laps: vec![],
        },
        Racer {
            key: "X3".to_string(),
            participant: "P3".to_string(),
            laps: vec![],
        },
    ];
    let status = svc.upsert_racers(racers).await;
    assert!(!status.success);
    let indices: Vec<Option<usize>> = status.errors.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![Some(1), Some(2)]);
    assert!(status.errors.iter().all(|e| e.code == ErrorCode::ReferenceViolation));

    let lookup = svc.get(EntityKind::Racer, "X1").await;
    assert!(!lookup.status.success);
    assert_eq!(lookup.status.first_error().map(|e| e.code), Some(ErrorCode::NotFound));

    assert!(svc.delete_participants(vec!["P1".to_string()]).await.success);
    svc.store().shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn mixed_batches_and_lookups() {
    let svc = service(RuntimeConfig::default());

    let status = svc
        .upsert_entities(vec![
            Entity::Race(race("R1", "F1", RaceState::Started)),
            Entity::Fleet(fleet("F1")),
        ])
        .await;
    assert!(status.success);
    assert_eq!(status.applied, 2);

    let lookup = svc.get(EntityKind::Race, "R1").await;
    assert!(lookup.status.success);
    assert_eq!(lookup.entity.map(|e| e.version), Some(1));

    let refs = svc.referenced_by(EntityKind::Fleet, "F1").await.expect("refs");
    assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec![EntityRef::race("R1")]);

    let status = svc
        .delete_entities(vec![EntityRef::fleet("F1"), EntityRef::race("R1")])
        .await;
    assert!(status.success);
    assert_eq!(status.applied, 2);
    assert!(svc.store().keys(EntityKind::Race).await.expect("keys").is_empty());

    svc.store().shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn regression_policy_is_configurable() {
    let strict = service(RuntimeConfig::default());
    assert!(strict.upsert_fleets(vec![fleet("F1")]).await.success);
    assert!(strict.upsert_races(vec![race("R1", "F1", RaceState::Finished)]).await.success);
    let status = strict
        .upsert_races(vec![race("R1", "F1", RaceState::Started)])
        .await;
    assert_eq!(status.first_error().map(|e| e.code), Some(ErrorCode::StateRegression));
    strict.store().shutdown().await.expect("shutdown");

    let lenient = service(RuntimeConfig::default().with_integrity(IntegrityPolicy {
        regression: RegressionPolicy::Warn,
    }));
    assert!(lenient.upsert_fleets(vec![fleet("F1")]).await.success);
    assert!(lenient.upsert_races(vec![race("R1", "F1", RaceState::Finished)]).await.success);
    let status = lenient
        .upsert_races(vec![race("R1", "F1", RaceState::Started)])
        .await;
    assert!(status.success);
    assert_eq!(status.warnings.len(), 1);
    assert_eq!(status.warnings[0].code, ErrorCode::StateRegression);
    lenient.store().shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn oversized_request_is_refused() {
    let svc = service(RuntimeConfig::default().with_max_batch_items(1));
    let status = svc.upsert_fleets(vec![fleet("A"), fleet("B")]).await;
    assert!(!status.success);
    assert_eq!(status.first_error().map(|e| e.code), Some(ErrorCode::BatchTooLarge));
    svc.store().shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn stopped_runtime_reports_unavailable() {
    let svc = service(RuntimeConfig::default());
    svc.store().shutdown().await.expect("shutdown");

    let status = svc.ping().await;
    assert!(!status.success);
    assert_eq!(status.first_error().map(|e| e.code), Some(ErrorCode::Unavailable));
}

#[test]
fn config_loads_from_json_with_defaults() {
    let config = RuntimeConfig::from_json_str(
        r#"{ "max_batch_items": 50, "integrity": { "regression": "warn" } }"#,
    )
    .expect("parse");
    assert_eq!(config.max_batch_items, 50);
    assert_eq!(config.integrity.regression, RegressionPolicy::Warn);
    assert_eq!(config.batch_max_ops, RuntimeConfig::default().batch_max_ops);
}
