//! Sailing-race data store: series, races with fleet starts, fleets,
//! participants, and racers with laps, kept referentially consistent under
//! concurrent all-or-nothing upsert and delete batches.
//!
//! # Examples
//!
//! Direct, synchronous use of the [`engine::MutationEngine`]:
//! ```
//! use sailrace::{
//!     core::store::EntityStore,
//!     engine::{MutationEngine, ViolationKind},
//!     model::{Fleet, Race, Start},
//!     types::{EntityKind, RaceState, RaceType},
//! };
//!
//! let engine = MutationEngine::default();
//! let mut store = EntityStore::new();
//!
//! engine.upsert_records(&mut store, vec![Fleet {
//!     key: "F1".to_string(),
//!     name: "Fast handicap".to_string(),
//!     class: "PY".to_string(),
//! }]).expect("fleet");
//!
//! engine.upsert_records(&mut store, vec![Race {
//!     key: "R1".to_string(),
//!     series: None,
//!     epoch: 1_700_000_000,
//!     race_type: RaceType::Handicap,
//!     starts: vec![Start { fleet: "F1".to_string(), race_state: RaceState::Scheduled, seconds_since_epoch: 0 }],
//! }]).expect("race");
//!
//! let err = engine
//!     .delete_keys(&mut store, EntityKind::Fleet, vec!["F1".to_string()])
//!     .expect_err("fleet is still started by R1");
//! assert_eq!(err.violations()[0].kind, ViolationKind::DependentExists);
//! ```
//!
//! Serving RPCs through the single-writer runtime:
//! ```no_run
//! use sailrace::{
//!     core::store::EntityStore,
//!     model::Series,
//!     runtime::handle::{spawn_race_store, RuntimeConfig},
//!     service::RaceService,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let handle = spawn_race_store(EntityStore::new(), None, RuntimeConfig::default());
//! let service = RaceService::new(handle.clone());
//! let status = service
//!     .upsert_series(vec![Series { key: "S1".to_string(), name: "Winter".to_string() }])
//!     .await;
//! assert!(status.success);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Authoritative in-memory store and reverse-reference index.
pub mod core;
/// Staging, integrity validation, and atomic batch commit.
pub mod engine;
/// Race domain records.
pub mod model;
/// Journal op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// RPC dispatcher and reply types.
pub mod service;
/// Shared primitive types and enums.
pub mod types;
