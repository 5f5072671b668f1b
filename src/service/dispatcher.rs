use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::{
    engine::{Violation, ViolationKind},
    model::{Entity, Fleet, Participant, Race, Racer, Record, Series},
    runtime::handle::{RaceStoreHandle, RuntimeError},
    types::{EntityKind, EntityRef},
};

use super::status::{ErrorCode, GetReply, ItemError, Status};

/// Maps each RPC onto one store batch and folds the result into a [`Status`].
///
/// The store is owned by the runtime task behind `store`; the service itself
/// holds no state and can be cloned into every request handler.
#[derive(Clone)]
pub struct RaceService {
    store: RaceStoreHandle,
}

impl RaceService {
    pub fn new(store: RaceStoreHandle) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RaceStoreHandle {
        &self.store
    }

    pub async fn ping(&self) -> Status {
        match self.store.ping().await {
            Ok(seq) => Status {
                seq: Some(seq),
                ..Status::ok()
            },
            Err(err) => {
                warn!(target: "sailrace::service", error = %err, "ping failed");
                Status::from(err)
            }
        }
    }

    pub async fn upsert_series(&self, series: Vec<Series>) -> Status {
        for s in &series {
            debug!(target: "sailrace::service", key = %s.key, name = %s.name, "series");
        }
        self.upsert("UpsertSeries", series).await
    }

    pub async fn delete_series(&self, keys: Vec<String>) -> Status {
        self.delete("DeleteSeries", EntityKind::Series, keys).await
    }

    pub async fn upsert_races(&self, races: Vec<Race>) -> Status {
        for race in &races {
            debug!(
                target: "sailrace::service",
                key = %race.key,
                epoch = race.epoch,
                race_type = ?race.race_type,
                "race"
            );
            for start in &race.starts {
                debug!(
                    target: "sailrace::service",
                    fleet = %start.fleet,
                    state = ?start.race_state,
                    seconds_since_epoch = start.seconds_since_epoch,
                    "start"
                );
            }
        }
        self.upsert("UpsertRaces", races).await
    }

    pub async fn delete_races(&self, keys: Vec<String>) -> Status {
        self.delete("DeleteRaces", EntityKind::Race, keys).await
    }

    pub async fn upsert_fleets(&self, fleets: Vec<Fleet>) -> Status {
        for fleet in &fleets {
            debug!(target: "sailrace::service", key = %fleet.key, class = %fleet.class, "fleet");
        }
        self.upsert("UpsertFleets", fleets).await
    }

    pub async fn delete_fleets(&self, keys: Vec<String>) -> Status {
        self.delete("DeleteFleets", EntityKind::Fleet, keys).await
    }

    pub async fn upsert_participants(&self, participants: Vec<Participant>) -> Status {
        for p in &participants {
            debug!(target: "sailrace::service", key = %p.key, sail_number = %p.sail_number, "participant");
        }
        self.upsert("UpsertParticipants", participants).await
    }

    pub async fn delete_participants(&self, keys: Vec<String>) -> Status {
        self.delete("DeleteParticipants", EntityKind::Participant, keys).await
    }

    pub async fn upsert_racers(&self, racers: Vec<Racer>) -> Status {
        for racer in &racers {
            let laps: Vec<u64> = racer.laps.iter().map(|lap| lap.elapsed).collect();
            debug!(
                target: "sailrace::service",
                key = %racer.key,
                participant = %racer.participant,
                laps = ?laps,
                "racer"
            );
        }
        self.upsert("UpsertRacers", racers).await
    }

    pub async fn delete_racers(&self, keys: Vec<String>) -> Status {
        self.delete("DeleteRacers", EntityKind::Racer, keys).await
    }

    /// Upserts records of several kinds in one atomic batch.
    pub async fn upsert_entities(&self, batch: Vec<Entity>) -> Status {
        let len = batch.len();
        let res = self.store.upsert(batch).await;
        finish("UpsertEntities", len, res)
    }

    /// Deletes records of several kinds in one atomic batch.
    pub async fn delete_entities(&self, targets: Vec<EntityRef>) -> Status {
        let len = targets.len();
        let res = self.store.delete(targets).await;
        finish("DeleteEntities", len, res)
    }

    pub async fn get(&self, kind: EntityKind, key: impl Into<String>) -> GetReply {
        let target = EntityRef::new(kind, key);
        match self.store.get(kind, target.key.clone()).await {
            Ok(Some(entity)) => GetReply {
                status: Status::ok(),
                entity: Some(entity),
            },
            Ok(None) => {
                let missing = Violation::new(ViolationKind::NotFound, target, "no such record");
                GetReply {
                    status: Status::failed(vec![ItemError::from(missing)]),
                    entity: None,
                }
            }
            Err(err) => GetReply {
                status: Status::from(err),
                entity: None,
            },
        }
    }

    pub async fn referenced_by(
        &self,
        kind: EntityKind,
        key: impl Into<String>,
    ) -> Result<BTreeSet<EntityRef>, Status> {
        self.store.referenced_by(kind, key).await.map_err(Status::from)
    }

    async fn upsert<R: Record>(&self, rpc: &'static str, items: Vec<R>) -> Status {
        let len = items.len();
        let res = self.store.upsert_records(items).await;
        finish(rpc, len, res)
    }

    async fn delete(&self, rpc: &'static str, kind: EntityKind, keys: Vec<String>) -> Status {
        let len = keys.len();
        let res = self.store.delete_keys(kind, keys).await;
        finish(rpc, len, res)
    }
}

fn finish(
    rpc: &'static str,
    len: usize,
    res: Result<crate::engine::BatchOutcome, RuntimeError>,
) -> Status {
    let status = match res {
        Ok(outcome) => Status::from(outcome),
        Err(err) => Status::from(err),
    };

    if status.success {
        info!(
            target: "sailrace::service",
            rpc,
            len,
            seq = ?status.seq,
            applied = status.applied,
            unchanged = status.unchanged,
            "request applied"
        );
    } else {
        let code = status.first_error().map(|e| e.code).unwrap_or(ErrorCode::Internal);
        warn!(
            target: "sailrace::service",
            rpc,
            len,
            code = ?code,
            errors = status.errors.len(),
            "request failed"
        );
    }
    status
}
