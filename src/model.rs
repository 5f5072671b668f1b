//! Race domain records and the `Entity` sum type.

use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, EntityRef, RaceState, RaceType};

/// A named series of races.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Series key.
    pub key: String,
    /// Display name.
    pub name: String,
}

/// One fleet's start within a race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Start {
    /// Key of the starting [`Fleet`].
    pub fleet: String,
    /// Current state of this start.
    pub race_state: RaceState,
    /// Start offset from the race epoch, in seconds.
    pub seconds_since_epoch: i64,
}

/// A race and its ordered fleet starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Race {
    /// Race key.
    pub key: String,
    /// Optional owning [`Series`] key.
    #[serde(default)]
    pub series: Option<String>,
    /// Race reference time, Unix seconds.
    pub epoch: i64,
    /// Race format.
    pub race_type: RaceType,
    /// Starts in the order given by the client.
    pub starts: Vec<Start>,
}

/// A fleet of boats starting together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    /// Fleet key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Boat class or handicap band.
    pub class: String,
}

/// A boat and crew entered in the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant key.
    pub key: String,
    /// Sail number as written on the sail.
    pub sail_number: String,
    /// Helm name.
    pub helm: String,
    /// Boat class.
    pub boat_class: String,
}

/// One completed lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lap {
    /// Elapsed time for the lap, in seconds.
    pub elapsed: u64,
}

/// A participant's lap record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Racer {
    /// Racer key.
    pub key: String,
    /// Key of the referenced [`Participant`].
    pub participant: String,
    /// Laps in the order given by the client.
    pub laps: Vec<Lap>,
}

impl Racer {
    /// Sum of all lap times.
    pub fn total_elapsed(&self) -> u64 {
        self.laps.iter().map(|lap| lap.elapsed).sum()
    }
}

/// Any storable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    /// A [`Series`].
    Series(Series),
    /// A [`Race`].
    Race(Race),
    /// A [`Fleet`].
    Fleet(Fleet),
    /// A [`Participant`].
    Participant(Participant),
    /// A [`Racer`].
    Racer(Racer),
}

impl Entity {
    /// Entity type of this record.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Series(_) => EntityKind::Series,
            Entity::Race(_) => EntityKind::Race,
            Entity::Fleet(_) => EntityKind::Fleet,
            Entity::Participant(_) => EntityKind::Participant,
            Entity::Racer(_) => EntityKind::Racer,
        }
    }

    /// Record key.
    pub fn key(&self) -> &str {
        match self {
            Entity::Series(v) => v.key(),
            Entity::Race(v) => v.key(),
            Entity::Fleet(v) => v.key(),
            Entity::Participant(v) => v.key(),
            Entity::Racer(v) => v.key(),
        }
    }

    /// `(kind, key)` pointer to this record.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.key())
    }

    /// Outgoing references, deduplicated, in first-seen order.
    pub fn references(&self) -> Vec<EntityRef> {
        match self {
            Entity::Series(v) => v.references(),
            Entity::Race(v) => v.references(),
            Entity::Fleet(v) => v.references(),
            Entity::Participant(v) => v.references(),
            Entity::Racer(v) => v.references(),
        }
    }

    /// True when this record points at `target`.
    pub fn refers_to(&self, target: &EntityRef) -> bool {
        self.references().iter().any(|r| r == target)
    }
}

/// Typed view over one entity type: its kind, key, and reference rules.
pub trait Record: Clone + Into<Entity> + Send + 'static {
    /// Entity type implemented by `Self`.
    const KIND: EntityKind;

    /// Record key.
    fn key(&self) -> &str;

    /// Outgoing references that must resolve at commit time.
    fn references(&self) -> Vec<EntityRef> {
        Vec::new()
    }

    /// Borrows `Self` out of an [`Entity`] of the matching kind.
    fn from_entity(entity: &Entity) -> Option<&Self>;
}

impl Record for Series {
    const KIND: EntityKind = EntityKind::Series;

    fn key(&self) -> &str {
        &self.key
    }

    fn from_entity(entity: &Entity) -> Option<&Self> {
        match entity {
            Entity::Series(v) => Some(v),
            _ => None,
        }
    }
}

impl Record for Race {
    const KIND: EntityKind = EntityKind::Race;

    fn key(&self) -> &str {
        &self.key
    }

    fn references(&self) -> Vec<EntityRef> {
        let mut out = Vec::with_capacity(self.starts.len() + 1);
        if let Some(series) = &self.series {
            out.push(EntityRef::series(series.clone()));
        }
        for start in &self.starts {
            let fleet = EntityRef::fleet(start.fleet.clone());
            if !out.contains(&fleet) {
                out.push(fleet);
            }
        }
        out
    }

    fn from_entity(entity: &Entity) -> Option<&Self> {
        match entity {
            Entity::Race(v) => Some(v),
            _ => None,
        }
    }
}

impl Record for Fleet {
    const KIND: EntityKind = EntityKind::Fleet;

    fn key(&self) -> &str {
        &self.key
    }

    fn from_entity(entity: &Entity) -> Option<&Self> {
        match entity {
            Entity::Fleet(v) => Some(v),
            _ => None,
        }
    }
}

impl Record for Participant {
    const KIND: EntityKind = EntityKind::Participant;

    fn key(&self) -> &str {
        &self.key
    }

    fn from_entity(entity: &Entity) -> Option<&Self> {
        match entity {
            Entity::Participant(v) => Some(v),
            _ => None,
        }
    }
}

impl Record for Racer {
    const KIND: EntityKind = EntityKind::Racer;

    fn key(&self) -> &str {
        &self.key
    }

    fn references(&self) -> Vec<EntityRef> {
        vec![EntityRef::participant(self.participant.clone())]
    }

    fn from_entity(entity: &Entity) -> Option<&Self> {
        match entity {
            Entity::Racer(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_into_entity {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for Entity {
                fn from(value: $ty) -> Self {
                    Entity::$ty(value)
                }
            }
        )*
    };
}

impl_into_entity!(Series, Race, Fleet, Participant, Racer);
