//! Shared primitive ids, entity kinds, and race enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic journal sequence number, one per committed batch.
pub type OpSeq = u64;
/// Per-record version, starting at 1 and bumped on each effective replace.
pub type Version = u64;

/// Entity type stored in the race data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A series of races.
    Series,
    /// A single race with its fleet starts.
    Race,
    /// A fleet that starts together.
    Fleet,
    /// A boat/crew entered in the event.
    Participant,
    /// A participant's result line with laps.
    Racer,
}

impl EntityKind {
    /// Every kind, in dependency order (referenced kinds first).
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Series,
        EntityKind::Fleet,
        EntityKind::Participant,
        EntityKind::Race,
        EntityKind::Racer,
    ];

    /// Kinds whose records may hold a reference to a record of this kind.
    pub fn dependent_kinds(self) -> &'static [EntityKind] {
        match self {
            EntityKind::Series => &[EntityKind::Race],
            EntityKind::Fleet => &[EntityKind::Race],
            EntityKind::Participant => &[EntityKind::Racer],
            EntityKind::Race | EntityKind::Racer => &[],
        }
    }

    /// Stable lowercase name used in logs and journal rows.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Series => "series",
            EntityKind::Race => "race",
            EntityKind::Fleet => "fleet",
            EntityKind::Participant => "participant",
            EntityKind::Racer => "racer",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed pointer to a record: `(kind, key)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type.
    pub kind: EntityKind,
    /// Key, unique within `kind`.
    pub key: String,
}

impl EntityRef {
    /// Builds a reference from a kind and key.
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    /// Shorthand for a series reference.
    pub fn series(key: impl Into<String>) -> Self {
        Self::new(EntityKind::Series, key)
    }

    /// Shorthand for a race reference.
    pub fn race(key: impl Into<String>) -> Self {
        Self::new(EntityKind::Race, key)
    }

    /// Shorthand for a fleet reference.
    pub fn fleet(key: impl Into<String>) -> Self {
        Self::new(EntityKind::Fleet, key)
    }

    /// Shorthand for a participant reference.
    pub fn participant(key: impl Into<String>) -> Self {
        Self::new(EntityKind::Participant, key)
    }

    /// Shorthand for a racer reference.
    pub fn racer(key: impl Into<String>) -> Self {
        Self::new(EntityKind::Racer, key)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Race format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RaceType {
    /// Handicap race corrected by rating.
    #[default]
    Handicap,
    /// Pursuit race with staggered starts.
    Pursuit,
    /// Level-rated, first across the line wins.
    Level,
    /// Handicap corrected on average lap time.
    AverageLap,
}

/// Lifecycle state of a fleet start.
///
/// Forward path is `Scheduled -> Started -> Finished`; `Abandoned` is reachable
/// from `Scheduled` or `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RaceState {
    /// Not yet started.
    #[default]
    Scheduled,
    /// Underway.
    Started,
    /// Results are final.
    Finished,
    /// Called off.
    Abandoned,
}

impl RaceState {
    /// True for `Finished` and `Abandoned`.
    pub fn is_terminal(self) -> bool {
        matches!(self, RaceState::Finished | RaceState::Abandoned)
    }

    /// True when moving from `self` to `next` follows the state machine.
    pub fn can_transition_to(self, next: RaceState) -> bool {
        use RaceState::*;
        matches!(
            (self, next),
            (Scheduled, Scheduled | Started | Finished | Abandoned)
                | (Started, Started | Finished | Abandoned)
                | (Finished, Finished)
                | (Abandoned, Abandoned)
        )
    }

    /// True when `next` moves a terminal start back into a live state.
    pub fn is_regression_to(self, next: RaceState) -> bool {
        self.is_terminal() && !next.is_terminal()
    }
}
