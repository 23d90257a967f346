//! Storyline phases and phase-indexed tables

use crate::{Result, StorylineError};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Index;
use std::str::FromStr;

/// Narrative stage of a storyline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorylinePhase {
    /// Just shared
    Announced,
    /// Early excitement
    Honeymoon,
    /// Difficulties show up
    Reality,
    /// Steady work
    Active,
    /// Decisive moment approaching
    Climax,
    /// Outcome known, closure being scheduled
    Resolving,
    /// Closure scheduled, aftermath dripping out
    Resolved,
    /// Long tail, occasional callbacks
    Reflecting,
}

impl StorylinePhase {
    /// Every phase in lifecycle order
    pub const ALL: [StorylinePhase; 8] = [
        StorylinePhase::Announced,
        StorylinePhase::Honeymoon,
        StorylinePhase::Reality,
        StorylinePhase::Active,
        StorylinePhase::Climax,
        StorylinePhase::Resolving,
        StorylinePhase::Resolved,
        StorylinePhase::Reflecting,
    ];

    /// Position in [`StorylinePhase::ALL`]
    pub fn index(self) -> usize {
        match self {
            StorylinePhase::Announced => 0,
            StorylinePhase::Honeymoon => 1,
            StorylinePhase::Reality => 2,
            StorylinePhase::Active => 3,
            StorylinePhase::Climax => 4,
            StorylinePhase::Resolving => 5,
            StorylinePhase::Resolved => 6,
            StorylinePhase::Reflecting => 7,
        }
    }

    /// Stable storage name
    pub fn as_str(self) -> &'static str {
        match self {
            StorylinePhase::Announced => "announced",
            StorylinePhase::Honeymoon => "honeymoon",
            StorylinePhase::Reality => "reality",
            StorylinePhase::Active => "active",
            StorylinePhase::Climax => "climax",
            StorylinePhase::Resolving => "resolving",
            StorylinePhase::Resolved => "resolved",
            StorylinePhase::Reflecting => "reflecting",
        }
    }

    /// Phases that only the resolution operation may enter
    pub fn is_closure_branch(self) -> bool {
        matches!(
            self,
            StorylinePhase::Resolving | StorylinePhase::Resolved | StorylinePhase::Reflecting
        )
    }
}

impl fmt::Display for StorylinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorylinePhase {
    type Err = StorylineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        StorylinePhase::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| StorylineError::validation(format!("Unknown storyline phase '{}'", s)))
    }
}

/// A value for every phase, indexed by the enum.
///
/// Built either from a closure (total by construction) or from a list of entries,
/// in which case a missing or repeated phase is a configuration error. This keeps
/// phase-keyed behavior from silently defaulting when a table is edited.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTable<T> {
    entries: [T; 8],
}

impl<T> PhaseTable<T> {
    /// Build a table by evaluating `f` for every phase
    pub fn from_fn(f: impl FnMut(StorylinePhase) -> T) -> Self {
        Self {
            entries: StorylinePhase::ALL.map(f),
        }
    }

    /// Build a table from explicit entries, requiring exactly one per phase
    pub fn from_entries<I>(table: &str, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (StorylinePhase, T)>,
    {
        let mut slots: [Option<T>; 8] = Default::default();
        for (phase, value) in entries {
            if slots[phase.index()].replace(value).is_some() {
                return Err(StorylineError::config(format!(
                    "{} table has more than one entry for phase '{}'",
                    table, phase
                )));
            }
        }

        let mut ordered = Vec::with_capacity(StorylinePhase::ALL.len());
        for phase in StorylinePhase::ALL {
            match slots[phase.index()].take() {
                Some(value) => ordered.push(value),
                None => {
                    return Err(StorylineError::config(format!(
                        "{} table is missing an entry for phase '{}'",
                        table, phase
                    )))
                }
            }
        }

        let entries: [T; 8] = ordered
            .try_into()
            .map_err(|_| StorylineError::config(format!("{} table has the wrong size", table)))?;
        Ok(Self { entries })
    }

    /// Value for a phase
    pub fn get(&self, phase: StorylinePhase) -> &T {
        &self.entries[phase.index()]
    }

    /// Replace the value for a phase
    pub fn set(&mut self, phase: StorylinePhase, value: T) {
        self.entries[phase.index()] = value;
    }

    /// Iterate in lifecycle order
    pub fn iter(&self) -> impl Iterator<Item = (StorylinePhase, &T)> {
        StorylinePhase::ALL.into_iter().zip(self.entries.iter())
    }
}

impl<T> Index<StorylinePhase> for PhaseTable<T> {
    type Output = T;

    fn index(&self, phase: StorylinePhase) -> &T {
        self.get(phase)
    }
}

impl<T: Serialize> Serialize for PhaseTable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let map: BTreeMap<StorylinePhase, &T> = self.iter().collect();
        map.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for PhaseTable<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = HashMap::<StorylinePhase, T>::deserialize(deserializer)?;
        PhaseTable::from_entries("phase", map).map_err(D::Error::custom)
    }
}
