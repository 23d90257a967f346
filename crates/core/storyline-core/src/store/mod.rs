//! Persistence port
//!
//! Everything the engine persists goes through [`StorylineStore`]: the
//! storylines and their updates, the append-only creation audit log, and the
//! two singleton markers (last successful creation, last fully processed day).
//! Writes that must be all-or-nothing are single calls on the port so every
//! backend can run them in one transaction.

mod memory;

pub use memory::{InMemoryStore, StoreOperation};

use crate::types::{CreationAttempt, Storyline, StorylineCategory, StorylinePhase, StorylineUpdate};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Expected current value for a compare-and-swap write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition<T> {
    /// Write unconditionally
    Any,
    /// Write only if the stored value still equals this
    Equals(T),
}

impl<T: PartialEq> Precondition<T> {
    /// Whether `current` satisfies the precondition
    pub fn holds(&self, current: &T) -> bool {
        match self {
            Precondition::Any => true,
            Precondition::Equals(expected) => expected == current,
        }
    }
}

/// Storage backend for the storyline engine
#[async_trait]
pub trait StorylineStore: Send + Sync {
    /// Fetch one storyline
    async fn get_storyline(&self, id: Uuid) -> Result<Option<Storyline>>;

    /// Storylines without an outcome, oldest first
    async fn list_active_storylines(&self) -> Result<Vec<Storyline>>;

    /// Storylines created at or after `since`, optionally within one category
    async fn list_storylines_created_since(
        &self,
        since: DateTime<Utc>,
        category: Option<StorylineCategory>,
    ) -> Result<Vec<Storyline>>;

    /// Storylines resolved at or after `since`, most recent first
    async fn list_resolved_since(&self, since: DateTime<Utc>) -> Result<Vec<Storyline>>;

    /// Storylines currently in `phase`
    async fn list_storylines_in_phase(&self, phase: StorylinePhase) -> Result<Vec<Storyline>>;

    /// Write `storyline` if the stored version still equals `storyline.version`.
    ///
    /// The stored row gets `version + 1`. Returns `false` when another writer got
    /// there first (or the row is gone).
    async fn update_storyline(&self, storyline: &Storyline) -> Result<bool>;

    /// Delete a storyline and, by cascade, its updates. Returns whether it existed.
    async fn delete_storyline(&self, id: Uuid) -> Result<bool>;

    /// Append an update to its storyline
    async fn insert_update(&self, update: &StorylineUpdate) -> Result<()>;

    /// All updates of a storyline, oldest first
    async fn list_updates(&self, storyline_id: Uuid) -> Result<Vec<StorylineUpdate>>;

    /// Most recently created update of a storyline
    async fn latest_update(&self, storyline_id: Uuid) -> Result<Option<StorylineUpdate>>;

    /// Append an audit row
    async fn append_creation_attempt(&self, attempt: &CreationAttempt) -> Result<()>;

    /// Latest audit rows, newest first
    async fn recent_creation_attempts(&self, limit: usize) -> Result<Vec<CreationAttempt>>;

    /// Time of the last successful creation
    async fn get_cooldown_marker(&self) -> Result<Option<DateTime<Utc>>>;

    /// Last fully processed local calendar day
    async fn get_processing_marker(&self) -> Result<Option<NaiveDate>>;

    /// Move the processing marker to `next` if it still equals `expected`
    async fn advance_processing_marker(
        &self,
        expected: Option<NaiveDate>,
        next: NaiveDate,
    ) -> Result<bool>;

    /// Atomically insert a new storyline, set the cooldown marker to its
    /// creation time and append the success audit row.
    ///
    /// Nothing is written and `false` is returned when the cooldown marker no
    /// longer matches `cooldown`.
    async fn commit_creation(
        &self,
        storyline: &Storyline,
        attempt: &CreationAttempt,
        cooldown: Precondition<Option<DateTime<Utc>>>,
    ) -> Result<bool>;

    /// Atomically insert closure updates and write the storyline (version CAS).
    ///
    /// Nothing is written and `false` is returned on a version conflict.
    async fn commit_resolution(
        &self,
        storyline: &Storyline,
        closure: &[StorylineUpdate],
    ) -> Result<bool>;

    /// Atomically write the storyline's mention bookkeeping (version CAS) and
    /// flag those of `update_ids` that belong to it as mentioned.
    ///
    /// Returns how many updates changed, or `None` (nothing written) on a
    /// version conflict.
    async fn commit_mention(
        &self,
        storyline: &Storyline,
        update_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Option<u64>>;
}
