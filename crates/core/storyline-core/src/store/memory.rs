//! In-process store for tests and ephemeral runs

use super::{Precondition, StorylineStore};
use crate::types::{CreationAttempt, Storyline, StorylineCategory, StorylinePhase, StorylineUpdate};
use crate::{Result, StorylineError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Groups of store calls that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// `get_cooldown_marker`
    ReadCooldown,
    /// `list_storylines_created_since`
    ReadRecent,
    /// `list_active_storylines`
    ReadActive,
    /// `get_storyline`, `list_resolved_since`, `list_storylines_in_phase`
    ReadStoryline,
    /// `update_storyline`, `delete_storyline`
    WriteStoryline,
    /// Update reads and writes
    Updates,
    /// Audit log reads and writes
    Audit,
    /// Processing marker reads and writes
    ProcessingMarker,
    /// `commit_creation`, `commit_resolution`, `commit_mention`
    Commit,
}

#[derive(Debug, Default)]
struct Inner {
    storylines: HashMap<Uuid, Storyline>,
    updates: Vec<StorylineUpdate>,
    attempts: Vec<CreationAttempt>,
    cooldown_marker: Option<DateTime<Utc>>,
    processing_marker: Option<NaiveDate>,
}

/// [`StorylineStore`] kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    /// Calls each failing group still lets through before it starts failing
    failing: RwLock<HashMap<StoreOperation, usize>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call in `op` fail with a database error until [`Self::heal`]
    pub fn fail_on(&self, op: StoreOperation) {
        self.fail_after(op, 0);
    }

    /// Let `calls` more calls in `op` succeed, then fail like [`Self::fail_on`]
    pub fn fail_after(&self, op: StoreOperation, calls: usize) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op, calls);
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Seed the cooldown marker directly
    pub fn set_cooldown_marker(&self, at: Option<DateTime<Utc>>) -> Result<()> {
        self.write()?.cooldown_marker = at;
        Ok(())
    }

    /// Insert a storyline as-is, bypassing the creation path
    pub fn seed_storyline(&self, storyline: Storyline) -> Result<()> {
        self.write()?.storylines.insert(storyline.id, storyline);
        Ok(())
    }

    fn check(&self, op: StoreOperation) -> Result<()> {
        let mut failing = self.failing.write().unwrap_or_else(|e| e.into_inner());
        match failing.get_mut(&op) {
            Some(0) => Err(StorylineError::database(format!(
                "injected failure for {:?}",
                op
            ))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| StorylineError::database(format!("store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| StorylineError::database(format!("store lock poisoned: {}", e)))
    }

    fn sorted(mut storylines: Vec<Storyline>) -> Vec<Storyline> {
        storylines.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        storylines
    }
}

impl Inner {
    fn mark_mentioned(&mut self, ids: &[Uuid], owner: Uuid, at: DateTime<Utc>) -> u64 {
        let mut changed = 0;
        for update in self
            .updates
            .iter_mut()
            .filter(|u| u.storyline_id == owner && ids.contains(&u.id))
        {
            if !update.mentioned {
                update.mentioned = true;
                update.mentioned_at = Some(at);
                changed += 1;
            }
        }
        changed
    }

    fn swap_storyline(&mut self, storyline: &Storyline) -> bool {
        match self.storylines.get_mut(&storyline.id) {
            Some(current) if current.version == storyline.version => {
                let mut next = storyline.clone();
                next.version += 1;
                *current = next;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl StorylineStore for InMemoryStore {
    async fn get_storyline(&self, id: Uuid) -> Result<Option<Storyline>> {
        self.check(StoreOperation::ReadStoryline)?;
        Ok(self.read()?.storylines.get(&id).cloned())
    }

    async fn list_active_storylines(&self) -> Result<Vec<Storyline>> {
        self.check(StoreOperation::ReadActive)?;
        let inner = self.read()?;
        Ok(Self::sorted(
            inner
                .storylines
                .values()
                .filter(|s| s.is_active())
                .cloned()
                .collect(),
        ))
    }

    async fn list_storylines_created_since(
        &self,
        since: DateTime<Utc>,
        category: Option<StorylineCategory>,
    ) -> Result<Vec<Storyline>> {
        self.check(StoreOperation::ReadRecent)?;
        let inner = self.read()?;
        Ok(Self::sorted(
            inner
                .storylines
                .values()
                .filter(|s| s.created_at >= since)
                .filter(|s| category.map_or(true, |c| s.category == c))
                .cloned()
                .collect(),
        ))
    }

    async fn list_resolved_since(&self, since: DateTime<Utc>) -> Result<Vec<Storyline>> {
        self.check(StoreOperation::ReadStoryline)?;
        let inner = self.read()?;
        let mut resolved: Vec<Storyline> = inner
            .storylines
            .values()
            .filter(|s| s.resolved_at.map_or(false, |at| at >= since))
            .cloned()
            .collect();
        resolved.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at));
        Ok(resolved)
    }

    async fn list_storylines_in_phase(&self, phase: StorylinePhase) -> Result<Vec<Storyline>> {
        self.check(StoreOperation::ReadStoryline)?;
        let inner = self.read()?;
        Ok(Self::sorted(
            inner
                .storylines
                .values()
                .filter(|s| s.phase == phase)
                .cloned()
                .collect(),
        ))
    }

    async fn update_storyline(&self, storyline: &Storyline) -> Result<bool> {
        self.check(StoreOperation::WriteStoryline)?;
        Ok(self.write()?.swap_storyline(storyline))
    }

    async fn delete_storyline(&self, id: Uuid) -> Result<bool> {
        self.check(StoreOperation::WriteStoryline)?;
        let mut inner = self.write()?;
        let existed = inner.storylines.remove(&id).is_some();
        inner.updates.retain(|u| u.storyline_id != id);
        Ok(existed)
    }

    async fn insert_update(&self, update: &StorylineUpdate) -> Result<()> {
        self.check(StoreOperation::Updates)?;
        let mut inner = self.write()?;
        if !inner.storylines.contains_key(&update.storyline_id) {
            return Err(StorylineError::not_found(format!(
                "storyline {}",
                update.storyline_id
            )));
        }
        inner.updates.push(update.clone());
        Ok(())
    }

    async fn list_updates(&self, storyline_id: Uuid) -> Result<Vec<StorylineUpdate>> {
        self.check(StoreOperation::Updates)?;
        let inner = self.read()?;
        let mut updates: Vec<StorylineUpdate> = inner
            .updates
            .iter()
            .filter(|u| u.storyline_id == storyline_id)
            .cloned()
            .collect();
        updates.sort_by_key(|u| u.created_at);
        Ok(updates)
    }

    async fn latest_update(&self, storyline_id: Uuid) -> Result<Option<StorylineUpdate>> {
        self.check(StoreOperation::Updates)?;
        let inner = self.read()?;
        Ok(inner
            .updates
            .iter()
            .filter(|u| u.storyline_id == storyline_id)
            .max_by_key(|u| u.created_at)
            .cloned())
    }

    async fn append_creation_attempt(&self, attempt: &CreationAttempt) -> Result<()> {
        self.check(StoreOperation::Audit)?;
        self.write()?.attempts.push(attempt.clone());
        Ok(())
    }

    async fn recent_creation_attempts(&self, limit: usize) -> Result<Vec<CreationAttempt>> {
        self.check(StoreOperation::Audit)?;
        let inner = self.read()?;
        Ok(inner.attempts.iter().rev().take(limit).cloned().collect())
    }

    async fn get_cooldown_marker(&self) -> Result<Option<DateTime<Utc>>> {
        self.check(StoreOperation::ReadCooldown)?;
        Ok(self.read()?.cooldown_marker)
    }

    async fn get_processing_marker(&self) -> Result<Option<NaiveDate>> {
        self.check(StoreOperation::ProcessingMarker)?;
        Ok(self.read()?.processing_marker)
    }

    async fn advance_processing_marker(
        &self,
        expected: Option<NaiveDate>,
        next: NaiveDate,
    ) -> Result<bool> {
        self.check(StoreOperation::ProcessingMarker)?;
        let mut inner = self.write()?;
        if inner.processing_marker != expected {
            return Ok(false);
        }
        inner.processing_marker = Some(next);
        Ok(true)
    }

    async fn commit_creation(
        &self,
        storyline: &Storyline,
        attempt: &CreationAttempt,
        cooldown: Precondition<Option<DateTime<Utc>>>,
    ) -> Result<bool> {
        self.check(StoreOperation::Commit)?;
        let mut inner = self.write()?;
        if !cooldown.holds(&inner.cooldown_marker) {
            return Ok(false);
        }
        if inner.storylines.contains_key(&storyline.id) {
            return Err(StorylineError::conflict(format!(
                "storyline {} already exists",
                storyline.id
            )));
        }
        inner.storylines.insert(storyline.id, storyline.clone());
        inner.cooldown_marker = Some(storyline.created_at);
        inner.attempts.push(attempt.clone());
        Ok(true)
    }

    async fn commit_resolution(
        &self,
        storyline: &Storyline,
        closure: &[StorylineUpdate],
    ) -> Result<bool> {
        self.check(StoreOperation::Commit)?;
        let mut inner = self.write()?;
        if !inner.swap_storyline(storyline) {
            return Ok(false);
        }
        inner.updates.extend(closure.iter().cloned());
        Ok(true)
    }

    async fn commit_mention(
        &self,
        storyline: &Storyline,
        update_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        self.check(StoreOperation::Commit)?;
        self.check(StoreOperation::Updates)?;
        let mut inner = self.write()?;
        if !inner.swap_storyline(storyline) {
            return Ok(None);
        }
        Ok(Some(inner.mark_mentioned(update_ids, storyline.id, at)))
    }
}
