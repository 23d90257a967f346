//! Closure Sequence Builder
//!
//! Resolving a storyline happens in two writes:
//!
//! 1. active → `resolving` with outcome, description and resolution time
//! 2. closure updates plus `resolving` → `resolved`, committed together
//!
//! Closure update N (1-based) is revealed at `resolved_at + N days`. If the
//! process stops between the two writes, calling `resolve` again with the same
//! outcome finishes the job. A separate settle pass moves `resolved`
//! storylines to `reflecting` once their last closure update is visible.

use super::update_generator::{build_request, parse_generated_update};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storyline_core::{
    generate_with_timeout, Result, Storyline, StorylineError, StorylineOutcome, StorylinePhase,
    StorylineStore, StorylineUpdate, TextGenerator, UpdateType, Uuid,
};

/// Beats of a closure sequence for each outcome, in reveal order
pub fn closure_sequence(outcome: StorylineOutcome) -> [UpdateType; 4] {
    use UpdateType::*;
    match outcome {
        StorylineOutcome::Success => [OutcomeReaction, Gratitude, Reflection, LessonLearned],
        StorylineOutcome::Failure => [OutcomeReaction, Acceptance, Reflection, LessonLearned],
        StorylineOutcome::Mixed => [OutcomeReaction, Reflection, Gratitude, LessonLearned],
        StorylineOutcome::Abandoned => [OutcomeReaction, Relief, Reflection, LessonLearned],
    }
}

/// Template content used when the generator has nothing usable
pub fn template_content(
    title: &str,
    outcome: StorylineOutcome,
    update_type: UpdateType,
) -> (String, &'static str) {
    match (update_type, outcome) {
        (UpdateType::OutcomeReaction, StorylineOutcome::Success) => (
            format!("It actually happened. {} worked out!", title),
            "elated",
        ),
        (UpdateType::OutcomeReaction, StorylineOutcome::Failure) => (
            format!("{} didn't work out. Still taking that in.", title),
            "disappointed",
        ),
        (UpdateType::OutcomeReaction, StorylineOutcome::Mixed) => (
            format!("{} ended up somewhere in between. Some good, some not.", title),
            "ambivalent",
        ),
        (UpdateType::OutcomeReaction, StorylineOutcome::Abandoned) => (
            format!("I've decided to let {} go.", title),
            "resigned",
        ),
        (UpdateType::Gratitude, _) => (
            format!("Really grateful for everyone who helped with {}.", title),
            "grateful",
        ),
        (UpdateType::Acceptance, _) => (
            format!("I'm making peace with how {} turned out.", title),
            "calm",
        ),
        (UpdateType::Relief, _) => (
            format!("Honestly, stepping away from {} feels like a weight off.", title),
            "relieved",
        ),
        (UpdateType::LessonLearned, _) => (
            format!("If {} taught me anything, it's to trust the process.", title),
            "wise",
        ),
        _ => (
            format!("Been thinking back on {} a lot lately.", title),
            "reflective",
        ),
    }
}

/// What a resolution produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    /// Storyline as committed, phase `resolved`
    pub storyline: Storyline,
    /// Scheduled closure updates, in reveal order
    pub closure: Vec<StorylineUpdate>,
    /// How many came from the generator rather than templates
    pub generated: usize,
    /// Whether an interrupted resolution was completed
    pub resumed: bool,
}

/// Resolves storylines and schedules their closure
pub struct ClosureBuilder {
    store: Arc<dyn StorylineStore>,
    generator: Arc<dyn TextGenerator>,
    timeout: std::time::Duration,
    closure_length: usize,
}

impl ClosureBuilder {
    pub fn new(
        store: Arc<dyn StorylineStore>,
        generator: Arc<dyn TextGenerator>,
        timeout: std::time::Duration,
        closure_length: usize,
    ) -> Self {
        Self {
            store,
            generator,
            timeout,
            closure_length,
        }
    }

    /// Resolve storyline `id` with `outcome` at `now`
    pub async fn resolve(
        &self,
        id: Uuid,
        outcome: StorylineOutcome,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ResolutionReport> {
        let mut storyline = self
            .store
            .get_storyline(id)
            .await?
            .ok_or_else(|| StorylineError::not_found(format!("storyline {}", id)))?;

        let resumed = match (storyline.phase, storyline.outcome) {
            (StorylinePhase::Resolving, Some(existing)) if existing == outcome => true,
            (StorylinePhase::Resolving, Some(existing)) => {
                return Err(StorylineError::validation(format!(
                    "storyline {} is already resolving as '{}', not '{}'",
                    id, existing, outcome
                )));
            }
            (phase, _) if phase.is_closure_branch() => {
                return Err(StorylineError::validation(format!(
                    "storyline {} is already resolved ({})",
                    id, phase
                )));
            }
            _ => false,
        };

        if !resumed {
            storyline.outcome = Some(outcome);
            storyline.outcome_description = description;
            storyline.resolved_at = Some(now);
            storyline.transition_to(StorylinePhase::Resolving, now);
            if !self.store.update_storyline(&storyline).await? {
                return Err(StorylineError::conflict(format!(
                    "storyline {} changed while resolving",
                    id
                )));
            }
            storyline.version += 1;
            tracing::info!(storyline_id = %id, outcome = %outcome, "Storyline resolving");
        } else {
            if description.is_some() && storyline.outcome_description.is_none() {
                storyline.outcome_description = description;
            }
            tracing::info!(storyline_id = %id, outcome = %outcome, "Resuming interrupted resolution");
        }

        let resolved_at = storyline.resolved_at.unwrap_or(now);
        let (closure, generated) = self.build_closure(&storyline, outcome, resolved_at, now).await;

        storyline.transition_to(StorylinePhase::Resolved, now);
        if !self.store.commit_resolution(&storyline, &closure).await? {
            return Err(StorylineError::conflict(format!(
                "storyline {} changed before closure was committed",
                id
            )));
        }
        storyline.version += 1;

        tracing::info!(
            storyline_id = %id,
            outcome = %outcome,
            closure_updates = closure.len(),
            generated,
            "Storyline resolved"
        );
        Ok(ResolutionReport {
            storyline,
            closure,
            generated,
            resumed,
        })
    }

    async fn build_closure(
        &self,
        storyline: &Storyline,
        outcome: StorylineOutcome,
        resolved_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (Vec<StorylineUpdate>, usize) {
        let recent = match self.store.list_updates(storyline.id).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(storyline_id = %storyline.id, error = %e, "Could not read updates for closure context");
                Vec::new()
            }
        };

        let mut closure = Vec::with_capacity(self.closure_length);
        let mut generated = 0;
        for (n, update_type) in closure_sequence(outcome)
            .into_iter()
            .take(self.closure_length)
            .enumerate()
        {
            let (content, tone) = match self.generate_beat(storyline, &recent, update_type, now).await
            {
                Some(beat) => {
                    generated += 1;
                    beat
                }
                None => {
                    let (content, tone) = template_content(&storyline.title, outcome, update_type);
                    (content, tone.to_string())
                }
            };
            closure.push(
                StorylineUpdate::new(storyline.id, update_type, content, tone, now)
                    .revealed_at(resolved_at + Duration::days(n as i64 + 1)),
            );
        }
        (closure, generated)
    }

    async fn generate_beat(
        &self,
        storyline: &Storyline,
        recent: &[StorylineUpdate],
        update_type: UpdateType,
        now: DateTime<Utc>,
    ) -> Option<(String, String)> {
        let mut request = build_request(storyline, recent, now);
        request.requested_update_type = Some(update_type);

        let reply = generate_with_timeout(self.generator.as_ref(), &request, self.timeout)
            .await
            .and_then(|raw| parse_generated_update(&raw));
        match reply {
            Ok(beat) if beat.update_type == update_type => Some((beat.content, beat.emotional_tone)),
            Ok(beat) => {
                tracing::debug!(
                    storyline_id = %storyline.id,
                    wanted = %update_type,
                    got = %beat.update_type,
                    "Closure beat had the wrong type, using template"
                );
                None
            }
            Err(e) => {
                tracing::debug!(
                    storyline_id = %storyline.id,
                    update_type = %update_type,
                    error = %e,
                    "Closure beat unavailable, using template"
                );
                None
            }
        }
    }

    /// Move `resolved` storylines whose closure is fully visible to `reflecting`.
    ///
    /// Returns how many moved; per-storyline failures are logged.
    pub async fn settle_resolved(&self, now: DateTime<Utc>) -> Result<usize> {
        let resolved = self
            .store
            .list_storylines_in_phase(StorylinePhase::Resolved)
            .await?;

        let mut settled = 0;
        for storyline in resolved {
            match self.settle_one(storyline, now).await {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to settle resolved storyline"),
            }
        }
        Ok(settled)
    }

    async fn settle_one(&self, mut storyline: Storyline, now: DateTime<Utc>) -> Result<bool> {
        let updates = self.store.list_updates(storyline.id).await?;
        let last_reveal = updates.iter().filter_map(|u| u.reveal_at).max();
        let ready = match last_reveal {
            Some(at) => at <= now,
            None => storyline.phase_started_at <= now,
        };
        if !ready {
            return Ok(false);
        }

        let id = storyline.id;
        storyline.transition_to(StorylinePhase::Reflecting, now);
        let moved = self.store.update_storyline(&storyline).await?;
        if moved {
            tracing::info!(storyline_id = %id, "Storyline moved to reflecting");
        }
        Ok(moved)
    }
}
