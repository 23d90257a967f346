//! Phase Transition Scheduler
//!
//! Moves active storylines along announced → honeymoon → reality → active →
//! climax. For each storyline the rule of its current phase decides:
//!
//! - `days_in_phase >= max_days`: forced transition
//! - `days_in_phase >= min_days`: one Bernoulli trial with `daily_probability`
//! - otherwise nothing
//!
//! One pass is one trial per storyline, so passes must run once per calendar
//! day (the catch-up runner guarantees that). A daily pass also leaves alone
//! any storyline that already changed phase on the day being processed, so a
//! replayed day never advances a storyline twice. The closure branch is never
//! entered from here.

use crate::types::{PhaseTables, TransitionRule};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use storyline_core::{PhaseTable, Result, Storyline, StorylinePhase, StorylineStore};

/// What a rule says about one storyline at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Stay in the current phase
    Stay,
    /// `max_days` reached
    Forced(StorylinePhase),
    /// The daily trial succeeded
    Probabilistic(StorylinePhase),
}

impl TransitionDecision {
    /// Target phase, if any
    pub fn target(self) -> Option<StorylinePhase> {
        match self {
            TransitionDecision::Stay => None,
            TransitionDecision::Forced(p) | TransitionDecision::Probabilistic(p) => Some(p),
        }
    }
}

/// Decide whether `storyline` leaves its phase at `now`.
///
/// The RNG is only consulted when the storyline is inside the probabilistic
/// window, so forced and too-early cases are deterministic.
pub fn evaluate_transition<R: Rng>(
    storyline: &Storyline,
    rules: &PhaseTable<Option<TransitionRule>>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> TransitionDecision {
    if !storyline.is_active() || storyline.phase.is_closure_branch() {
        return TransitionDecision::Stay;
    }
    let Some(rule) = rules[storyline.phase] else {
        return TransitionDecision::Stay;
    };

    let days = storyline.days_in_phase(now);
    if days >= rule.max_days {
        TransitionDecision::Forced(rule.next_phase)
    } else if days >= rule.min_days && rng.gen_bool(rule.daily_probability.clamp(0.0, 1.0)) {
        TransitionDecision::Probabilistic(rule.next_phase)
    } else {
        TransitionDecision::Stay
    }
}

/// Whether `storyline` entered its current phase by a transition at or after `since`.
/// Creation sets the first phase and does not count.
fn advanced_since(storyline: &Storyline, since: DateTime<Utc>) -> bool {
    storyline.phase_started_at >= since && storyline.phase_started_at > storyline.created_at
}

/// Counters from one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerPassReport {
    /// Storylines looked at
    pub examined: usize,
    /// Transitions forced by `max_days`
    pub forced: usize,
    /// Transitions won by the daily trial
    pub probabilistic: usize,
    /// Storylines another writer changed first
    pub conflicts: usize,
    /// Storylines whose write failed
    pub failed: usize,
    /// Storylines skipped because they already moved on this day
    #[serde(default)]
    pub already_advanced: usize,
}

impl SchedulerPassReport {
    /// Total transitions applied
    pub fn transitions(&self) -> usize {
        self.forced + self.probabilistic
    }
}

/// Advances active storylines' phases
pub struct PhaseScheduler {
    store: Arc<dyn StorylineStore>,
    tables: Arc<PhaseTables>,
    rng: Mutex<StdRng>,
}

impl PhaseScheduler {
    /// Create a scheduler; a seed makes the trials reproducible
    pub fn new(store: Arc<dyn StorylineStore>, tables: Arc<PhaseTables>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            tables,
            rng: Mutex::new(rng),
        }
    }

    fn decide(&self, storyline: &Storyline, now: DateTime<Utc>) -> TransitionDecision {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        evaluate_transition(storyline, &self.tables.transitions, now, &mut *rng)
    }

    /// Run one pass over all active storylines at tick instant `now`.
    ///
    /// `Err` only when the active set cannot be read; per-storyline failures are
    /// counted in the report.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<SchedulerPassReport> {
        self.pass(now, None).await
    }

    /// Run the pass for the calendar day starting at `day_start`, ticking at `now`.
    ///
    /// Storylines that entered their phase by a transition at or after
    /// `day_start` are skipped.
    pub async fn run_daily_pass(
        &self,
        now: DateTime<Utc>,
        day_start: DateTime<Utc>,
    ) -> Result<SchedulerPassReport> {
        self.pass(now, Some(day_start)).await
    }

    async fn pass(
        &self,
        now: DateTime<Utc>,
        day_start: Option<DateTime<Utc>>,
    ) -> Result<SchedulerPassReport> {
        let storylines = self.store.list_active_storylines().await?;
        let mut report = SchedulerPassReport::default();

        for storyline in storylines {
            report.examined += 1;

            if storyline.phase_started_at > now {
                tracing::debug!(
                    storyline_id = %storyline.id,
                    phase_started_at = %storyline.phase_started_at,
                    "Phase started after tick instant, skipping"
                );
                continue;
            }

            if day_start.is_some_and(|start| advanced_since(&storyline, start)) {
                report.already_advanced += 1;
                tracing::debug!(
                    storyline_id = %storyline.id,
                    phase = %storyline.phase,
                    "Storyline already advanced this day, skipping"
                );
                continue;
            }

            let decision = self.decide(&storyline, now);
            let Some(next) = decision.target() else {
                continue;
            };

            match self.apply(&storyline, next, now).await {
                Ok(true) => {
                    match decision {
                        TransitionDecision::Forced(_) => report.forced += 1,
                        _ => report.probabilistic += 1,
                    }
                    tracing::info!(
                        storyline_id = %storyline.id,
                        from = %storyline.phase,
                        to = %next,
                        days_in_phase = storyline.days_in_phase(now),
                        forced = matches!(decision, TransitionDecision::Forced(_)),
                        "Storyline phase advanced"
                    );
                }
                Ok(false) => report.conflicts += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        storyline_id = %storyline.id,
                        error = %e,
                        "Failed to advance storyline phase"
                    );
                }
            }
        }

        tracing::debug!(
            examined = report.examined,
            transitions = report.transitions(),
            conflicts = report.conflicts,
            "Scheduler pass finished"
        );
        Ok(report)
    }

    /// Write the transition; on a version conflict re-read once and retry only
    /// if the storyline is still active in the phase the decision was made for.
    async fn apply(
        &self,
        storyline: &Storyline,
        next: StorylinePhase,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut updated = storyline.clone();
        updated.transition_to(next, now);
        if self.store.update_storyline(&updated).await? {
            return Ok(true);
        }

        let Some(fresh) = self.store.get_storyline(storyline.id).await? else {
            return Ok(false);
        };
        if fresh.phase != storyline.phase || !fresh.is_active() {
            tracing::debug!(
                storyline_id = %storyline.id,
                phase = %fresh.phase,
                "Storyline changed under the scheduler, leaving it alone"
            );
            return Ok(false);
        }

        let mut retried = fresh;
        retried.transition_to(next, now);
        let applied = self.store.update_storyline(&retried).await?;
        if !applied {
            tracing::warn!(storyline_id = %storyline.id, "Phase transition lost a second race");
        }
        Ok(applied)
    }
}
