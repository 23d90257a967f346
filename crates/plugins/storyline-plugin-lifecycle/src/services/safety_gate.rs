//! Safety Gate
//!
//! Guards every creation entry point. Checks run in order and stop at the first
//! rejection:
//!
//! 1. cooldown since the last successful creation (fails open)
//! 2. duplicate title within the category and dedupe window (fails open)
//! 3. active storyline limit (fails closed)
//!
//! An accepted candidate is committed together with the cooldown marker and the
//! success audit row; the marker write is a compare-and-swap against the value
//! read in step 1, so two racing creators cannot both get through.

use crate::types::SafetyGateConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use storyline_core::{
    Clock, CreationAttempt, FailureReason, Precondition, RejectionDiagnostics, Result, Storyline,
    StorylineCandidate, StorylineStore,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Why and with what evidence a candidate was turned down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Which check failed
    pub reason: FailureReason,
    /// Evidence for the caller to surface
    pub diagnostics: RejectionDiagnostics,
}

/// Result of a creation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CreationOutcome {
    /// The storyline was created
    Accepted {
        /// New storyline id
        storyline_id: Uuid,
    },
    /// A policy check said no; the caller must not retry automatically
    Rejected(Rejection),
}

impl CreationOutcome {
    /// Id of the created storyline, if accepted
    pub fn storyline_id(&self) -> Option<Uuid> {
        match self {
            CreationOutcome::Accepted { storyline_id } => Some(*storyline_id),
            CreationOutcome::Rejected(_) => None,
        }
    }

    /// Rejection details, if rejected
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            CreationOutcome::Accepted { .. } => None,
            CreationOutcome::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Jaccard overlap of the lowercase whitespace-separated word sets of two titles.
///
/// Two empty titles have no union and score 0.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    fn words(s: &str) -> HashSet<String> {
        s.split_whitespace().map(|w| w.to_lowercase()).collect()
    }

    let a = words(a);
    let b = words(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Whole hours left until `last + window`, rounded up and never below 1
fn hours_remaining(last: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> i64 {
    let left = (last + window - now).num_seconds();
    ((left + 3599).div_euclid(3600)).max(1)
}

/// Validates creation requests against cooldown, duplicate and concurrency limits
pub struct SafetyGate {
    store: Arc<dyn StorylineStore>,
    clock: Arc<dyn Clock>,
    config: SafetyGateConfig,
    creation_lock: Mutex<()>,
}

impl SafetyGate {
    /// Create a gate over `store`
    pub fn new(
        store: Arc<dyn StorylineStore>,
        clock: Arc<dyn Clock>,
        config: SafetyGateConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            creation_lock: Mutex::new(()),
        }
    }

    /// Gate settings
    pub fn config(&self) -> &SafetyGateConfig {
        &self.config
    }

    /// Try to create a storyline from `candidate`.
    ///
    /// Policy rejections are `Ok(CreationOutcome::Rejected(..))`. `Err` means the
    /// candidate itself was invalid or the final commit could not be written, in
    /// which case nothing was persisted.
    pub async fn attempt_create(&self, candidate: StorylineCandidate) -> Result<CreationOutcome> {
        candidate.validate()?;

        // Serializes creators within this process; the marker CAS covers the rest
        let _guard = self.creation_lock.lock().await;
        let now = self.clock.now();

        let cooldown = match self.check_cooldown(now).await {
            Ok(CooldownCheck::Clear(marker)) => Precondition::Equals(marker),
            Ok(CooldownCheck::Blocked(diagnostics)) => {
                return Ok(self
                    .reject(&candidate, FailureReason::Cooldown, diagnostics, now)
                    .await);
            }
            Err(e) => {
                tracing::warn!(
                    title = %candidate.title,
                    error = %e,
                    "Cooldown check unavailable, allowing creation"
                );
                Precondition::Any
            }
        };

        match self.find_duplicate(&candidate, now).await {
            Ok(Some(diagnostics)) => {
                return Ok(self
                    .reject(&candidate, FailureReason::Duplicate, diagnostics, now)
                    .await);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    title = %candidate.title,
                    error = %e,
                    "Duplicate check unavailable, allowing creation"
                );
            }
        }

        match self.store.list_active_storylines().await {
            Ok(active) => {
                if let Some(diagnostics) = self.active_limit_hit(&candidate, &active) {
                    return Ok(self
                        .reject(&candidate, FailureReason::ActiveLimit, diagnostics, now)
                        .await);
                }
            }
            Err(e) => {
                let diagnostics = RejectionDiagnostics {
                    detail: Some(e.to_string()),
                    ..Default::default()
                };
                return Ok(self
                    .reject(&candidate, FailureReason::StorageUnavailable, diagnostics, now)
                    .await);
            }
        }

        let source = candidate.source;
        let storyline = candidate.clone().into_storyline(now);
        let attempt = CreationAttempt::accepted(
            storyline.title.clone(),
            storyline.category,
            source,
            storyline.id,
            now,
        );

        if !self
            .store
            .commit_creation(&storyline, &attempt, cooldown)
            .await?
        {
            // Another creator moved the cooldown marker between our read and commit
            tracing::warn!(title = %candidate.title, "Cooldown marker changed during creation");
            let window = Duration::hours(self.config.cooldown_hours);
            let hours = match self.store.get_cooldown_marker().await {
                Ok(Some(last)) => hours_remaining(last, window, now),
                _ => self.config.cooldown_hours.max(1),
            };
            let diagnostics = RejectionDiagnostics {
                hours_remaining: Some(hours),
                detail: Some("concurrent creation".to_string()),
                ..Default::default()
            };
            return Ok(self
                .reject(&candidate, FailureReason::Cooldown, diagnostics, now)
                .await);
        }

        tracing::info!(
            storyline_id = %storyline.id,
            title = %storyline.title,
            category = %storyline.category,
            source = %source,
            "Storyline created"
        );
        Ok(CreationOutcome::Accepted {
            storyline_id: storyline.id,
        })
    }

    async fn check_cooldown(&self, now: DateTime<Utc>) -> Result<CooldownCheck> {
        let marker = self.store.get_cooldown_marker().await?;
        let window = Duration::hours(self.config.cooldown_hours);
        match marker {
            Some(last) if now - last < window => Ok(CooldownCheck::Blocked(RejectionDiagnostics {
                hours_remaining: Some(hours_remaining(last, window, now)),
                ..Default::default()
            })),
            _ => Ok(CooldownCheck::Clear(marker)),
        }
    }

    async fn find_duplicate(
        &self,
        candidate: &StorylineCandidate,
        now: DateTime<Utc>,
    ) -> Result<Option<RejectionDiagnostics>> {
        let since = now - Duration::days(self.config.dedupe_window_days);
        let recent = self
            .store
            .list_storylines_created_since(since, Some(candidate.category))
            .await?;

        let best = recent
            .iter()
            .filter(|s| s.category == candidate.category)
            .map(|s| (s, word_overlap(&candidate.title, &s.title)))
            .filter(|(_, similarity)| *similarity >= self.config.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        Ok(best.map(|(existing, similarity)| RejectionDiagnostics {
            duplicate_of: Some(existing.id),
            duplicate_title: Some(existing.title.clone()),
            similarity: Some(similarity),
            ..Default::default()
        }))
    }

    fn active_limit_hit(
        &self,
        candidate: &StorylineCandidate,
        active: &[Storyline],
    ) -> Option<RejectionDiagnostics> {
        let oldest = |mut it: Vec<&Storyline>| {
            it.sort_by_key(|s| s.created_at);
            it.first().map(|s| s.id)
        };

        if active.len() >= self.config.max_active {
            return Some(RejectionDiagnostics {
                blocking_id: oldest(active.iter().collect()),
                detail: Some(format!("{} active of {}", active.len(), self.config.max_active)),
                ..Default::default()
            });
        }

        if let Some(limit) = self.config.max_active_per_category {
            let same: Vec<&Storyline> = active
                .iter()
                .filter(|s| s.category == candidate.category)
                .collect();
            if same.len() >= limit {
                let count = same.len();
                return Some(RejectionDiagnostics {
                    blocking_id: oldest(same),
                    detail: Some(format!(
                        "{} active in {} of {}",
                        count, candidate.category, limit
                    )),
                    ..Default::default()
                });
            }
        }

        None
    }

    async fn reject(
        &self,
        candidate: &StorylineCandidate,
        reason: FailureReason,
        diagnostics: RejectionDiagnostics,
        now: DateTime<Utc>,
    ) -> CreationOutcome {
        let attempt = CreationAttempt::rejected(
            candidate.title.clone(),
            candidate.category,
            candidate.source,
            reason,
            diagnostics.clone(),
            now,
        );
        if let Err(e) = self.store.append_creation_attempt(&attempt).await {
            tracing::warn!(error = %e, "Failed to record rejected creation attempt");
        }

        tracing::info!(
            title = %candidate.title,
            category = %candidate.category,
            reason = %reason,
            hours_remaining = ?diagnostics.hours_remaining,
            duplicate_of = ?diagnostics.duplicate_of,
            blocking_id = ?diagnostics.blocking_id,
            "Storyline creation rejected"
        );
        CreationOutcome::Rejected(Rejection {
            reason,
            diagnostics,
        })
    }
}

enum CooldownCheck {
    Clear(Option<DateTime<Utc>>),
    Blocked(RejectionDiagnostics),
}
