//! Mood Effect Aggregator
//!
//! Each storyline pushes on the character's mood according to its phase:
//! `mood = mood_impact * intensity`, `energy = -0.1 * intensity` for draining
//! phases, `preoccupation = preoccupation_base * intensity`. Active storylines
//! and recently resolved ones (within the recall window) contribute.

use crate::types::{ContextConfig, MoodProfile};
use chrono::{DateTime, Duration, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use storyline_core::{PhaseTable, Result, Storyline, StorylinePhase, StorylineStore, Uuid};

/// Energy drained per unit of intensity in a draining phase
pub const ENERGY_DRAIN_PER_INTENSITY: f64 = 0.1;

/// Contribution of one storyline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodEffect {
    pub storyline_id: Uuid,
    pub title: String,
    pub phase: StorylinePhase,
    pub mood_delta: f64,
    pub energy_delta: f64,
    pub preoccupation: f64,
}

/// Combined effect of all contributing storylines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMoodEffect {
    /// Sum of mood deltas
    pub mood_delta: f64,
    /// Sum of energy deltas
    pub energy_delta: f64,
    /// Largest single preoccupation, capped at 1
    pub preoccupation: f64,
    pub storyline_count: usize,
    /// Storyline with the highest preoccupation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_storyline: Option<Uuid>,
    pub effects: Vec<MoodEffect>,
}

/// Per-storyline effects; pure
pub fn compute_effects(
    storylines: &[Storyline],
    profiles: &PhaseTable<MoodProfile>,
) -> Vec<MoodEffect> {
    storylines
        .iter()
        .map(|storyline| {
            let profile = profiles[storyline.phase];
            let intensity = storyline.emotional_intensity.clamp(0.0, 1.0);
            MoodEffect {
                storyline_id: storyline.id,
                title: storyline.title.clone(),
                phase: storyline.phase,
                mood_delta: profile.mood_impact * intensity,
                energy_delta: if profile.energy_draining {
                    -ENERGY_DRAIN_PER_INTENSITY * intensity
                } else {
                    0.0
                },
                preoccupation: profile.preoccupation_base * intensity,
            }
        })
        .collect()
}

/// Fold per-storyline effects into one
pub fn aggregate_effects(effects: Vec<MoodEffect>) -> AggregatedMoodEffect {
    let dominant = effects
        .iter()
        .max_by_key(|e| OrderedFloat(e.preoccupation))
        .map(|e| (e.storyline_id, e.preoccupation));

    AggregatedMoodEffect {
        // fold from +0.0; an empty f64 sum is -0.0
        mood_delta: effects.iter().fold(0.0, |acc, e| acc + e.mood_delta),
        energy_delta: effects.iter().fold(0.0, |acc, e| acc + e.energy_delta),
        preoccupation: dominant.map_or(0.0, |(_, p)| p.min(1.0)),
        storyline_count: effects.len(),
        dominant_storyline: dominant.map(|(id, _)| id),
        effects,
    }
}

/// Reads contributing storylines and computes their mood effect
pub struct MoodEffectAggregator {
    store: Arc<dyn StorylineStore>,
    profiles: PhaseTable<MoodProfile>,
    recall: Duration,
}

impl MoodEffectAggregator {
    pub fn new(
        store: Arc<dyn StorylineStore>,
        profiles: PhaseTable<MoodProfile>,
        context: &ContextConfig,
    ) -> Self {
        Self {
            store,
            profiles,
            recall: Duration::days(context.recall_days),
        }
    }

    /// Storylines that count toward mood at `now`
    pub async fn contributing_storylines(&self, now: DateTime<Utc>) -> Result<Vec<Storyline>> {
        let mut storylines = self.store.list_active_storylines().await?;
        let mut seen: HashSet<Uuid> = storylines.iter().map(|s| s.id).collect();
        for resolved in self.store.list_resolved_since(now - self.recall).await? {
            if seen.insert(resolved.id) {
                storylines.push(resolved);
            }
        }
        Ok(storylines)
    }

    /// Per-storyline effects at `now`
    pub async fn effects(&self, now: DateTime<Utc>) -> Result<Vec<MoodEffect>> {
        let storylines = self.contributing_storylines(now).await?;
        Ok(compute_effects(&storylines, &self.profiles))
    }

    /// Aggregated effect at `now`
    pub async fn aggregate(&self, now: DateTime<Utc>) -> Result<AggregatedMoodEffect> {
        let aggregated = aggregate_effects(self.effects(now).await?);
        tracing::debug!(
            mood_delta = aggregated.mood_delta,
            energy_delta = aggregated.energy_delta,
            storylines = aggregated.storyline_count,
            "Mood effects aggregated"
        );
        Ok(aggregated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PhaseTables;
    use chrono::TimeZone;
    use storyline_core::{
        InMemoryStore, StorylineCandidate, StorylineCategory, StorylineOutcome,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn storyline(title: &str, phase: StorylinePhase, intensity: f64) -> Storyline {
        let mut s = StorylineCandidate::new(title, StorylineCategory::Work)
            .with_emotion("nervous", intensity)
            .into_storyline(t0());
        s.phase = phase;
        s
    }

    #[test]
    fn test_effect_formula() {
        let profiles = PhaseTables::default().mood;
        let effects = compute_effects(
            &[
                storyline("New job", StorylinePhase::Reality, 0.8),
                storyline("Trip", StorylinePhase::Honeymoon, 0.5),
            ],
            &profiles,
        );

        assert!((effects[0].mood_delta - (-0.16)).abs() < 1e-9);
        assert!((effects[0].energy_delta - (-0.08)).abs() < 1e-9);
        assert!((effects[0].preoccupation - 0.48).abs() < 1e-9);

        assert!((effects[1].mood_delta - 0.25).abs() < 1e-9);
        assert_eq!(effects[1].energy_delta, 0.0);
    }

    #[test]
    fn test_aggregate_picks_dominant() {
        let profiles = PhaseTables::default().mood;
        let climax = storyline("Exam", StorylinePhase::Climax, 1.0);
        let effects = compute_effects(
            &[storyline("Trip", StorylinePhase::Honeymoon, 0.5), climax.clone()],
            &profiles,
        );
        let aggregated = aggregate_effects(effects);

        assert_eq!(aggregated.storyline_count, 2);
        assert_eq!(aggregated.dominant_storyline, Some(climax.id));
        assert!((aggregated.preoccupation - 0.9).abs() < 1e-9);
        assert!((aggregated.mood_delta - 0.15).abs() < 1e-9);

        assert_eq!(aggregate_effects(Vec::new()), AggregatedMoodEffect::default());
    }

    #[test]
    fn test_empty_aggregate_is_positive_zero() {
        let empty = aggregate_effects(Vec::new());
        assert!(empty.mood_delta.is_sign_positive());
        assert!(empty.energy_delta.is_sign_positive());
        assert_eq!(format!("{:.3}", empty.mood_delta), "0.000");
        assert_eq!(format!("{:.3}", empty.energy_delta), "0.000");
    }

    #[tokio::test]
    async fn test_resolved_success_adds_resolved_profile() {
        let store = Arc::new(InMemoryStore::new());
        let mut resolved = storyline("Got the job", StorylinePhase::Resolved, 0.5);
        resolved.outcome = Some(StorylineOutcome::Success);
        resolved.resolved_at = Some(t0());
        store.seed_storyline(resolved).unwrap();

        let aggregator = MoodEffectAggregator::new(
            store,
            PhaseTables::default().mood,
            &ContextConfig::default(),
        );
        let mood = aggregator.aggregate(t0() + Duration::days(1)).await.unwrap();

        // resolved profile: impact 0.2, not draining
        assert_eq!(mood.storyline_count, 1);
        assert!((mood.mood_delta - 0.1).abs() < 1e-9);
        assert!(mood.energy_delta.is_sign_positive() && mood.energy_delta == 0.0);
    }

    #[tokio::test]
    async fn test_recently_resolved_contribute_until_recall_ends() {
        let store = Arc::new(InMemoryStore::new());
        let mut resolved = storyline("Promotion", StorylinePhase::Resolved, 0.6);
        resolved.outcome = Some(StorylineOutcome::Success);
        resolved.resolved_at = Some(t0());
        store.seed_storyline(resolved.clone()).unwrap();
        store
            .seed_storyline(storyline("Move", StorylinePhase::Active, 0.5))
            .unwrap();

        let aggregator = MoodEffectAggregator::new(
            store,
            PhaseTables::default().mood,
            &ContextConfig::default(),
        );

        let soon = aggregator.aggregate(t0() + Duration::days(3)).await.unwrap();
        assert_eq!(soon.storyline_count, 2);

        let later = aggregator.aggregate(t0() + Duration::days(31)).await.unwrap();
        assert_eq!(later.storyline_count, 1);
    }
}
