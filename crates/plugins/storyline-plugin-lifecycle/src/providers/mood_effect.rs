//! Mood Effect Provider
//!
//! Hands the aggregated storyline pressure on mood and energy to the mood
//! engine. The consumer folds the deltas into its own state and clamps them.

use crate::services::StorylineEngine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use storyline_core::{Provider, ProviderResult, Result, State};

/// Provides storyline mood and energy deltas
pub struct MoodEffectProvider {
    engine: Arc<StorylineEngine>,
}

impl MoodEffectProvider {
    pub fn new(engine: Arc<StorylineEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Provider for MoodEffectProvider {
    fn name(&self) -> &str {
        "storyline_mood"
    }

    fn description(&self) -> Option<String> {
        Some("Provides mood, energy and preoccupation pressure from ongoing storylines".to_string())
    }

    fn position(&self) -> i32 {
        -4 // before the context block so mood is settled first
    }

    async fn get(&self, _state: &State) -> Result<ProviderResult> {
        let mood = self.engine.mood().await?;

        let text = if mood.storyline_count == 0 {
            None
        } else {
            Some(format!(
                "Storylines weigh on mood by {:+.2} and energy by {:+.2} (preoccupation {:.2})",
                mood.mood_delta, mood.energy_delta, mood.preoccupation
            ))
        };

        let mut values = HashMap::new();
        values.insert(
            "STORYLINE_MOOD_DELTA".to_string(),
            format!("{:.3}", mood.mood_delta),
        );
        values.insert(
            "STORYLINE_ENERGY_DELTA".to_string(),
            format!("{:.3}", mood.energy_delta),
        );
        values.insert(
            "STORYLINE_PREOCCUPATION".to_string(),
            format!("{:.3}", mood.preoccupation),
        );

        let mut data = HashMap::new();
        data.insert("storyline_mood".to_string(), serde_json::to_value(&mood)?);

        tracing::debug!(
            mood_delta = mood.mood_delta,
            energy_delta = mood.energy_delta,
            storylines = mood.storyline_count,
            "MoodEffectProvider: Providing storyline mood pressure"
        );

        Ok(ProviderResult {
            text,
            values: Some(values),
            data: Some(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LifecycleConfig;
    use chrono::{TimeZone, Utc};
    use storyline_core::{
        InMemoryStore, ManualClock, NoopGenerator, StorylineCandidate, StorylineCategory,
    };

    #[tokio::test]
    async fn test_reports_deltas() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap(),
        ));
        let engine = Arc::new(
            StorylineEngine::new(
                Arc::new(InMemoryStore::new()),
                Arc::new(NoopGenerator),
                clock,
                LifecycleConfig::default(),
            )
            .unwrap(),
        );
        let provider = MoodEffectProvider::new(engine.clone());

        let empty = provider.get(&State::new()).await.unwrap();
        assert!(empty.text.is_none());
        assert_eq!(empty.values.unwrap()["STORYLINE_MOOD_DELTA"], "0.000");

        engine
            .attempt_create(
                StorylineCandidate::new("Concert tickets", StorylineCategory::Creative)
                    .with_emotion("thrilled", 1.0),
            )
            .await
            .unwrap();

        // announced: impact 0.3, not draining, preoccupation 0.6
        let result = provider.get(&State::new()).await.unwrap();
        let values = result.values.unwrap();
        assert_eq!(values["STORYLINE_MOOD_DELTA"], "0.300");
        assert_eq!(values["STORYLINE_ENERGY_DELTA"], "0.000");
        assert_eq!(values["STORYLINE_PREOCCUPATION"], "0.600");
        assert!(result.text.is_some());
    }
}
