//! Storyline Context Provider
//!
//! Injects the ranked storyline block into prompts.

use crate::services::StorylineEngine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use storyline_core::{Provider, ProviderResult, Result, State};

/// State value that overrides the configured top-K for one call
pub const CONTEXT_LIMIT_KEY: &str = "STORYLINE_CONTEXT_LIMIT";

/// Provides ranked storylines and their visible updates
pub struct StorylineContextProvider {
    engine: Arc<StorylineEngine>,
}

impl StorylineContextProvider {
    pub fn new(engine: Arc<StorylineEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Provider for StorylineContextProvider {
    fn name(&self) -> &str {
        "storyline_context"
    }

    fn description(&self) -> Option<String> {
        Some("Provides ongoing storylines ranked by salience".to_string())
    }

    fn position(&self) -> i32 {
        -3
    }

    async fn get(&self, state: &State) -> Result<ProviderResult> {
        let limit = match state.get_value(CONTEXT_LIMIT_KEY) {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => Some(limit),
                _ => {
                    tracing::warn!(value = %raw, "Ignoring invalid {}", CONTEXT_LIMIT_KEY);
                    None
                }
            },
            None => None,
        };

        let context = self.engine.build_context(limit).await?;
        let block = context.to_prompt_block();

        let titles: Vec<&str> = context
            .ranked_storylines
            .iter()
            .map(|r| r.storyline.title.as_str())
            .collect();

        let mut values = HashMap::new();
        values.insert("STORYLINE_CONTEXT".to_string(), block.clone());
        values.insert(
            "STORYLINE_HAS_ACTIVE".to_string(),
            context.has_active.to_string(),
        );
        values.insert(
            "STORYLINE_COUNT".to_string(),
            context.ranked_storylines.len().to_string(),
        );
        values.insert("STORYLINE_TITLES".to_string(), titles.join(", "));
        values.insert(
            "STORYLINE_UNREVEALED_COUNT".to_string(),
            context.unrevealed_updates.len().to_string(),
        );

        let mut data = HashMap::new();
        data.insert(
            "storylines".to_string(),
            serde_json::to_value(&context.ranked_storylines)?,
        );
        data.insert(
            "unrevealed_updates".to_string(),
            serde_json::to_value(&context.unrevealed_updates)?,
        );

        tracing::debug!(
            ranked = context.ranked_storylines.len(),
            has_active = context.has_active,
            "StorylineContextProvider: Providing storyline context"
        );

        Ok(ProviderResult {
            text: (!block.is_empty()).then_some(block),
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

    async fn provider_with(titles: &[&str]) -> StorylineContextProvider {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap(),
        ));
        let mut config = LifecycleConfig::default();
        config.gate.cooldown_hours = 0;
        config.gate.max_active = 10;
        let engine = StorylineEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(NoopGenerator),
            clock,
            config,
        )
        .unwrap();
        for (i, title) in titles.iter().enumerate() {
            let category = StorylineCategory::ALL[i % StorylineCategory::ALL.len()];
            engine
                .attempt_create(StorylineCandidate::new(*title, category))
                .await
                .unwrap();
        }
        StorylineContextProvider::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_empty_context() {
        let provider = provider_with(&[]).await;
        let result = provider.get(&State::new()).await.unwrap();
        assert!(result.text.is_none());
        let values = result.values.unwrap();
        assert_eq!(values["STORYLINE_HAS_ACTIVE"], "false");
        assert_eq!(values["STORYLINE_COUNT"], "0");
    }

    #[tokio::test]
    async fn test_limit_from_state() {
        let provider = provider_with(&["Pottery class", "Half marathon", "Job hunt"]).await;

        let result = provider.get(&State::new()).await.unwrap();
        assert_eq!(result.values.unwrap()["STORYLINE_COUNT"], "3");
        assert!(result.text.unwrap().contains("Pottery class"));

        let mut state = State::new();
        state.set_value(CONTEXT_LIMIT_KEY, "2");
        let result = provider.get(&state).await.unwrap();
        assert_eq!(result.values.unwrap()["STORYLINE_COUNT"], "2");

        state.set_value(CONTEXT_LIMIT_KEY, "lots");
        let result = provider.get(&state).await.unwrap();
        assert_eq!(result.values.unwrap()["STORYLINE_COUNT"], "3");
    }
}
