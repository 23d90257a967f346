//! Text generation port
//!
//! Narrative content (progress updates, closure beats) comes from an external
//! generator. The engine sends a structured [`GenerationRequest`] and expects a
//! raw reply containing `{updateType, content, emotionalTone}`; parsing and
//! validation of that reply live with the caller.

use crate::types::{StorylineOutcome, StorylinePhase, UpdateType};
use crate::{Result, StorylineError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Context handed to the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub storyline_id: Uuid,
    pub title: String,
    pub category: String,
    pub phase: StorylinePhase,
    pub days_in_phase: i64,
    pub current_emotion: String,
    pub emotional_intensity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stakes: Option<String>,
    /// Up to the last three visible updates, oldest first
    pub recent_updates: Vec<String>,
    pub allowed_update_types: Vec<UpdateType>,
    /// Set when the caller needs one specific beat (closure sequences)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_update_type: Option<UpdateType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StorylineOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_description: Option<String>,
}

impl GenerationRequest {
    /// Render the request as a prompt for chat-style generators
    pub fn to_prompt(&self) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "You write short first-person updates about an ongoing situation in someone's life.\n\n",
        );
        prompt.push_str(&format!("Storyline: {} ({})\n", self.title, self.category));
        prompt.push_str(&format!(
            "Phase: {} (day {} of this phase)\n",
            self.phase, self.days_in_phase
        ));
        prompt.push_str(&format!(
            "Current feeling: {} (intensity {:.2})\n",
            self.current_emotion, self.emotional_intensity
        ));
        if let Some(stakes) = &self.stakes {
            prompt.push_str(&format!("Stakes: {}\n", stakes));
        }
        if let Some(outcome) = self.outcome {
            prompt.push_str(&format!("Outcome: {}", outcome));
            if let Some(description) = &self.outcome_description {
                prompt.push_str(&format!(" ({})", description));
            }
            prompt.push('\n');
        }
        if !self.recent_updates.is_empty() {
            prompt.push_str("\nRecent updates:\n");
            for update in &self.recent_updates {
                prompt.push_str(&format!("- {}\n", update));
            }
        }

        let allowed: Vec<&str> = match self.requested_update_type {
            Some(requested) => vec![requested.as_str()],
            None => self.allowed_update_types.iter().map(|t| t.as_str()).collect(),
        };
        prompt.push_str(&format!(
            "\nWrite the next update. Use one of these update types: {}.\n",
            allowed.join(", ")
        ));
        prompt.push_str(
            "Reply with JSON only: {\"updateType\": \"...\", \"content\": \"...\", \"emotionalTone\": \"...\"}\n",
        );
        prompt
    }
}

/// A reply that parsed into the expected shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedUpdate {
    pub update_type: UpdateType,
    pub content: String,
    pub emotional_tone: String,
}

/// External text generator
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce a raw reply for `request`
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Call the generator, turning an elapsed `timeout` into [`StorylineError::Timeout`]
pub async fn generate_with_timeout(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(reply) => reply,
        Err(_) => Err(StorylineError::timeout(format!(
            "generation for storyline {} exceeded {:?}",
            request.storyline_id, timeout
        ))),
    }
}

/// Generator used when no backend is configured; every call is unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGenerator;

#[async_trait]
impl TextGenerator for NoopGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Err(StorylineError::generation("no text generator configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            storyline_id: Uuid::new_v4(),
            title: "Learning guitar".into(),
            category: "personal".into(),
            phase: StorylinePhase::Reality,
            days_in_phase: 2,
            current_emotion: "frustrated".into(),
            emotional_intensity: 0.6,
            stakes: Some("A gig in spring".into()),
            recent_updates: vec!["Fingers hurt".into()],
            allowed_update_types: UpdateType::allowed_for(StorylinePhase::Reality).to_vec(),
            requested_update_type: None,
            outcome: None,
            outcome_description: None,
        }
    }

    #[test]
    fn test_prompt_mentions_context() {
        let prompt = request().to_prompt();
        assert!(prompt.contains("Learning guitar"));
        assert!(prompt.contains("Phase: reality (day 2"));
        assert!(prompt.contains("A gig in spring"));
        assert!(prompt.contains("- Fingers hurt"));
        assert!(prompt.contains("setback"));
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["daysInPhase"], 2);
        assert_eq!(json["phase"], "reality");
        assert!(json.get("outcome").is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        struct Slow;

        #[async_trait]
        impl TextGenerator for Slow {
            async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".into())
            }
        }

        let err = generate_with_timeout(&Slow, &request(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, StorylineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_mock_generator() {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate()
            .times(1)
            .returning(|_| Ok("{}".to_string()));

        let reply = generate_with_timeout(&mock, &request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "{}");
    }

    #[tokio::test]
    async fn test_noop_generator_is_unavailable() {
        let err = NoopGenerator.generate(&request()).await.unwrap_err();
        assert!(err.is_generation());
    }
}
