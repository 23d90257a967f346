//! Update Generator Adapter
//!
//! Asks the external text generator for the next narrative beat of a storyline
//! when the phase's minimum interval since the last update has passed. Any
//! failure (timeout, transport error, malformed reply, wrong update type,
//! storage error) is logged and turns into "no update this cycle".

use crate::types::PhaseTables;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use storyline_core::{
    generate_with_timeout, GeneratedUpdate, GenerationRequest, Result, Storyline, StorylineError,
    StorylinePhase, StorylineStore, StorylineUpdate, TextGenerator, UpdateType,
};

/// Number of recent visible updates sent as context
pub const RECENT_UPDATE_CONTEXT: usize = 3;

static REPLY_OBJECT: OnceLock<Regex> = OnceLock::new();

/// Outermost `{...}` span of a reply, compiled once
fn reply_object() -> Result<&'static Regex> {
    if let Some(pattern) = REPLY_OBJECT.get() {
        return Ok(pattern);
    }
    let pattern = Regex::new(r"(?s)\{.*\}")
        .map_err(|e| StorylineError::other(format!("reply pattern: {}", e)))?;
    Ok(REPLY_OBJECT.get_or_init(|| pattern))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReply {
    #[serde(alias = "update_type", alias = "type")]
    update_type: String,
    content: String,
    #[serde(alias = "emotional_tone", alias = "tone")]
    emotional_tone: String,
}

/// Pull the first JSON object out of a generator reply and check its shape.
///
/// Replies wrapped in prose or code fences are accepted as long as they contain
/// one object with `updateType`, `content` and `emotionalTone`.
pub fn parse_generated_update(raw: &str) -> Result<GeneratedUpdate> {
    let json = reply_object()?
        .find(raw)
        .map(|m| m.as_str())
        .ok_or_else(|| StorylineError::generation("reply contains no JSON object"))?;

    let reply: RawReply = serde_json::from_str(json)
        .map_err(|e| StorylineError::generation(format!("malformed reply: {}", e)))?;

    let update_type = reply
        .update_type
        .parse::<UpdateType>()
        .map_err(|e| StorylineError::generation(e.to_string()))?;
    let content = reply.content.trim().to_string();
    if content.is_empty() {
        return Err(StorylineError::generation("reply content is empty"));
    }
    let emotional_tone = reply.emotional_tone.trim().to_lowercase();
    if emotional_tone.is_empty() {
        return Err(StorylineError::generation("reply tone is empty"));
    }

    Ok(GeneratedUpdate {
        update_type,
        content,
        emotional_tone,
    })
}

/// Build the context payload for `storyline` at `now`
pub fn build_request(
    storyline: &Storyline,
    recent: &[StorylineUpdate],
    now: DateTime<Utc>,
) -> GenerationRequest {
    let visible: Vec<&StorylineUpdate> = recent.iter().filter(|u| u.is_visible(now)).collect();
    let skip = visible.len().saturating_sub(RECENT_UPDATE_CONTEXT);

    GenerationRequest {
        storyline_id: storyline.id,
        title: storyline.title.clone(),
        category: storyline.category.to_string(),
        phase: storyline.phase,
        days_in_phase: storyline.days_in_phase(now).max(0),
        current_emotion: storyline.emotional_tone.clone(),
        emotional_intensity: storyline.emotional_intensity,
        stakes: storyline.stakes.clone(),
        recent_updates: visible
            .into_iter()
            .skip(skip)
            .map(|u| format!("[{}] {}", u.update_type, u.content))
            .collect(),
        allowed_update_types: UpdateType::allowed_for(storyline.phase).to_vec(),
        requested_update_type: None,
        outcome: storyline.outcome,
        outcome_description: storyline.outcome_description.clone(),
    }
}

/// Counters from one generator pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorPassReport {
    /// Storylines looked at
    pub examined: usize,
    /// Updates written
    pub generated: usize,
}

/// Requests narrative content from the generator and persists it
pub struct UpdateGenerator {
    store: Arc<dyn StorylineStore>,
    generator: Arc<dyn TextGenerator>,
    tables: Arc<PhaseTables>,
    timeout: std::time::Duration,
}

impl UpdateGenerator {
    /// Create an adapter
    pub fn new(
        store: Arc<dyn StorylineStore>,
        generator: Arc<dyn TextGenerator>,
        tables: Arc<PhaseTables>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            generator,
            tables,
            timeout,
        }
    }

    /// Generate and store the next update if one is due; never fails.
    pub async fn maybe_generate_update(
        &self,
        storyline: &Storyline,
        now: DateTime<Utc>,
    ) -> Option<StorylineUpdate> {
        match self.try_generate(storyline, now).await {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(
                    storyline_id = %storyline.id,
                    phase = %storyline.phase,
                    error = %e,
                    "No storyline update this cycle"
                );
                None
            }
        }
    }

    async fn try_generate(
        &self,
        storyline: &Storyline,
        now: DateTime<Utc>,
    ) -> Result<Option<StorylineUpdate>> {
        let interval = Duration::days(self.tables.update_interval_days[storyline.phase]);
        if let Some(latest) = self.store.latest_update(storyline.id).await? {
            if now - latest.created_at < interval {
                tracing::debug!(
                    storyline_id = %storyline.id,
                    phase = %storyline.phase,
                    "Update interval not reached"
                );
                return Ok(None);
            }
        }

        let updates = self.store.list_updates(storyline.id).await?;
        let request = build_request(storyline, &updates, now);
        let reply = generate_with_timeout(self.generator.as_ref(), &request, self.timeout).await?;
        let generated = parse_generated_update(&reply)?;

        if !generated.update_type.is_allowed_in(storyline.phase) {
            return Err(StorylineError::generation(format!(
                "update type '{}' not allowed in phase '{}'",
                generated.update_type, storyline.phase
            )));
        }

        let update = StorylineUpdate::new(
            storyline.id,
            generated.update_type,
            generated.content,
            generated.emotional_tone,
            now,
        );
        self.store.insert_update(&update).await?;

        tracing::info!(
            storyline_id = %storyline.id,
            update_id = %update.id,
            update_type = %update.update_type,
            "Storyline update generated"
        );
        Ok(Some(update))
    }

    /// One pass over active storylines plus those in the reflecting long tail.
    ///
    /// `Err` only when the storyline set cannot be read.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<GeneratorPassReport> {
        let mut storylines = self.store.list_active_storylines().await?;
        storylines.extend(
            self.store
                .list_storylines_in_phase(StorylinePhase::Reflecting)
                .await?,
        );

        let mut report = GeneratorPassReport::default();
        for storyline in &storylines {
            if storyline.phase_started_at > now {
                continue;
            }
            report.examined += 1;
            if self.maybe_generate_update(storyline, now).await.is_some() {
                report.generated += 1;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use storyline_core::{InMemoryStore, MockTextGenerator, StorylineCandidate, StorylineCategory};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 18, 0, 0).unwrap()
    }

    fn setup(
        generator: MockTextGenerator,
    ) -> (UpdateGenerator, Arc<InMemoryStore>, Storyline) {
        let store = Arc::new(InMemoryStore::new());
        let storyline = StorylineCandidate::new("Learning guitar", StorylineCategory::Personal)
            .with_stakes("Playing at a friend's wedding")
            .into_storyline(t0());
        store.seed_storyline(storyline.clone()).unwrap();

        let adapter = UpdateGenerator::new(
            store.clone(),
            Arc::new(generator),
            Arc::new(PhaseTables::default()),
            std::time::Duration::from_secs(1),
        );
        (adapter, store, storyline)
    }

    #[test]
    fn test_parse_accepts_wrapped_json() {
        let raw = "Sure!\n```json\n{\"updateType\": \"Initial Reaction\", \"content\": \"I signed up!\", \"emotionalTone\": \"Giddy\"}\n```";
        let parsed = parse_generated_update(raw).unwrap();
        assert_eq!(parsed.update_type, UpdateType::InitialReaction);
        assert_eq!(parsed.content, "I signed up!");
        assert_eq!(parsed.emotional_tone, "giddy");
    }

    #[test]
    fn test_reply_pattern_is_compiled_once() {
        let first = reply_object().unwrap();
        let second = reply_object().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(parse_generated_update(r#"{"type":"worry","content":"a","tone":"b"}"#).is_ok());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_generated_update("no json here").is_err());
        assert!(parse_generated_update("{\"content\": \"missing type\"}").is_err());
        assert!(parse_generated_update(
            "{\"updateType\": \"epiphany\", \"content\": \"x\", \"emotionalTone\": \"y\"}"
        )
        .is_err());
        assert!(parse_generated_update(
            "{\"updateType\": \"progress\", \"content\": \"  \", \"emotionalTone\": \"y\"}"
        )
        .is_err());
    }

    #[test]
    fn test_request_keeps_last_three_visible_updates() {
        let storyline = StorylineCandidate::new("Marathon", StorylineCategory::Health)
            .into_storyline(t0());
        let mut updates: Vec<StorylineUpdate> = (0..5)
            .map(|i| {
                StorylineUpdate::new(
                    storyline.id,
                    UpdateType::Progress,
                    format!("run {}", i),
                    "tired",
                    t0() + Duration::days(i),
                )
            })
            .collect();
        updates.push(
            StorylineUpdate::new(storyline.id, UpdateType::Milestone, "hidden", "proud", t0())
                .revealed_at(t0() + Duration::days(30)),
        );

        let request = build_request(&storyline, &updates, t0() + Duration::days(6));
        assert_eq!(
            request.recent_updates,
            vec!["[progress] run 2", "[progress] run 3", "[progress] run 4"]
        );
        assert_eq!(request.days_in_phase, 6);
    }

    #[tokio::test]
    async fn test_generates_and_persists() {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate().times(1).returning(|req| {
            assert_eq!(req.title, "Learning guitar");
            Ok(r#"{"updateType":"initial_reaction","content":"Bought a guitar today","emotionalTone":"excited"}"#.to_string())
        });
        let (adapter, store, storyline) = setup(mock);

        let update = adapter
            .maybe_generate_update(&storyline, t0() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(update.update_type, UpdateType::InitialReaction);
        assert_eq!(store.list_updates(storyline.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_interval_not_reached_skips_generator() {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate().times(0);
        let (adapter, store, storyline) = setup(mock);

        store
            .insert_update(&StorylineUpdate::new(
                storyline.id,
                UpdateType::InitialReaction,
                "First chord",
                "happy",
                t0(),
            ))
            .await
            .unwrap();

        // announced requires one day between updates
        let result = adapter
            .maybe_generate_update(&storyline, t0() + Duration::hours(20))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_failures_become_none() {
        let mut mock = MockTextGenerator::new();
        let mut calls = 0;
        mock.expect_generate().times(3).returning(move |_| {
            calls += 1;
            match calls {
                1 => Err(StorylineError::generation("backend down")),
                2 => Ok("I'd rather not".to_string()),
                _ => Ok(r#"{"updateType":"gratitude","content":"Thanks","emotionalTone":"warm"}"#
                    .to_string()),
            }
        });
        let (adapter, store, storyline) = setup(mock);
        let now = t0() + Duration::days(1);

        assert!(adapter.maybe_generate_update(&storyline, now).await.is_none());
        assert!(adapter.maybe_generate_update(&storyline, now).await.is_none());
        // gratitude is not an announced-phase beat
        assert!(adapter.maybe_generate_update(&storyline, now).await.is_none());
        assert!(store.list_updates(storyline.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_becomes_none() {
        struct Hanging;

        #[async_trait::async_trait]
        impl TextGenerator for Hanging {
            async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                Ok(String::new())
            }
        }

        let store = Arc::new(InMemoryStore::new());
        let storyline = StorylineCandidate::new("Book club", StorylineCategory::Relationships)
            .into_storyline(t0());
        store.seed_storyline(storyline.clone()).unwrap();
        let adapter = UpdateGenerator::new(
            store,
            Arc::new(Hanging),
            Arc::new(PhaseTables::default()),
            std::time::Duration::from_millis(20),
        );

        assert!(adapter
            .maybe_generate_update(&storyline, t0() + Duration::days(1))
            .await
            .is_none());
    }
}
