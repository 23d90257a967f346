//! Prompt Context Summarizer
//!
//! Ranks storylines for injection into a conversation prompt:
//!
//! ```text
//! salience = urgency[phase] * intensity + (visible unmentioned update ? bonus : 0)
//! ```
//!
//! Storylines below the intensity floor are dropped and the rest are capped to
//! the top K. Updates whose reveal time has not passed never leave this module.

use crate::types::ContextConfig;
use chrono::{DateTime, Duration, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use storyline_core::{PhaseTable, Result, Storyline, StorylineError, StorylineStore, StorylineUpdate, Uuid};

/// A storyline picked for the prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStoryline {
    pub storyline: Storyline,
    pub salience: f64,
    /// A visible update has not been mentioned yet
    pub has_unmentioned_update: bool,
    /// The soft mention deadline passed without a mention
    pub overdue_mention: bool,
    /// Latest visible updates, oldest first
    pub recent_updates: Vec<StorylineUpdate>,
}

/// Everything a prompt needs to know about ongoing storylines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub has_active: bool,
    pub ranked_storylines: Vec<RankedStoryline>,
    /// Visible updates of ranked storylines not yet brought up
    pub unrevealed_updates: Vec<StorylineUpdate>,
    pub generated_at: DateTime<Utc>,
}

impl PromptContext {
    /// Render as a text block for prompt injection; empty when nothing ranks
    pub fn to_prompt_block(&self) -> String {
        if self.ranked_storylines.is_empty() {
            return String::new();
        }

        let mut block = String::from("# Ongoing storylines\n");
        for ranked in &self.ranked_storylines {
            let s = &ranked.storyline;
            block.push_str(&format!(
                "\n## {} ({}, {})\n",
                s.title, s.category, s.phase
            ));
            block.push_str(&format!(
                "Feeling {} (intensity {:.1})",
                s.emotional_tone, s.emotional_intensity
            ));
            if let Some(outcome) = s.outcome {
                block.push_str(&format!(", outcome: {}", outcome));
            }
            block.push('\n');
            if let Some(stakes) = &s.stakes {
                block.push_str(&format!("Stakes: {}\n", stakes));
            }
            for update in &ranked.recent_updates {
                let marker = if update.mentioned { "" } else { " (new)" };
                block.push_str(&format!(
                    "- [{}]{} {}\n",
                    update.update_type, marker, update.content
                ));
            }
            if ranked.overdue_mention {
                block.push_str("Worth bringing up soon.\n");
            }
        }
        block
    }
}

/// Salience score for one storyline
pub fn salience(urgency: f64, intensity: f64, has_unmentioned_update: bool, bonus: f64) -> f64 {
    urgency * intensity + if has_unmentioned_update { bonus } else { 0.0 }
}

/// Builds prompt context and records mentions
pub struct PromptContextSummarizer {
    store: Arc<dyn StorylineStore>,
    urgency: PhaseTable<f64>,
    config: ContextConfig,
}

impl PromptContextSummarizer {
    pub fn new(
        store: Arc<dyn StorylineStore>,
        urgency: PhaseTable<f64>,
        config: ContextConfig,
    ) -> Self {
        Self {
            store,
            urgency,
            config,
        }
    }

    /// Build context at `now` with the configured top-K
    pub async fn build_context(&self, now: DateTime<Utc>) -> Result<PromptContext> {
        self.build_context_with_limit(now, None).await
    }

    /// Build context at `now`, capping to `limit` (or the configured top-K)
    pub async fn build_context_with_limit(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<PromptContext> {
        let active = self.store.list_active_storylines().await?;
        let has_active = !active.is_empty();

        let recall_since = now - Duration::days(self.config.recall_days);
        let mut seen: HashSet<Uuid> = active.iter().map(|s| s.id).collect();
        let mut candidates = active;
        for resolved in self.store.list_resolved_since(recall_since).await? {
            if seen.insert(resolved.id) {
                candidates.push(resolved);
            }
        }

        let mut ranked = Vec::new();
        for storyline in candidates {
            if storyline.emotional_intensity < self.config.intensity_floor {
                continue;
            }
            let visible: Vec<StorylineUpdate> = self
                .store
                .list_updates(storyline.id)
                .await?
                .into_iter()
                .filter(|u| u.is_visible(now))
                .collect();
            let has_unmentioned_update = visible.iter().any(|u| !u.mentioned);
            let score = salience(
                self.urgency[storyline.phase],
                storyline.emotional_intensity,
                has_unmentioned_update,
                self.config.unmentioned_bonus,
            );
            let skip = visible.len().saturating_sub(self.config.recent_updates);

            ranked.push(RankedStoryline {
                overdue_mention: storyline.is_mention_overdue(now),
                storyline,
                salience: score,
                has_unmentioned_update,
                recent_updates: visible.into_iter().skip(skip).collect(),
            });
        }

        ranked.sort_by_key(|r| Reverse(OrderedFloat(r.salience)));
        ranked.truncate(limit.unwrap_or(self.config.top_k));

        let mut unrevealed_updates = Vec::new();
        for r in &ranked {
            for update in self.store.list_updates(r.storyline.id).await? {
                if update.is_visible(now) && !update.mentioned {
                    unrevealed_updates.push(update);
                }
            }
        }

        tracing::debug!(
            has_active,
            ranked = ranked.len(),
            unrevealed = unrevealed_updates.len(),
            "Prompt context built"
        );
        Ok(PromptContext {
            has_active,
            ranked_storylines: ranked,
            unrevealed_updates,
            generated_at: now,
        })
    }

    /// Record that `storyline_id` came up in conversation at `now`.
    ///
    /// Only visible updates in `update_ids` that belong to the storyline are
    /// marked, in the same write as the mention count. Returns the number of
    /// updates newly marked.
    pub async fn mark_mentioned(
        &self,
        storyline_id: Uuid,
        update_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let visible: Vec<Uuid> = self
            .store
            .list_updates(storyline_id)
            .await?
            .into_iter()
            .filter(|u| u.is_visible(now) && update_ids.contains(&u.id))
            .map(|u| u.id)
            .collect();

        for attempt in 0..2 {
            let mut storyline = self
                .store
                .get_storyline(storyline_id)
                .await?
                .ok_or_else(|| StorylineError::not_found(format!("storyline {}", storyline_id)))?;
            storyline.mention_count += 1;
            storyline.last_mentioned_at = Some(now);
            storyline.updated_at = now;

            if let Some(marked) = self.store.commit_mention(&storyline, &visible, now).await? {
                tracing::debug!(
                    storyline_id = %storyline_id,
                    marked,
                    mention_count = storyline.mention_count,
                    "Storyline mentioned"
                );
                return Ok(marked);
            }
            tracing::debug!(storyline_id = %storyline_id, attempt, "Mention lost a version race");
        }

        Err(StorylineError::conflict(format!(
            "storyline {} kept changing while recording a mention",
            storyline_id
        )))
    }
}
