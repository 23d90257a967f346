//! Storyline updates

use super::storyline::string_enum;
use super::StorylinePhase;
use crate::{Result, StorylineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of narrative beat an update represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    InitialReaction,
    Anticipation,
    Excitement,
    Progress,
    Setback,
    Worry,
    Milestone,
    OutcomeReaction,
    Gratitude,
    Relief,
    Acceptance,
    Reflection,
    LessonLearned,
}

string_enum!(UpdateType {
    InitialReaction => "initial_reaction",
    Anticipation => "anticipation",
    Excitement => "excitement",
    Progress => "progress",
    Setback => "setback",
    Worry => "worry",
    Milestone => "milestone",
    OutcomeReaction => "outcome_reaction",
    Gratitude => "gratitude",
    Relief => "relief",
    Acceptance => "acceptance",
    Reflection => "reflection",
    LessonLearned => "lesson_learned",
});

impl UpdateType {
    /// Update types that make sense for a storyline in `phase`
    pub fn allowed_for(phase: StorylinePhase) -> &'static [UpdateType] {
        use UpdateType::*;
        match phase {
            StorylinePhase::Announced => &[InitialReaction, Anticipation],
            StorylinePhase::Honeymoon => &[Excitement, Progress, Anticipation],
            StorylinePhase::Reality => &[Setback, Progress, Worry],
            StorylinePhase::Active => &[Progress, Setback, Milestone],
            StorylinePhase::Climax => &[Anticipation, Worry, Milestone],
            StorylinePhase::Resolving => &[OutcomeReaction],
            StorylinePhase::Resolved => &[
                OutcomeReaction,
                Gratitude,
                Relief,
                Acceptance,
                Reflection,
                LessonLearned,
            ],
            StorylinePhase::Reflecting => &[Reflection, LessonLearned],
        }
    }

    /// Whether this type may be attached to a storyline in `phase`
    pub fn is_allowed_in(self, phase: StorylinePhase) -> bool {
        UpdateType::allowed_for(phase).contains(&self)
    }
}

/// A narrative beat belonging to exactly one storyline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorylineUpdate {
    /// Unique identifier
    pub id: Uuid,

    /// Owning storyline
    pub storyline_id: Uuid,

    /// Kind of beat
    pub update_type: UpdateType,

    /// Text of the update
    pub content: String,

    /// Tone the update carries
    pub emotional_tone: String,

    /// Whether it has been brought up in conversation
    pub mentioned: bool,

    /// When it was brought up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentioned_at: Option<DateTime<Utc>>,

    /// Earliest time the update may surface; `None` means immediately
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reveal_at: Option<DateTime<Utc>>,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl StorylineUpdate {
    /// Create an immediately visible update
    pub fn new(
        storyline_id: Uuid,
        update_type: UpdateType,
        content: impl Into<String>,
        emotional_tone: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            storyline_id,
            update_type,
            content: content.into(),
            emotional_tone: emotional_tone.into(),
            mentioned: false,
            mentioned_at: None,
            reveal_at: None,
            created_at,
        }
    }

    /// Hold the update back until `at`
    pub fn revealed_at(mut self, at: DateTime<Utc>) -> Self {
        self.reveal_at = Some(at);
        self
    }

    /// Whether the update may be shown at `now`
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.reveal_at.map_or(true, |at| at <= now)
    }

    /// Reject empty content
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(StorylineError::validation(format!(
                "update for storyline {} has empty content",
                self.storyline_id
            )));
        }
        Ok(())
    }
}
