//! Storyline aggregate

use super::{CreationSource, StorylinePhase};
use crate::{Result, StorylineError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable storage name
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Every variant
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StorylineError;

            fn from_str(s: &str) -> Result<Self> {
                let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == normalized)
                    .ok_or_else(|| {
                        StorylineError::validation(format!(
                            "Unknown {} '{}'",
                            stringify!($name),
                            s
                        ))
                    })
            }
        }
    };
}

pub(crate) use string_enum;

/// Area of life a storyline belongs to; duplicates are only detected within a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorylineCategory {
    /// Job, career, studies
    Work,
    /// Friends and family
    Relationships,
    /// Body and mind
    Health,
    /// Hobbies and skills
    Personal,
    /// Money and big purchases
    Finance,
    /// Moving, trips, home
    Living,
    /// Making things
    Creative,
}

string_enum!(StorylineCategory {
    Work => "work",
    Relationships => "relationships",
    Health => "health",
    Personal => "personal",
    Finance => "finance",
    Living => "living",
    Creative => "creative",
});

/// Shape of the arc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorylineType {
    /// Something being built over time
    Project,
    /// A door that might open
    Opportunity,
    /// A problem to get through
    Challenge,
    /// A change in someone's life
    Relationship,
    /// Something being learned
    Learning,
    /// A dated event being waited on
    PendingEvent,
}

string_enum!(StorylineType {
    Project => "project",
    Opportunity => "opportunity",
    Challenge => "challenge",
    Relationship => "relationship",
    Learning => "learning",
    PendingEvent => "pending_event",
});

/// How a storyline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorylineOutcome {
    /// It worked out
    Success,
    /// It did not
    Failure,
    /// Partly
    Mixed,
    /// Dropped before an outcome
    Abandoned,
}

string_enum!(StorylineOutcome {
    Success => "success",
    Failure => "failure",
    Mixed => "mixed",
    Abandoned => "abandoned",
});

/// A multi-day narrative arc
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storyline {
    /// Unique identifier
    pub id: Uuid,

    /// Short title, used for duplicate detection
    pub title: String,

    /// Area of life
    pub category: StorylineCategory,

    /// Shape of the arc
    pub storyline_type: StorylineType,

    /// Free-form description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// What is at stake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stakes: Option<String>,

    /// Current phase
    pub phase: StorylinePhase,

    /// When the current phase began
    pub phase_started_at: DateTime<Utc>,

    /// Dominant feeling about the storyline
    pub emotional_tone: String,

    /// How strongly it is felt (0.0 to 1.0)
    pub emotional_intensity: f64,

    /// Set when resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StorylineOutcome>,

    /// What happened, in words
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_description: Option<String>,

    /// Times this storyline has been brought up in conversation
    pub mention_count: u32,

    /// Last time it was brought up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_mentioned_at: Option<DateTime<Utc>>,

    /// Soft deadline for bringing it up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_mention_by: Option<DateTime<Utc>>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Resolution time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    /// Last write time
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency version, bumped by the store on every write
    pub version: i64,
}

impl Storyline {
    /// Whether the storyline is still unfolding (no outcome yet)
    pub fn is_active(&self) -> bool {
        self.outcome.is_none()
    }

    /// Whole days spent in the current phase at `now` (floored, negative if the
    /// phase started after `now`)
    pub fn days_in_phase(&self, now: DateTime<Utc>) -> i64 {
        (now - self.phase_started_at)
            .num_seconds()
            .div_euclid(Duration::days(1).num_seconds())
    }

    /// Move to `phase`, restarting the phase clock at `at`
    pub fn transition_to(&mut self, phase: StorylinePhase, at: DateTime<Utc>) {
        self.phase = phase;
        self.phase_started_at = at;
        self.updated_at = at;
    }

    /// Whether a soft mention deadline passed without a mention since creation
    pub fn is_mention_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.should_mention_by {
            Some(deadline) if deadline <= now => self
                .last_mentioned_at
                .map_or(true, |mentioned| mentioned < self.created_at),
            _ => false,
        }
    }

    /// Check the structural invariants of the aggregate
    pub fn check_invariants(&self, now: DateTime<Utc>) -> Result<()> {
        let closure = self.phase.is_closure_branch();
        if self.outcome.is_some() != closure {
            return Err(StorylineError::validation(format!(
                "storyline {} is in phase '{}' but outcome is {:?}",
                self.id, self.phase, self.outcome
            )));
        }
        if self.phase_started_at > now {
            return Err(StorylineError::validation(format!(
                "storyline {} phase started in the future ({})",
                self.id, self.phase_started_at
            )));
        }
        if !(0.0..=1.0).contains(&self.emotional_intensity) {
            return Err(StorylineError::validation(format!(
                "storyline {} intensity {} outside 0..=1",
                self.id, self.emotional_intensity
            )));
        }
        Ok(())
    }
}

/// A request to start a storyline, checked by the safety gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorylineCandidate {
    /// Title
    pub title: String,
    /// Category
    pub category: StorylineCategory,
    /// Type
    pub storyline_type: StorylineType,
    /// Description
    pub description: Option<String>,
    /// Stakes
    pub stakes: Option<String>,
    /// Initial tone
    pub emotional_tone: String,
    /// Initial intensity (0.0 to 1.0)
    pub emotional_intensity: f64,
    /// Soft deadline for the first mention
    pub should_mention_by: Option<DateTime<Utc>>,
    /// Where the request came from
    pub source: CreationSource,
}

impl StorylineCandidate {
    /// Create a candidate with neutral defaults
    pub fn new(title: impl Into<String>, category: StorylineCategory) -> Self {
        Self {
            title: title.into(),
            category,
            storyline_type: StorylineType::Project,
            description: None,
            stakes: None,
            emotional_tone: "hopeful".to_string(),
            emotional_intensity: 0.5,
            should_mention_by: None,
            source: CreationSource::Conversation,
        }
    }

    /// Set the type
    pub fn with_type(mut self, storyline_type: StorylineType) -> Self {
        self.storyline_type = storyline_type;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the stakes
    pub fn with_stakes(mut self, stakes: impl Into<String>) -> Self {
        self.stakes = Some(stakes.into());
        self
    }

    /// Set tone and intensity
    pub fn with_emotion(mut self, tone: impl Into<String>, intensity: f64) -> Self {
        self.emotional_tone = tone.into();
        self.emotional_intensity = intensity;
        self
    }

    /// Set a soft mention deadline
    pub fn with_mention_deadline(mut self, by: DateTime<Utc>) -> Self {
        self.should_mention_by = Some(by);
        self
    }

    /// Set the source tag
    pub fn with_source(mut self, source: CreationSource) -> Self {
        self.source = source;
        self
    }

    /// Reject input that can never become a valid storyline
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(StorylineError::validation("storyline title must not be empty"));
        }
        if !self.emotional_intensity.is_finite() || !(0.0..=1.0).contains(&self.emotional_intensity)
        {
            return Err(StorylineError::validation(format!(
                "emotional intensity {} must be within 0..=1",
                self.emotional_intensity
            )));
        }
        Ok(())
    }

    /// Materialize as a fresh storyline in the announced phase
    pub fn into_storyline(self, now: DateTime<Utc>) -> Storyline {
        Storyline {
            id: Uuid::new_v4(),
            title: self.title.trim().to_string(),
            category: self.category,
            storyline_type: self.storyline_type,
            description: self.description,
            stakes: self.stakes,
            phase: StorylinePhase::Announced,
            phase_started_at: now,
            emotional_tone: self.emotional_tone,
            emotional_intensity: self.emotional_intensity,
            outcome: None,
            outcome_description: None,
            mention_count: 0,
            last_mentioned_at: None,
            should_mention_by: self.should_mention_by,
            created_at: now,
            resolved_at: None,
            updated_at: now,
            version: 0,
        }
    }
}
