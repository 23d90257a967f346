//! Creation audit log

use super::storyline::string_enum;
use super::StorylineCategory;
use crate::{Result, StorylineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Where a creation request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationSource {
    /// Extracted from a conversation
    Conversation,
    /// Proposed by the engine itself
    Autonomous,
    /// Created by an operator
    Manual,
}

string_enum!(CreationSource {
    Conversation => "conversation",
    Autonomous => "autonomous",
    Manual => "manual",
});

/// Why the safety gate turned a request down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// A storyline was created too recently
    Cooldown,
    /// A similar storyline already exists in the category
    Duplicate,
    /// Too many storylines are already active
    ActiveLimit,
    /// The active-limit check could not read storage
    StorageUnavailable,
}

string_enum!(FailureReason {
    Cooldown => "cooldown",
    Duplicate => "duplicate",
    ActiveLimit => "active_limit",
    StorageUnavailable => "storage_unavailable",
});

/// Diagnostic fields attached to a rejection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionDiagnostics {
    /// Hours until the cooldown lifts (rounded up, at least 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_remaining: Option<i64>,

    /// Storyline the candidate duplicates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Uuid>,

    /// Title of that storyline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_title: Option<String>,

    /// Word overlap ratio that triggered the duplicate check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,

    /// Active storyline holding the slot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_id: Option<Uuid>,

    /// Free-form detail, e.g. the storage error text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One immutable row per creation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationAttempt {
    pub id: Uuid,
    pub attempted_at: DateTime<Utc>,
    pub title: String,
    pub category: StorylineCategory,
    pub source: CreationSource,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(default)]
    pub diagnostics: RejectionDiagnostics,
    /// Storyline created by a successful attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storyline_id: Option<Uuid>,
}

impl CreationAttempt {
    /// Audit row for an accepted candidate
    pub fn accepted(
        title: impl Into<String>,
        category: StorylineCategory,
        source: CreationSource,
        storyline_id: Uuid,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempted_at: at,
            title: title.into(),
            category,
            source,
            success: true,
            failure_reason: None,
            diagnostics: RejectionDiagnostics::default(),
            storyline_id: Some(storyline_id),
        }
    }

    /// Audit row for a rejected candidate
    pub fn rejected(
        title: impl Into<String>,
        category: StorylineCategory,
        source: CreationSource,
        reason: FailureReason,
        diagnostics: RejectionDiagnostics,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempted_at: at,
            title: title.into(),
            category,
            source,
            success: false,
            failure_reason: Some(reason),
            diagnostics,
            storyline_id: None,
        }
    }

    /// A row is either a success with a storyline or a failure with a reason
    pub fn validate(&self) -> Result<()> {
        match (self.success, self.failure_reason, self.storyline_id) {
            (true, None, Some(_)) | (false, Some(_), None) => Ok(()),
            _ => Err(StorylineError::validation(format!(
                "inconsistent creation attempt {}",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_shapes() {
        let now = Utc::now();
        let ok = CreationAttempt::accepted(
            "New job",
            StorylineCategory::Work,
            CreationSource::Conversation,
            Uuid::new_v4(),
            now,
        );
        assert!(ok.validate().is_ok());

        let rejected = CreationAttempt::rejected(
            "New job",
            StorylineCategory::Work,
            CreationSource::Manual,
            FailureReason::Cooldown,
            RejectionDiagnostics {
                hours_remaining: Some(12),
                ..Default::default()
            },
            now,
        );
        assert!(rejected.validate().is_ok());

        let mut broken = rejected.clone();
        broken.failure_reason = None;
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(FailureReason::ActiveLimit.to_string(), "active_limit");
        assert_eq!(
            "storage_unavailable".parse::<FailureReason>().unwrap(),
            FailureReason::StorageUnavailable
        );
    }
}
