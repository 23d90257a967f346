//! Phase-keyed behavior tables
//!
//! Every table is a [`PhaseTable`], so each of the eight phases has an entry by
//! construction. Tables loaded from JSON must list every phase explicitly.

use serde::{Deserialize, Serialize};
use std::path::Path;
use storyline_core::{PhaseTable, Result, StorylineError, StorylinePhase};

/// When a storyline leaves a phase on its own
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRule {
    /// Days in phase before a transition may happen
    pub min_days: i64,
    /// Days in phase after which the transition is forced
    pub max_days: i64,
    /// Chance of transitioning on each daily tick once `min_days` is reached
    pub daily_probability: f64,
    /// Where the storyline goes
    pub next_phase: StorylinePhase,
}

impl TransitionRule {
    /// Shorthand constructor
    pub const fn new(
        min_days: i64,
        max_days: i64,
        daily_probability: f64,
        next_phase: StorylinePhase,
    ) -> Self {
        Self {
            min_days,
            max_days,
            daily_probability,
            next_phase,
        }
    }
}

/// How a phase weighs on mood and energy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodProfile {
    /// Mood push per unit of intensity, in [-1, 1]
    pub mood_impact: f64,
    /// Whether the phase costs energy
    pub energy_draining: bool,
    /// Baseline share of attention, in [0, 1]
    pub preoccupation_base: f64,
}

impl MoodProfile {
    const fn new(mood_impact: f64, energy_draining: bool, preoccupation_base: f64) -> Self {
        Self {
            mood_impact,
            energy_draining,
            preoccupation_base,
        }
    }
}

/// All phase-keyed tables used by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTables {
    /// Automatic transitions; `None` for phases only resolution may leave
    pub transitions: PhaseTable<Option<TransitionRule>>,
    /// Minimum days between generated updates
    pub update_interval_days: PhaseTable<i64>,
    /// Mood contribution per phase
    pub mood: PhaseTable<MoodProfile>,
    /// Salience weight per phase
    pub urgency: PhaseTable<f64>,
}

impl Default for PhaseTables {
    fn default() -> Self {
        use StorylinePhase::*;

        Self {
            transitions: PhaseTable::from_fn(|phase| match phase {
                Announced => Some(TransitionRule::new(1, 3, 0.5, Honeymoon)),
                Honeymoon => Some(TransitionRule::new(3, 7, 0.3, Reality)),
                Reality => Some(TransitionRule::new(3, 10, 0.25, Active)),
                Active => Some(TransitionRule::new(5, 21, 0.15, Climax)),
                Climax | Resolving | Resolved | Reflecting => None,
            }),
            update_interval_days: PhaseTable::from_fn(|phase| match phase {
                Announced | Climax | Resolving => 1,
                Honeymoon | Reality => 2,
                Active => 3,
                Resolved => 7,
                Reflecting => 30,
            }),
            mood: PhaseTable::from_fn(|phase| match phase {
                Announced => MoodProfile::new(0.3, false, 0.6),
                Honeymoon => MoodProfile::new(0.5, false, 0.5),
                Reality => MoodProfile::new(-0.2, true, 0.6),
                Active => MoodProfile::new(0.0, true, 0.5),
                Climax => MoodProfile::new(-0.1, true, 0.9),
                Resolving => MoodProfile::new(0.0, false, 0.7),
                Resolved => MoodProfile::new(0.2, false, 0.4),
                Reflecting => MoodProfile::new(0.1, false, 0.2),
            }),
            urgency: PhaseTable::from_fn(|phase| match phase {
                Announced | Climax => 1.0,
                Honeymoon => 0.6,
                Reality => 0.7,
                Active => 0.5,
                Resolving => 0.9,
                Resolved => 0.4,
                Reflecting => 0.1,
            }),
        }
    }
}

impl PhaseTables {
    /// Load tables from a JSON file; every table must name all eight phases
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let tables: PhaseTables = serde_json::from_str(&raw).map_err(|e| {
            StorylineError::config(format!("Invalid phase tables in {}: {}", path.display(), e))
        })?;
        tables.validate()?;
        Ok(tables)
    }

    /// Reject values that would break the lifecycle
    pub fn validate(&self) -> Result<()> {
        for (phase, rule) in self.transitions.iter() {
            let Some(rule) = rule else { continue };
            if phase.is_closure_branch() {
                return Err(StorylineError::config(format!(
                    "phase '{}' can only be left through resolution",
                    phase
                )));
            }
            if rule.next_phase.is_closure_branch() {
                return Err(StorylineError::config(format!(
                    "transition from '{}' may not enter '{}'",
                    phase, rule.next_phase
                )));
            }
            if rule.next_phase.index() <= phase.index() {
                return Err(StorylineError::config(format!(
                    "transition from '{}' to '{}' must move forward",
                    phase, rule.next_phase
                )));
            }
            if rule.min_days < 0 || rule.min_days > rule.max_days {
                return Err(StorylineError::config(format!(
                    "phase '{}' needs 0 <= minDays <= maxDays (got {} and {})",
                    phase, rule.min_days, rule.max_days
                )));
            }
            if !(0.0..=1.0).contains(&rule.daily_probability) {
                return Err(StorylineError::config(format!(
                    "phase '{}' daily probability {} outside [0, 1]",
                    phase, rule.daily_probability
                )));
            }
        }

        for (phase, days) in self.update_interval_days.iter() {
            if *days < 1 {
                return Err(StorylineError::config(format!(
                    "phase '{}' update interval must be at least one day",
                    phase
                )));
            }
        }

        for (phase, profile) in self.mood.iter() {
            if !(-1.0..=1.0).contains(&profile.mood_impact)
                || !(0.0..=1.0).contains(&profile.preoccupation_base)
            {
                return Err(StorylineError::config(format!(
                    "phase '{}' mood profile out of range",
                    phase
                )));
            }
        }

        for (phase, urgency) in self.urgency.iter() {
            if !urgency.is_finite() || *urgency < 0.0 {
                return Err(StorylineError::config(format!(
                    "phase '{}' urgency must be a non-negative number",
                    phase
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables_are_valid() {
        let tables = PhaseTables::default();
        tables.validate().unwrap();

        assert_eq!(tables.urgency[StorylinePhase::Announced], 1.0);
        assert_eq!(tables.urgency[StorylinePhase::Reflecting], 0.1);
        assert_eq!(tables.update_interval_days[StorylinePhase::Reflecting], 30);
        assert!(tables.transitions[StorylinePhase::Climax].is_none());
        assert_eq!(
            tables.transitions[StorylinePhase::Announced].map(|r| r.max_days),
            Some(3)
        );
    }

    #[test]
    fn test_rejects_transition_into_closure_branch() {
        let mut tables = PhaseTables::default();
        tables.transitions.set(
            StorylinePhase::Climax,
            Some(TransitionRule::new(1, 2, 0.5, StorylinePhase::Resolved)),
        );
        assert!(tables.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_probability_and_days() {
        let mut tables = PhaseTables::default();
        tables.transitions.set(
            StorylinePhase::Announced,
            Some(TransitionRule::new(1, 3, 1.5, StorylinePhase::Honeymoon)),
        );
        assert!(tables.validate().is_err());

        let mut tables = PhaseTables::default();
        tables.transitions.set(
            StorylinePhase::Announced,
            Some(TransitionRule::new(4, 3, 0.5, StorylinePhase::Honeymoon)),
        );
        assert!(tables.validate().is_err());
    }

    #[test]
    fn test_json_missing_phase_fails_loading() {
        let tables = PhaseTables::default();
        let mut json = serde_json::to_value(&tables).unwrap();
        json["urgency"]
            .as_object_mut()
            .unwrap()
            .remove("honeymoon");

        let err = serde_json::from_value::<PhaseTables>(json).unwrap_err();
        assert!(err.to_string().contains("honeymoon"));

        let round_trip: PhaseTables =
            serde_json::from_value(serde_json::to_value(&tables).unwrap()).unwrap();
        assert_eq!(round_trip, tables);
    }
}
