//! Engine configuration

use super::PhaseTables;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storyline_core::{get_env_parsed, get_env_parsed_or, Result, StorylineError};

/// Longest closure sequence the outcome templates cover
pub const MAX_CLOSURE_LENGTH: usize = 4;

/// Creation guard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyGateConfig {
    /// Minimum hours between successful creations
    pub cooldown_hours: i64,

    /// How far back duplicate detection looks
    pub dedupe_window_days: i64,

    /// Word-overlap ratio at or above which titles count as duplicates
    pub similarity_threshold: f64,

    /// Storylines allowed to be active at once
    pub max_active: usize,

    /// Optional cap per category
    pub max_active_per_category: Option<usize>,
}

impl Default for SafetyGateConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: 48,
            dedupe_window_days: 7,
            similarity_threshold: 0.6,
            max_active: 1,
            max_active_per_category: None,
        }
    }
}

/// Prompt context settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Storylines returned at most
    pub top_k: usize,

    /// Storylines below this intensity are left out
    pub intensity_floor: f64,

    /// Days a resolved storyline stays eligible for context and mood
    pub recall_days: i64,

    /// Salience bonus for a storyline with a visible, unmentioned update
    pub unmentioned_bonus: f64,

    /// Recent visible updates attached to each ranked storyline
    pub recent_updates: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            intensity_floor: 0.3,
            recall_days: 30,
            unmentioned_bonus: 0.3,
            recent_updates: 3,
        }
    }
}

/// Configuration for the storyline lifecycle engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Creation guard
    pub gate: SafetyGateConfig,

    /// Phase-keyed tables
    pub tables: PhaseTables,

    /// Prompt context
    pub context: ContextConfig,

    /// Offset used to decide where a calendar day starts
    pub timezone_offset_minutes: i32,

    /// Timeout applied to every generation call, in seconds
    pub generation_timeout_secs: u64,

    /// Closure updates scheduled per resolution
    pub closure_length: usize,

    /// Periodic timer cadence, in seconds
    pub tick_interval_secs: u64,

    /// Seed for the transition RNG; entropy when unset
    pub rng_seed: Option<u64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            gate: SafetyGateConfig::default(),
            tables: PhaseTables::default(),
            context: ContextConfig::default(),
            timezone_offset_minutes: 0,
            generation_timeout_secs: 30,
            closure_length: MAX_CLOSURE_LENGTH,
            tick_interval_secs: 3600,
            rng_seed: None,
        }
    }
}

impl LifecycleConfig {
    /// Read `STORYLINE_*` variables on top of the defaults and validate the result
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let tables = match get_env_parsed::<String>("STORYLINE_PHASE_TABLES_PATH")? {
            Some(path) => PhaseTables::from_json_file(path)?,
            None => defaults.tables,
        };

        let config = Self {
            gate: SafetyGateConfig {
                cooldown_hours: get_env_parsed_or(
                    "STORYLINE_COOLDOWN_HOURS",
                    defaults.gate.cooldown_hours,
                )?,
                dedupe_window_days: get_env_parsed_or(
                    "STORYLINE_DEDUPE_WINDOW_DAYS",
                    defaults.gate.dedupe_window_days,
                )?,
                similarity_threshold: get_env_parsed_or(
                    "STORYLINE_SIMILARITY_THRESHOLD",
                    defaults.gate.similarity_threshold,
                )?,
                max_active: get_env_parsed_or("STORYLINE_MAX_ACTIVE", defaults.gate.max_active)?,
                max_active_per_category: get_env_parsed("STORYLINE_MAX_ACTIVE_PER_CATEGORY")?,
            },
            tables,
            context: ContextConfig {
                top_k: get_env_parsed_or("STORYLINE_CONTEXT_TOP_K", defaults.context.top_k)?,
                intensity_floor: get_env_parsed_or(
                    "STORYLINE_CONTEXT_INTENSITY_FLOOR",
                    defaults.context.intensity_floor,
                )?,
                recall_days: get_env_parsed_or(
                    "STORYLINE_CONTEXT_RECALL_DAYS",
                    defaults.context.recall_days,
                )?,
                ..defaults.context
            },
            timezone_offset_minutes: get_env_parsed_or(
                "STORYLINE_TIMEZONE_OFFSET_MINUTES",
                defaults.timezone_offset_minutes,
            )?,
            generation_timeout_secs: get_env_parsed_or(
                "STORYLINE_GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout_secs,
            )?,
            closure_length: get_env_parsed_or(
                "STORYLINE_CLOSURE_LENGTH",
                defaults.closure_length,
            )?,
            tick_interval_secs: get_env_parsed_or(
                "STORYLINE_TICK_INTERVAL_SECS",
                defaults.tick_interval_secs,
            )?,
            rng_seed: get_env_parsed("STORYLINE_RNG_SEED")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check ranges; any violation is a configuration error
    pub fn validate(&self) -> Result<()> {
        if self.gate.cooldown_hours < 0 {
            return Err(StorylineError::config("cooldown hours must not be negative"));
        }
        if self.gate.dedupe_window_days < 0 {
            return Err(StorylineError::config(
                "dedupe window days must not be negative",
            ));
        }
        if !(self.gate.similarity_threshold > 0.0 && self.gate.similarity_threshold <= 1.0) {
            return Err(StorylineError::config(format!(
                "similarity threshold {} must be within (0, 1]",
                self.gate.similarity_threshold
            )));
        }
        if self.gate.max_active == 0 || self.gate.max_active_per_category == Some(0) {
            return Err(StorylineError::config("active limits must be at least 1"));
        }
        if !(1..=MAX_CLOSURE_LENGTH).contains(&self.closure_length) {
            return Err(StorylineError::config(format!(
                "closure length {} must be within 1..={}",
                self.closure_length, MAX_CLOSURE_LENGTH
            )));
        }
        if self.context.top_k == 0 {
            return Err(StorylineError::config("context top-k must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.context.intensity_floor) {
            return Err(StorylineError::config(
                "context intensity floor must be within [0, 1]",
            ));
        }
        if self.context.recall_days < 0 {
            return Err(StorylineError::config("recall days must not be negative"));
        }
        if self.generation_timeout_secs == 0 || self.tick_interval_secs == 0 {
            return Err(StorylineError::config(
                "generation timeout and tick interval must be positive",
            ));
        }
        self.timezone()?;
        self.tables.validate()
    }

    /// Fixed offset that defines calendar days
    pub fn timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60).ok_or_else(|| {
            StorylineError::config(format!(
                "timezone offset {} minutes is out of range",
                self.timezone_offset_minutes
            ))
        })
    }

    /// Generation timeout as a duration
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Periodic timer cadence as a duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}
