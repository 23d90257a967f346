//! Storyline Lifecycle Plugin
//!
//! Gives a character ongoing life events that unfold over days.
//!
//! # Overview
//!
//! - **Safety Gate**: cooldown, duplicate detection and active limits guard
//!   every creation, with an append-only audit of each attempt.
//!
//! - **Phase Scheduler**: storylines move announced → honeymoon → reality →
//!   active → climax on min/max day rules with one Bernoulli trial per day.
//!
//! - **Update Generator**: asks an external text generator for the next beat
//!   when a phase's update interval has passed. Failures mean "no update".
//!
//! - **Mood Effects**: each storyline pushes on mood, energy and
//!   preoccupation according to its phase and intensity.
//!
//! - **Catch-Up Runner**: replays one daily tick per missed calendar day,
//!   checkpointing after each day.
//!
//! - **Closure**: resolution schedules a short sequence of updates revealed one
//!   per day, then the storyline settles into reflection.
//!
//! - **Prompt Context**: ranks storylines by salience for prompt injection and
//!   never leaks an update before its reveal time.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use storyline_plugin_lifecycle::{LifecycleConfig, StorylinePlugin};
//! use storyline_core::{InMemoryStore, NoopGenerator, SystemClock};
//!
//! let plugin = StorylinePlugin::from_parts(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(NoopGenerator),
//!     Arc::new(SystemClock),
//!     LifecycleConfig::from_env()?,
//! )?;
//! for service in plugin.services() {
//!     service.start().await?;
//! }
//! ```

#![warn(clippy::all)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use storyline_core::{
    Clock, Plugin, Provider, Result, Service, StorylineStore, TextGenerator,
};

/// Configuration and phase tables
pub mod types;
/// Engine components
pub mod services;
/// Providers for prompt and mood context
pub mod providers;

pub use providers::*;
pub use services::*;
pub use types::*;

// ============================================================================
// ANSI Art Banner Rendering
// ============================================================================

/// Represents a configuration setting row for display
struct SettingRow {
    value: String,
    is_default: bool,
    env_var: String,
}

/// Pad string to width, truncating if necessary
fn pad(s: &str, w: usize) -> String {
    let mut out: String = s.chars().take(w).collect();
    let len = out.chars().count();
    out.push_str(&" ".repeat(w.saturating_sub(len)));
    out
}

/// Render the storyline plugin banner with settings
fn render_storyline_banner(rows: &[SettingRow]) {
    let blue = "\x1b[34m";
    let cyan = "\x1b[36m";
    let yellow = "\x1b[33m";
    let green = "\x1b[32m";
    let dim = "\x1b[2m";
    let bold = "\x1b[1m";
    let reset = "\x1b[0m";

    println!("{blue}+{line}+{reset}", line = "=".repeat(78));
    println!(
        "{blue}|{bold}  ____ _____ ___  ______   ___     ___ _   _ _____   {reset}{blue}{pad}|{reset}",
        pad = " ".repeat(25)
    );
    println!(
        "{blue}|{bold} / ___|_   _/ _ \\|  _ \\ \\ / / |   |_ _| \\ | | ____|  {reset}{blue}{pad}|{reset}",
        pad = " ".repeat(24)
    );
    println!(
        "{blue}|{bold} \\___ \\ | || | | | |_) \\ V /| |    | ||  \\| |  _|    {reset}{blue}{pad}|{reset}",
        pad = " ".repeat(24)
    );
    println!(
        "{blue}|{bold}  ___) || || |_| |  _ < | | | |___ | || |\\  | |___   {reset}{blue}{pad}|{reset}",
        pad = " ".repeat(24)
    );
    println!(
        "{blue}|{bold} |____/ |_| \\___/|_| \\_\\|_| |_____|___|_| \\_|_____|  {reset}{blue}{pad}|{reset}",
        pad = " ".repeat(24)
    );

    println!("{blue}|{reset}");
    println!(
        "{blue}|{inner}|{reset}",
        inner = pad(
            &format!(
                "  {yellow}Announced{reset} {dim}→{reset} {yellow}Honeymoon{reset} {dim}→{reset} {yellow}Reality{reset} {dim}→{reset} {yellow}Active{reset} {dim}→{reset} {yellow}Climax{reset} {dim}→{reset} {cyan}Closure{reset}"
            ),
            78
        ),
    );
    println!("{blue}+{line}+{reset}", line = "-".repeat(78));

    println!(
        "{blue}|{a}|{b}|{c}|{reset}",
        a = pad(&format!(" {bold}SETTING{reset}"), 42),
        b = pad(&format!(" {bold}VALUE{reset}"), 22),
        c = pad(&format!(" {bold}STATUS{reset}"), 23),
    );
    println!("{blue}+{line}+{reset}", line = "-".repeat(78));

    for row in rows {
        let status_color = if row.is_default { dim } else { green };
        let status_text = if row.is_default { "default" } else { "custom" };
        let status_icon = if row.is_default { " " } else { "◈" };

        println!(
            "{blue}|{icon} {name}|{value}|{status}|{reset}",
            icon = status_icon,
            name = pad(&row.env_var, 38),
            value = pad(&row.value, 20),
            status = pad(&format!("{status_color}{status_text}{reset}"), 26),
        );
    }

    println!("{blue}+{line}+{reset}", line = "=".repeat(78));
}

// ============================================================================
// Plugin Implementation
// ============================================================================

/// Storyline Lifecycle Plugin
///
/// Exposes the context and mood providers and the engine service.
pub struct StorylinePlugin {
    engine: Arc<StorylineEngine>,
    service: Arc<StorylineEngineService>,
}

impl StorylinePlugin {
    /// Wrap an existing engine
    pub fn new(engine: Arc<StorylineEngine>) -> Self {
        Self {
            service: Arc::new(StorylineEngineService::new(engine.clone())),
            engine,
        }
    }

    /// Build the engine and the plugin in one go
    pub fn from_parts(
        store: Arc<dyn StorylineStore>,
        generator: Arc<dyn TextGenerator>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Result<Self> {
        let engine = StorylineEngine::new(store, generator, clock, config)?;
        Ok(Self::new(Arc::new(engine)))
    }

    /// Engine behind the plugin
    pub fn engine(&self) -> &Arc<StorylineEngine> {
        &self.engine
    }
}

#[async_trait]
impl Plugin for StorylinePlugin {
    fn name(&self) -> &str {
        "storyline"
    }

    fn description(&self) -> &str {
        "Multi-day storylines with phases, mood feedback, gated creation and scheduled closure"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn init(&self, config: HashMap<String, String>) -> Result<()> {
        let mut rows: Vec<SettingRow> = Vec::new();

        if let Some(schema) = self.config_schema() {
            if let Some(map) = schema.as_object() {
                for (key, val) in map {
                    let def = val
                        .get("default")
                        .map(|v| v.to_string().replace('"', ""))
                        .unwrap_or_default();
                    let (value, is_default) = match config
                        .get(key)
                        .cloned()
                        .or_else(|| std::env::var(key).ok())
                    {
                        Some(v) => (v, false),
                        None => (def, true),
                    };
                    rows.push(SettingRow {
                        value,
                        is_default,
                        env_var: key.clone(),
                    });
                }
            }
        }

        render_storyline_banner(&rows);

        let settings = self.engine.config();
        tracing::info!(
            cooldown_hours = settings.gate.cooldown_hours,
            max_active = settings.gate.max_active,
            closure_length = settings.closure_length,
            "Storyline plugin initialized"
        );
        Ok(())
    }

    fn providers(&self) -> Vec<Arc<dyn Provider>> {
        vec![
            Arc::new(StorylineContextProvider::new(self.engine.clone())),
            Arc::new(MoodEffectProvider::new(self.engine.clone())),
        ]
    }

    fn services(&self) -> Vec<Arc<dyn Service>> {
        vec![self.service.clone()]
    }

    fn schema(&self) -> Option<serde_json::Value> {
        // Mirrors the SQLite store; timestamps are epoch milliseconds
        Some(serde_json::json!({
            "storylines": {
                "columns": {
                    "id": "TEXT PRIMARY KEY",
                    "title": "TEXT NOT NULL",
                    "category": "TEXT NOT NULL",
                    "storyline_type": "TEXT NOT NULL",
                    "description": "TEXT",
                    "stakes": "TEXT",
                    "phase": "TEXT NOT NULL",
                    "phase_started_at": "INTEGER NOT NULL",
                    "emotional_tone": "TEXT NOT NULL",
                    "emotional_intensity": "REAL NOT NULL",
                    "outcome": "TEXT",
                    "outcome_description": "TEXT",
                    "mention_count": "INTEGER NOT NULL",
                    "last_mentioned_at": "INTEGER",
                    "should_mention_by": "INTEGER",
                    "created_at": "INTEGER NOT NULL",
                    "resolved_at": "INTEGER",
                    "updated_at": "INTEGER NOT NULL",
                    "version": "INTEGER NOT NULL"
                }
            },
            "storyline_updates": {
                "columns": {
                    "id": "TEXT PRIMARY KEY",
                    "storyline_id": "TEXT NOT NULL REFERENCES storylines(id) ON DELETE CASCADE",
                    "update_type": "TEXT NOT NULL",
                    "content": "TEXT NOT NULL",
                    "emotional_tone": "TEXT NOT NULL",
                    "mentioned": "INTEGER NOT NULL",
                    "mentioned_at": "INTEGER",
                    "reveal_at": "INTEGER",
                    "created_at": "INTEGER NOT NULL"
                }
            },
            "creation_attempts": {
                "columns": {
                    "id": "TEXT PRIMARY KEY",
                    "attempted_at": "INTEGER NOT NULL",
                    "title": "TEXT NOT NULL",
                    "category": "TEXT NOT NULL",
                    "source": "TEXT NOT NULL",
                    "success": "INTEGER NOT NULL",
                    "failure_reason": "TEXT",
                    "diagnostics": "TEXT",
                    "storyline_id": "TEXT"
                }
            },
            "engine_markers": {
                "columns": {
                    "name": "TEXT PRIMARY KEY",
                    "instant": "INTEGER",
                    "day": "TEXT"
                }
            }
        }))
    }

    fn config_schema(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "STORYLINE_COOLDOWN_HOURS": {"type": "integer", "default": 48, "description": "Minimum hours between successful creations"},
            "STORYLINE_DEDUPE_WINDOW_DAYS": {"type": "integer", "default": 7, "description": "Days back duplicate detection looks"},
            "STORYLINE_SIMILARITY_THRESHOLD": {"type": "number", "default": 0.6, "description": "Word overlap at which titles are duplicates"},
            "STORYLINE_MAX_ACTIVE": {"type": "integer", "default": 1, "description": "Storylines active at once"},
            "STORYLINE_MAX_ACTIVE_PER_CATEGORY": {"type": "integer", "default": "", "description": "Optional per-category cap"},
            "STORYLINE_CONTEXT_TOP_K": {"type": "integer", "default": 5, "description": "Storylines in the prompt context"},
            "STORYLINE_CONTEXT_INTENSITY_FLOOR": {"type": "number", "default": 0.3, "description": "Storylines below this intensity are left out"},
            "STORYLINE_CONTEXT_RECALL_DAYS": {"type": "integer", "default": 30, "description": "Days a resolved storyline stays in context and mood"},
            "STORYLINE_TIMEZONE_OFFSET_MINUTES": {"type": "integer", "default": 0, "description": "Offset defining calendar days"},
            "STORYLINE_GENERATION_TIMEOUT_SECS": {"type": "integer", "default": 30, "description": "Timeout for each generation call"},
            "STORYLINE_CLOSURE_LENGTH": {"type": "integer", "default": 4, "description": "Closure updates per resolution"},
            "STORYLINE_TICK_INTERVAL_SECS": {"type": "integer", "default": 3600, "description": "Periodic timer cadence"},
            "STORYLINE_RNG_SEED": {"type": "integer", "default": "", "description": "Seed for transition trials"},
            "STORYLINE_PHASE_TABLES_PATH": {"type": "string", "default": "", "description": "JSON file overriding the phase tables"}
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyline_core::{InMemoryStore, NoopGenerator, SystemClock};

    fn plugin() -> StorylinePlugin {
        StorylinePlugin::from_parts(
            Arc::new(InMemoryStore::new()),
            Arc::new(NoopGenerator),
            Arc::new(SystemClock),
            LifecycleConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_plugin_surface() {
        let plugin = plugin();
        assert_eq!(plugin.name(), "storyline");
        assert_eq!(plugin.providers().len(), 2);
        assert_eq!(plugin.services().len(), 1);
        assert_eq!(plugin.services()[0].service_type(), "storyline_engine");

        let schema = plugin.schema().unwrap();
        assert!(schema.get("storylines").is_some());
        assert!(schema.get("engine_markers").is_some());
    }

    #[test]
    fn test_services_share_one_instance() {
        let plugin = plugin();
        let a = plugin.services().remove(0);
        let b = plugin.services().remove(0);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_init_renders_settings() {
        let mut config = HashMap::new();
        config.insert("STORYLINE_MAX_ACTIVE".to_string(), "3".to_string());
        plugin().init(config).await.unwrap();
    }

    #[test]
    fn test_pad_handles_multibyte() {
        assert_eq!(pad("◈ab", 2), "◈a");
        assert_eq!(pad("ab", 4), "ab  ");
    }
}
