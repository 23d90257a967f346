//! Storyline Runner
//!
//! Runs the storyline engine against a SQLite database, either as a long-lived
//! loop or one operation at a time.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use storyline_core::{
    get_env_or, init_logging, load_env, load_env_from_path, CreationSource, NoopGenerator,
    Plugin, StorylineCandidate, StorylineCategory, StorylineOutcome, StorylineType,
    SystemClock, TextGenerator,
};
use storyline_plugin_lifecycle::{LifecycleConfig, StorylinePlugin};
use storyline_provider_openai::OpenAiTextGenerator;
use storyline_storage_sql::SqliteStore;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database (defaults to STORYLINE_DATABASE_PATH or sqlite:storyline.db)
    #[arg(short, long)]
    database: Option<String>,

    /// Extra .env file to load
    #[arg(long)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Catch up, then keep the periodic timer running until ctrl-c
    Run,

    /// Replay missed daily ticks once
    CatchUp,

    /// Try to start a storyline
    Create {
        #[arg(short, long)]
        title: String,

        /// work, relationships, health, personal, finance, living, creative
        #[arg(short, long)]
        category: String,

        /// project, opportunity, challenge, relationship, learning, pending_event
        #[arg(long, default_value = "project")]
        kind: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        stakes: Option<String>,

        #[arg(long, default_value = "hopeful")]
        tone: String,

        #[arg(long, default_value_t = 0.5)]
        intensity: f64,

        /// conversation, autonomous, manual
        #[arg(long, default_value = "manual")]
        source: String,
    },

    /// Resolve a storyline and schedule its closure
    Resolve {
        #[arg(long)]
        id: Uuid,

        /// success, failure, mixed, abandoned
        #[arg(short, long)]
        outcome: String,

        #[arg(long)]
        description: Option<String>,
    },

    /// Print the prompt context
    Context {
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print the rendered text block instead of JSON
        #[arg(long)]
        text: bool,
    },

    /// Print aggregated mood effects
    Mood,

    /// List recent creation attempts, newest first
    Attempts {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Record that a storyline came up in conversation
    Mention {
        #[arg(long)]
        id: Uuid,

        /// Updates that were brought up
        #[arg(long = "update")]
        updates: Vec<Uuid>,
    },

    /// Delete a storyline and its updates
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn text_generator() -> Result<Arc<dyn TextGenerator>> {
    if std::env::var("OPENAI_API_KEY").is_ok() {
        let generator = OpenAiTextGenerator::from_env().context("configuring OpenAI generator")?;
        tracing::info!(model = generator.model(), "Using OpenAI text generator");
        Ok(Arc::new(generator))
    } else {
        tracing::warn!("OPENAI_API_KEY not set, closure will use templates and no updates are generated");
        Ok(Arc::new(NoopGenerator))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => load_env_from_path(path)?,
        None => load_env()?,
    }
    init_logging();

    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| get_env_or("STORYLINE_DATABASE_PATH", "sqlite:storyline.db"));
    let store = Arc::new(SqliteStore::new(&database).await?);
    let config = LifecycleConfig::from_env()?;
    let plugin = StorylinePlugin::from_parts(store, text_generator()?, Arc::new(SystemClock), config)?;
    let engine = plugin.engine().clone();

    match cli.command {
        Command::Run => {
            plugin.init(Default::default()).await?;
            let services = plugin.services();
            for service in &services {
                service.start().await?;
            }
            tracing::info!("Storyline engine running, press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            for service in &services {
                service.stop().await?;
            }
        }
        Command::CatchUp => print_json(&engine.catch_up().await?)?,
        Command::Create {
            title,
            category,
            kind,
            description,
            stakes,
            tone,
            intensity,
            source,
        } => {
            let mut candidate = StorylineCandidate::new(title, category.parse::<StorylineCategory>()?)
                .with_type(kind.parse::<StorylineType>()?)
                .with_emotion(tone, intensity)
                .with_source(source.parse::<CreationSource>()?);
            if let Some(description) = description {
                candidate = candidate.with_description(description);
            }
            if let Some(stakes) = stakes {
                candidate = candidate.with_stakes(stakes);
            }
            print_json(&engine.attempt_create(candidate).await?)?;
        }
        Command::Resolve {
            id,
            outcome,
            description,
        } => {
            let outcome = outcome.parse::<StorylineOutcome>()?;
            print_json(&engine.resolve(id, outcome, description).await?)?;
        }
        Command::Context { limit, text } => {
            let context = engine.build_context(limit).await?;
            if text {
                println!("{}", context.to_prompt_block());
            } else {
                print_json(&context)?;
            }
        }
        Command::Mood => print_json(&engine.mood().await?)?,
        Command::Attempts { limit } => print_json(&engine.recent_attempts(limit).await?)?,
        Command::Mention { id, updates } => {
            let marked = engine.mark_mentioned(id, &updates).await?;
            println!("{} update(s) marked as mentioned", marked);
        }
        Command::Delete { id } => {
            if engine.delete_storyline(id).await? {
                println!("Deleted storyline {}", id);
            } else {
                anyhow::bail!("storyline {} not found", id);
            }
        }
    }

    Ok(())
}
