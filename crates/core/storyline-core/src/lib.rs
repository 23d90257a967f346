//! Storyline Core
//!
//! Shared building blocks for the storyline lifecycle engine:
//!
//! - Domain types: storylines, phases, updates, creation audit rows
//! - Enum-indexed phase tables checked for completeness at load time
//! - The persistence port ([`StorylineStore`]) and an in-memory implementation
//! - The text generation port ([`TextGenerator`]) with timeout handling
//! - Clock abstraction, env configuration helpers and logging setup
//! - Plugin, provider and service traits used to host the engine
//!
//! # Example
//!
//! ```no_run
//! use storyline_core::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     init_logging();
//!     let store = InMemoryStore::new();
//!     let active = store.list_active_storylines().await?;
//!     println!("{} active storylines", active.len());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub use uuid::Uuid;

pub mod clock;
pub mod config;
pub mod error;
pub mod generation;
pub mod logging;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    get_env_bool, get_env_or, get_env_parsed, get_env_parsed_or, get_required_env, load_env,
    load_env_from_path,
};
pub use error::{Result, StorylineError};
pub use generation::{
    generate_with_timeout, GeneratedUpdate, GenerationRequest, NoopGenerator, TextGenerator,
};
#[cfg(any(test, feature = "testing"))]
pub use generation::MockTextGenerator;
pub use logging::init_logging;
pub use store::{InMemoryStore, Precondition, StoreOperation, StorylineStore};
pub use types::*;
