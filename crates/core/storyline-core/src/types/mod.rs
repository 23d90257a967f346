//! Core domain types

mod audit;
mod components;
mod phase;
mod plugin;
mod service;
mod storyline;
mod update;

pub use audit::*;
pub use components::*;
pub use phase::*;
pub use plugin::*;
pub use service::*;
pub use storyline::{
    Storyline, StorylineCandidate, StorylineCategory, StorylineOutcome, StorylineType,
};
pub use update::*;
