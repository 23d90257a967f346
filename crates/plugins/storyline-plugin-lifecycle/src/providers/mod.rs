//! Storyline Providers
//!
//! Providers that hand storyline context and mood pressure to prompt builders.

mod mood_effect;
mod storyline_context;

pub use mood_effect::MoodEffectProvider;
pub use storyline_context::{StorylineContextProvider, CONTEXT_LIMIT_KEY};
