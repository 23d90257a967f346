//! Storyline Lifecycle Services
//!
//! One module per engine component, plus the facade that wires them together.

mod catch_up;
mod closure;
mod engine;
mod mood_effects;
mod phase_scheduler;
mod prompt_context;
mod safety_gate;
mod update_generator;

pub use catch_up::{day_start, local_day, tick_instant, CatchUpReport, CatchUpRunner};
pub use closure::{closure_sequence, template_content, ClosureBuilder, ResolutionReport};
pub use engine::{StorylineEngine, StorylineEngineService};
pub use mood_effects::{
    aggregate_effects, compute_effects, AggregatedMoodEffect, MoodEffect, MoodEffectAggregator,
    ENERGY_DRAIN_PER_INTENSITY,
};
pub use phase_scheduler::{
    evaluate_transition, PhaseScheduler, SchedulerPassReport, TransitionDecision,
};
pub use prompt_context::{salience, PromptContext, PromptContextSummarizer, RankedStoryline};
pub use safety_gate::{word_overlap, CreationOutcome, Rejection, SafetyGate};
pub use update_generator::{
    build_request, parse_generated_update, GeneratorPassReport, UpdateGenerator,
    RECENT_UPDATE_CONTEXT,
};
