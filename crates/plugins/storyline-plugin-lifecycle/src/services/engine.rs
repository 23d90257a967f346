//! Storyline engine facade and background service
//!
//! [`StorylineEngine`] wires the components to one store, one generator and
//! one clock. [`StorylineEngineService`] owns an engine, replays missed days on
//! start and then keeps a periodic timer running the catch-up.

use super::catch_up::{CatchUpReport, CatchUpRunner};
use super::closure::{ClosureBuilder, ResolutionReport};
use super::mood_effects::{AggregatedMoodEffect, MoodEffect, MoodEffectAggregator};
use super::phase_scheduler::PhaseScheduler;
use super::prompt_context::{PromptContext, PromptContextSummarizer};
use super::safety_gate::{CreationOutcome, SafetyGate};
use super::update_generator::UpdateGenerator;
use crate::types::LifecycleConfig;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use storyline_core::{
    Clock, CreationAttempt, Result, Service, ServiceHealth, Storyline, StorylineCandidate,
    StorylineOutcome, StorylineStore, TextGenerator, Uuid,
};
use tokio::task::JoinHandle;

/// All storyline operations behind one handle
pub struct StorylineEngine {
    store: Arc<dyn StorylineStore>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    gate: SafetyGate,
    closure: Arc<ClosureBuilder>,
    mood: MoodEffectAggregator,
    context: PromptContextSummarizer,
    catch_up: CatchUpRunner,
}

impl StorylineEngine {
    /// Build an engine; fails on an invalid configuration
    pub fn new(
        store: Arc<dyn StorylineStore>,
        generator: Arc<dyn TextGenerator>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Result<Self> {
        config.validate()?;
        let offset = config.timezone()?;
        let tables = Arc::new(config.tables.clone());
        let timeout = config.generation_timeout();

        let scheduler = Arc::new(PhaseScheduler::new(
            store.clone(),
            tables.clone(),
            config.rng_seed,
        ));
        let updates = Arc::new(UpdateGenerator::new(
            store.clone(),
            generator.clone(),
            tables.clone(),
            timeout,
        ));
        let closure = Arc::new(ClosureBuilder::new(
            store.clone(),
            generator,
            timeout,
            config.closure_length,
        ));

        Ok(Self {
            gate: SafetyGate::new(store.clone(), clock.clone(), config.gate.clone()),
            mood: MoodEffectAggregator::new(store.clone(), tables.mood.clone(), &config.context),
            context: PromptContextSummarizer::new(
                store.clone(),
                tables.urgency.clone(),
                config.context.clone(),
            ),
            catch_up: CatchUpRunner::new(
                store.clone(),
                scheduler,
                updates,
                closure.clone(),
                offset,
            ),
            closure,
            store,
            clock,
            config,
        })
    }

    /// Engine settings
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// The engine's time source
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Try to start a storyline; rejections are values, not errors
    pub async fn attempt_create(&self, candidate: StorylineCandidate) -> Result<CreationOutcome> {
        self.gate.attempt_create(candidate).await
    }

    /// Resolve a storyline and schedule its closure
    pub async fn resolve(
        &self,
        id: Uuid,
        outcome: StorylineOutcome,
        description: Option<String>,
    ) -> Result<ResolutionReport> {
        self.closure
            .resolve(id, outcome, description, self.clock.now())
            .await
    }

    /// Ranked storylines for the prompt
    pub async fn build_context(&self, limit: Option<usize>) -> Result<PromptContext> {
        self.context
            .build_context_with_limit(self.clock.now(), limit)
            .await
    }

    /// Record that a storyline came up in conversation
    pub async fn mark_mentioned(&self, storyline_id: Uuid, update_ids: &[Uuid]) -> Result<u64> {
        self.context
            .mark_mentioned(storyline_id, update_ids, self.clock.now())
            .await
    }

    /// Aggregated mood contribution
    pub async fn mood(&self) -> Result<AggregatedMoodEffect> {
        self.mood.aggregate(self.clock.now()).await
    }

    /// Per-storyline mood contributions
    pub async fn mood_effects(&self) -> Result<Vec<MoodEffect>> {
        self.mood.effects(self.clock.now()).await
    }

    /// Replay any missed daily ticks
    pub async fn catch_up(&self) -> Result<CatchUpReport> {
        self.catch_up.run(self.clock.now()).await
    }

    /// Remove a storyline and its updates; the cooldown marker is untouched
    pub async fn delete_storyline(&self, id: Uuid) -> Result<bool> {
        let deleted = self.store.delete_storyline(id).await?;
        if deleted {
            tracing::info!(storyline_id = %id, "Storyline deleted");
        }
        Ok(deleted)
    }

    pub async fn get_storyline(&self, id: Uuid) -> Result<Option<Storyline>> {
        self.store.get_storyline(id).await
    }

    pub async fn list_active(&self) -> Result<Vec<Storyline>> {
        self.store.list_active_storylines().await
    }

    /// Audit rows, newest first
    pub async fn recent_attempts(&self, limit: usize) -> Result<Vec<CreationAttempt>> {
        self.store.recent_creation_attempts(limit).await
    }

    fn catch_up_runner(&self) -> &CatchUpRunner {
        &self.catch_up
    }
}

/// Runs the engine's periodic timer
pub struct StorylineEngineService {
    engine: Arc<StorylineEngine>,
    running: Arc<AtomicBool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl StorylineEngineService {
    pub fn new(engine: Arc<StorylineEngine>) -> Self {
        Self {
            engine,
            running: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
        }
    }

    /// The engine this service drives
    pub fn engine(&self) -> &Arc<StorylineEngine> {
        &self.engine
    }
}

#[async_trait]
impl Service for StorylineEngineService {
    fn service_type(&self) -> &str {
        "storyline_engine"
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.catch_up_runner().reset();

        match self.engine.catch_up().await {
            Ok(report) => tracing::info!(
                days = report.days_processed,
                transitions = report.transitions,
                "Startup catch-up complete"
            ),
            Err(e) => tracing::warn!(error = %e, "Startup catch-up failed, timer will retry"),
        }

        let engine = self.engine.clone();
        let running = self.running.clone();
        let period = engine.config().tick_interval();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                if let Err(e) = engine.catch_up().await {
                    tracing::warn!(error = %e, "Periodic catch-up failed");
                }
            }
        });

        *self.timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        tracing::info!(
            tick_interval_secs = period.as_secs(),
            "Storyline engine started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.catch_up_runner().cancel();
        let handle = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        tracing::info!("Storyline engine stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn health_check(&self) -> Result<ServiceHealth> {
        if !self.is_running() {
            return Ok(ServiceHealth::Degraded);
        }
        match self.engine.store.get_processing_marker().await {
            Ok(_) => Ok(ServiceHealth::Healthy),
            Err(e) => {
                tracing::warn!(error = %e, "Storyline store unreachable");
                Ok(ServiceHealth::Unhealthy)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use storyline_core::{
        InMemoryStore, ManualClock, NoopGenerator, StoreOperation, StorylineCategory,
        StorylinePhase,
    };

    fn engine() -> (Arc<StorylineEngine>, Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap(),
        ));
        let config = LifecycleConfig {
            rng_seed: Some(5),
            ..Default::default()
        };
        let engine =
            StorylineEngine::new(store.clone(), Arc::new(NoopGenerator), clock.clone(), config)
                .unwrap();
        (Arc::new(engine), store, clock)
    }

    #[tokio::test]
    async fn test_create_resolve_and_delete() {
        let (engine, store, clock) = engine();
        let created = engine
            .attempt_create(StorylineCandidate::new("Adopting a cat", StorylineCategory::Living))
            .await
            .unwrap();
        let id = created.storyline_id().unwrap();

        clock.advance(Duration::days(2));
        let report = engine
            .resolve(id, StorylineOutcome::Success, Some("Her name is Miso".into()))
            .await
            .unwrap();
        assert_eq!(report.storyline.phase, StorylinePhase::Resolved);

        assert!(engine.delete_storyline(id).await.unwrap());
        assert!(store.list_updates(id).await.unwrap().is_empty());
        // deletion does not give back the cooldown
        assert!(store.get_cooldown_marker().await.unwrap().is_some());
        assert_eq!(engine.recent_attempts(10).await.unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = LifecycleConfig {
            closure_length: 0,
            ..Default::default()
        };
        let result = StorylineEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(NoopGenerator),
            Arc::new(ManualClock::new(Utc::now())),
            config,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_service_start_stop() {
        let (engine, store, _clock) = engine();
        let service = StorylineEngineService::new(engine);

        service.start().await.unwrap();
        assert!(service.is_running());
        assert!(store.get_processing_marker().await.unwrap().is_some());
        assert_eq!(service.health_check().await.unwrap(), ServiceHealth::Healthy);

        store.fail_on(StoreOperation::ProcessingMarker);
        assert_eq!(service.health_check().await.unwrap(), ServiceHealth::Unhealthy);
        store.heal();

        service.stop().await.unwrap();
        assert!(!service.is_running());
        service.stop().await.unwrap();
    }
}
