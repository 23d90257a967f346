//! End-to-end storyline scenarios on the in-memory store and a manual clock

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use storyline_core::{
    Clock, FailureReason, InMemoryStore, ManualClock, MockTextGenerator, NoopGenerator,
    StorylineCandidate, StorylineCategory, StorylineOutcome, StorylinePhase, StorylineStore,
    TextGenerator, UpdateType,
};
use storyline_plugin_lifecycle::{
    CreationOutcome, LifecycleConfig, PhaseScheduler, StorylineEngine, TransitionRule,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 5, 9, 0, 0).unwrap()
}

struct Harness {
    engine: StorylineEngine,
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
}

fn harness_with(config: LifecycleConfig, generator: Arc<dyn TextGenerator>) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = StorylineEngine::new(store.clone(), generator, clock.clone(), config).unwrap();
    Harness {
        engine,
        store,
        clock,
    }
}

fn seeded_config() -> LifecycleConfig {
    LifecycleConfig {
        rng_seed: Some(11),
        ..Default::default()
    }
}

/// Generator that always answers with the first beat it is allowed to write
fn cooperative_generator() -> MockTextGenerator {
    let mut mock = MockTextGenerator::new();
    mock.expect_generate().returning(|req| {
        let beat = req
            .requested_update_type
            .unwrap_or(req.allowed_update_types[0]);
        Ok(format!(
            r#"{{"updateType":"{}","content":"{} news about {}","emotionalTone":"hopeful"}}"#,
            beat, beat, req.title
        ))
    });
    mock
}

#[tokio::test]
async fn cooldown_rejects_with_hours_remaining() {
    let h = harness_with(seeded_config(), Arc::new(NoopGenerator));

    let first = h
        .engine
        .attempt_create(StorylineCandidate::new("Starting a podcast", StorylineCategory::Creative))
        .await
        .unwrap();
    assert!(first.storyline_id().is_some());

    h.clock.advance(Duration::hours(10));
    let second = h
        .engine
        .attempt_create(StorylineCandidate::new("Saving for a car", StorylineCategory::Finance))
        .await
        .unwrap();

    let rejection = second.rejection().unwrap();
    assert_eq!(rejection.reason, FailureReason::Cooldown);
    assert_eq!(rejection.diagnostics.hours_remaining, Some(38));

    let attempts = h.engine.recent_attempts(10).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].success);
    assert!(attempts[1].success);
}

#[tokio::test]
async fn duplicate_threshold_decides_word_overlap_of_one_half() {
    for (threshold, expect_duplicate) in [(0.6, false), (0.5, true)] {
        let mut config = seeded_config();
        config.gate.cooldown_hours = 0;
        config.gate.max_active = 5;
        config.gate.similarity_threshold = threshold;
        let h = harness_with(config, Arc::new(NoopGenerator));

        h.engine
            .attempt_create(StorylineCandidate::new("Learning guitar", StorylineCategory::Personal))
            .await
            .unwrap();
        let outcome = h
            .engine
            .attempt_create(StorylineCandidate::new(
                "Learning to play guitar",
                StorylineCategory::Personal,
            ))
            .await
            .unwrap();

        match (outcome, expect_duplicate) {
            (CreationOutcome::Rejected(rejection), true) => {
                assert_eq!(rejection.reason, FailureReason::Duplicate);
                assert_eq!(rejection.diagnostics.similarity, Some(0.5));
            }
            (CreationOutcome::Accepted { .. }, false) => {}
            (other, _) => panic!("threshold {}: unexpected {:?}", threshold, other),
        }
    }
}

#[tokio::test]
async fn scheduler_forces_transition_at_max_days() {
    let store = Arc::new(InMemoryStore::new());
    let storyline = StorylineCandidate::new("Learning guitar", StorylineCategory::Personal)
        .into_storyline(t0());
    store.seed_storyline(storyline.clone()).unwrap();

    let mut tables = LifecycleConfig::default().tables;
    tables.transitions.set(
        StorylinePhase::Announced,
        Some(TransitionRule::new(1, 3, 0.0, StorylinePhase::Honeymoon)),
    );
    let scheduler = PhaseScheduler::new(store.clone(), Arc::new(tables), Some(1));

    scheduler
        .run_pass(t0() + Duration::days(3) - Duration::seconds(1))
        .await
        .unwrap();
    let stored = store.get_storyline(storyline.id).await.unwrap().unwrap();
    assert_eq!(stored.phase, StorylinePhase::Announced);

    let report = scheduler.run_pass(t0() + Duration::days(3)).await.unwrap();
    assert_eq!(report.forced, 1);
    let stored = store.get_storyline(storyline.id).await.unwrap().unwrap();
    assert_eq!(stored.phase, StorylinePhase::Honeymoon);
}

#[tokio::test]
async fn catch_up_replays_missed_days_once() {
    let mut config = seeded_config();
    config.tables.transitions.set(
        StorylinePhase::Announced,
        Some(TransitionRule::new(1, 3, 0.0, StorylinePhase::Honeymoon)),
    );
    let h = harness_with(config, Arc::new(cooperative_generator()));

    // First run records today
    assert_eq!(h.engine.catch_up().await.unwrap().days_processed, 0);
    let id = h
        .engine
        .attempt_create(StorylineCandidate::new("New apartment", StorylineCategory::Living))
        .await
        .unwrap()
        .storyline_id()
        .unwrap();

    h.clock.advance(Duration::days(3));
    let report = h.engine.catch_up().await.unwrap();
    assert_eq!(report.days_processed, 3);
    assert_eq!(report.transitions, 1);
    assert!(report.updates_generated >= 1);

    let after_first = h.engine.get_storyline(id).await.unwrap().unwrap();
    assert_eq!(after_first.phase, StorylinePhase::Honeymoon);
    assert_eq!(after_first.phase_started_at, h.clock.now());
    let updates_first = h.store.list_updates(id).await.unwrap().len();

    // Same calendar day: nothing changes
    h.clock.advance(Duration::hours(5));
    let again = h.engine.catch_up().await.unwrap();
    assert_eq!(again.days_processed, 0);
    assert_eq!(h.engine.get_storyline(id).await.unwrap().unwrap(), after_first);
    assert_eq!(h.store.list_updates(id).await.unwrap().len(), updates_first);
}

#[tokio::test]
async fn resolve_schedules_four_daily_reveals_and_hides_them_until_due() {
    let h = harness_with(seeded_config(), Arc::new(cooperative_generator()));
    let id = h
        .engine
        .attempt_create(
            StorylineCandidate::new("Job interview", StorylineCategory::Work)
                .with_emotion("nervous", 0.8),
        )
        .await
        .unwrap()
        .storyline_id()
        .unwrap();

    h.clock.advance(Duration::days(6));
    let resolved_at = h.clock.now();
    let report = h
        .engine
        .resolve(id, StorylineOutcome::Success, Some("Got the job".into()))
        .await
        .unwrap();
    assert_eq!(report.storyline.phase, StorylinePhase::Resolved);
    assert_eq!(report.closure.len(), 4);
    assert_eq!(report.generated, 4);
    let reveal_days: Vec<_> = report
        .closure
        .iter()
        .map(|u| u.reveal_at.unwrap().date_naive())
        .collect();
    let expected: Vec<_> = (1..=4)
        .map(|n| (resolved_at + Duration::days(n)).date_naive())
        .collect();
    assert_eq!(reveal_days, expected);
    assert_eq!(report.closure[1].update_type, UpdateType::Gratitude);

    let context = h.engine.build_context(None).await.unwrap();
    assert!(context.unrevealed_updates.is_empty());
    assert!(!context.has_active);

    for day in 1..=4 {
        h.clock.set(resolved_at + Duration::days(day));
        let context = h.engine.build_context(None).await.unwrap();
        let visible = &context.ranked_storylines[0].recent_updates;
        let closure_visible = visible.iter().filter(|u| u.reveal_at.is_some()).count();
        assert_eq!(closure_visible as i64, day.min(3));
        for update in visible {
            assert!(update.reveal_at.map_or(true, |at| at <= h.clock.now()));
        }
    }
}

#[tokio::test]
async fn settled_storyline_moves_to_reflecting_on_daily_tick() {
    let h = harness_with(seeded_config(), Arc::new(NoopGenerator));
    h.engine.catch_up().await.unwrap();
    let id = h
        .engine
        .attempt_create(StorylineCandidate::new("Bake sale", StorylineCategory::Relationships))
        .await
        .unwrap()
        .storyline_id()
        .unwrap();
    h.engine
        .resolve(id, StorylineOutcome::Mixed, None)
        .await
        .unwrap();

    h.clock.advance(Duration::days(5));
    let report = h.engine.catch_up().await.unwrap();
    assert_eq!(report.settled, 1);

    let stored = h.engine.get_storyline(id).await.unwrap().unwrap();
    assert_eq!(stored.phase, StorylinePhase::Reflecting);
    stored.check_invariants(h.clock.now()).unwrap();
}

#[tokio::test]
async fn mood_tracks_phase_changes() {
    let mut config = seeded_config();
    config.tables.transitions.set(
        StorylinePhase::Announced,
        Some(TransitionRule::new(0, 0, 0.0, StorylinePhase::Honeymoon)),
    );
    let h = harness_with(config, Arc::new(NoopGenerator));
    h.engine.catch_up().await.unwrap();
    h.engine
        .attempt_create(
            StorylineCandidate::new("Road trip", StorylineCategory::Living)
                .with_emotion("excited", 1.0),
        )
        .await
        .unwrap();

    let announced = h.engine.mood().await.unwrap();
    assert!((announced.mood_delta - 0.3).abs() < 1e-9);

    h.clock.advance(Duration::days(1));
    h.engine.catch_up().await.unwrap();
    let honeymoon = h.engine.mood().await.unwrap();
    assert!((honeymoon.mood_delta - 0.5).abs() < 1e-9);
    assert_eq!(honeymoon.energy_delta, 0.0);
}

#[tokio::test]
async fn generator_outage_never_breaks_the_tick() {
    let mut mock = MockTextGenerator::new();
    mock.expect_generate()
        .returning(|_| Err(storyline_core::StorylineError::generation("backend down")));
    let h = harness_with(seeded_config(), Arc::new(mock));
    h.engine.catch_up().await.unwrap();
    let id = h
        .engine
        .attempt_create(StorylineCandidate::new("Marathon", StorylineCategory::Health))
        .await
        .unwrap()
        .storyline_id()
        .unwrap();

    h.clock.advance(Duration::days(2));
    let report = h.engine.catch_up().await.unwrap();
    assert_eq!(report.days_processed, 2);
    assert_eq!(report.updates_generated, 0);

    // closure falls back to templates
    let resolution = h
        .engine
        .resolve(id, StorylineOutcome::Abandoned, None)
        .await
        .unwrap();
    assert_eq!(resolution.generated, 0);
    assert!(resolution.closure[0].content.contains("Marathon"));
}
