//! Integration tests for the SQLite store with real database operations

use chrono::{DateTime, Duration, TimeZone, Utc};
use storyline_core::*;
use storyline_storage_sql::SqliteStore;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 14, 9, 15, 0).unwrap()
}

fn candidate(title: &str, category: StorylineCategory) -> Storyline {
    StorylineCandidate::new(title, category)
        .with_type(StorylineType::Opportunity)
        .with_stakes("Could change everything")
        .with_emotion("excited", 0.8)
        .into_storyline(t0())
}

async fn create(store: &SqliteStore, storyline: &Storyline) {
    let attempt = CreationAttempt::accepted(
        &storyline.title,
        storyline.category,
        CreationSource::Conversation,
        storyline.id,
        storyline.created_at,
    );
    let committed = store
        .commit_creation(storyline, &attempt, Precondition::Any)
        .await
        .unwrap();
    assert!(committed, "Creation should commit");
}

#[tokio::test]
async fn test_sqlite_storyline_crud() {
    let store = SqliteStore::new(":memory:").await.unwrap();
    assert!(store.is_ready().await);

    let storyline = candidate("Job interview at the studio", StorylineCategory::Work);
    create(&store, &storyline).await;

    // Test get
    let retrieved = store.get_storyline(storyline.id).await.unwrap().unwrap();
    assert_eq!(retrieved, storyline);

    // Test list active
    let active = store.list_active_storylines().await.unwrap();
    assert_eq!(active.len(), 1);

    // Test version CAS
    let mut moved = retrieved.clone();
    moved.transition_to(StorylinePhase::Honeymoon, t0() + Duration::days(2));
    assert!(store.update_storyline(&moved).await.unwrap());
    assert!(
        !store.update_storyline(&moved).await.unwrap(),
        "Stale version must not overwrite"
    );

    let stored = store.get_storyline(storyline.id).await.unwrap().unwrap();
    assert_eq!(stored.phase, StorylinePhase::Honeymoon);
    assert_eq!(stored.version, storyline.version + 1);

    let in_phase = store
        .list_storylines_in_phase(StorylinePhase::Honeymoon)
        .await
        .unwrap();
    assert_eq!(in_phase.len(), 1);
}

#[tokio::test]
async fn test_sqlite_created_since_filters_category() {
    let store = SqliteStore::new(":memory:").await.unwrap();

    let work = candidate("New job", StorylineCategory::Work);
    let health = candidate("Running a 10k", StorylineCategory::Health);
    create(&store, &work).await;
    create(&store, &health).await;

    let all = store
        .list_storylines_created_since(t0() - Duration::days(7), None)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let only_work = store
        .list_storylines_created_since(t0() - Duration::days(7), Some(StorylineCategory::Work))
        .await
        .unwrap();
    assert_eq!(only_work.len(), 1);
    assert_eq!(only_work[0].id, work.id);

    let none = store
        .list_storylines_created_since(t0() + Duration::hours(1), None)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_sqlite_cooldown_marker_compare_and_swap() {
    let store = SqliteStore::new(":memory:").await.unwrap();
    assert_eq!(store.get_cooldown_marker().await.unwrap(), None);

    let first = candidate("Adopting a dog", StorylineCategory::Living);
    let attempt = CreationAttempt::accepted(
        &first.title,
        first.category,
        CreationSource::Manual,
        first.id,
        t0(),
    );
    assert!(store
        .commit_creation(&first, &attempt, Precondition::Equals(None))
        .await
        .unwrap());
    assert_eq!(store.get_cooldown_marker().await.unwrap(), Some(t0()));

    // A second writer that read "no marker" loses
    let second = candidate("Learning to bake", StorylineCategory::Personal);
    let attempt = CreationAttempt::accepted(
        &second.title,
        second.category,
        CreationSource::Manual,
        second.id,
        t0(),
    );
    assert!(!store
        .commit_creation(&second, &attempt, Precondition::Equals(None))
        .await
        .unwrap());
    assert!(store.get_storyline(second.id).await.unwrap().is_none());
    assert_eq!(store.recent_creation_attempts(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sqlite_updates_and_cascade() {
    let store = SqliteStore::new(":memory:").await.unwrap();
    let storyline = candidate("Marathon training", StorylineCategory::Health);
    create(&store, &storyline).await;

    let first = StorylineUpdate::new(
        storyline.id,
        UpdateType::InitialReaction,
        "Signed up!",
        "giddy",
        t0(),
    );
    let second = StorylineUpdate::new(
        storyline.id,
        UpdateType::Anticipation,
        "First long run tomorrow",
        "nervous",
        t0() + Duration::days(1),
    )
    .revealed_at(t0() + Duration::days(2));

    store.insert_update(&first).await.unwrap();
    store.insert_update(&second).await.unwrap();

    let updates = store.list_updates(storyline.id).await.unwrap();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].id, first.id);
    assert_eq!(updates[1].reveal_at, Some(t0() + Duration::days(2)));

    let latest = store.latest_update(storyline.id).await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);

    let changed = store
        .commit_mention(&storyline, &[first.id, first.id], t0() + Duration::hours(3))
        .await
        .unwrap();
    assert_eq!(changed, Some(1));

    assert!(store.delete_storyline(storyline.id).await.unwrap());
    assert!(store.list_updates(storyline.id).await.unwrap().is_empty());
    // Cooldown survives deletion
    assert_eq!(store.get_cooldown_marker().await.unwrap(), Some(t0()));
}

#[tokio::test]
async fn test_sqlite_resolution_commit() {
    let store = SqliteStore::new(":memory:").await.unwrap();
    let storyline = candidate("Book proposal", StorylineCategory::Creative);
    create(&store, &storyline).await;

    let resolved_at = t0() + Duration::days(10);
    let mut resolved = storyline.clone();
    resolved.outcome = Some(StorylineOutcome::Success);
    resolved.outcome_description = Some("Accepted by a publisher".into());
    resolved.resolved_at = Some(resolved_at);
    resolved.transition_to(StorylinePhase::Resolved, resolved_at);

    let closure: Vec<StorylineUpdate> = (1..=4)
        .map(|n| {
            StorylineUpdate::new(
                storyline.id,
                UpdateType::Reflection,
                format!("Closure beat {}", n),
                "content",
                resolved_at,
            )
            .revealed_at(resolved_at + Duration::days(n))
        })
        .collect();

    assert!(store.commit_resolution(&resolved, &closure).await.unwrap());
    assert!(
        !store.commit_resolution(&resolved, &closure).await.unwrap(),
        "Second commit with the old version must be rejected"
    );

    assert_eq!(store.list_updates(storyline.id).await.unwrap().len(), 4);
    assert!(store.list_active_storylines().await.unwrap().is_empty());

    let recent = store
        .list_resolved_since(t0() + Duration::days(9))
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].outcome, Some(StorylineOutcome::Success));
}

#[tokio::test]
async fn test_sqlite_mention_commit() {
    let store = SqliteStore::new(":memory:").await.unwrap();
    let storyline = candidate("Pottery class", StorylineCategory::Creative);
    let other = candidate("Moving flats", StorylineCategory::Living);
    create(&store, &storyline).await;
    create(&store, &other).await;

    let own = StorylineUpdate::new(storyline.id, UpdateType::Progress, "First bowl", "proud", t0());
    let foreign = StorylineUpdate::new(other.id, UpdateType::Setback, "Boxes everywhere", "tired", t0());
    store.insert_update(&own).await.unwrap();
    store.insert_update(&foreign).await.unwrap();

    let at = t0() + Duration::hours(3);
    let mut mentioned = storyline.clone();
    mentioned.mention_count += 1;
    mentioned.last_mentioned_at = Some(at);

    // Updates of another storyline are left alone
    let changed = store
        .commit_mention(&mentioned, &[own.id, foreign.id], at)
        .await
        .unwrap();
    assert_eq!(changed, Some(1));
    assert!(store.list_updates(storyline.id).await.unwrap()[0].mentioned);
    assert!(!store.list_updates(other.id).await.unwrap()[0].mentioned);

    let stored = store.get_storyline(storyline.id).await.unwrap().unwrap();
    assert_eq!(stored.mention_count, 1);
    assert_eq!(stored.last_mentioned_at, Some(at));

    assert_eq!(
        store.commit_mention(&mentioned, &[own.id], at).await.unwrap(),
        None,
        "Stale version must write nothing"
    );
    let stored = store.get_storyline(storyline.id).await.unwrap().unwrap();
    assert_eq!(stored.mention_count, 1);
}

#[tokio::test]
async fn test_sqlite_audit_log_round_trip() {
    let store = SqliteStore::new(":memory:").await.unwrap();

    let rejected = CreationAttempt::rejected(
        "New job again",
        StorylineCategory::Work,
        CreationSource::Conversation,
        FailureReason::Cooldown,
        RejectionDiagnostics {
            hours_remaining: Some(30),
            ..Default::default()
        },
        t0(),
    );
    store.append_creation_attempt(&rejected).await.unwrap();

    let later = CreationAttempt::rejected(
        "New job",
        StorylineCategory::Work,
        CreationSource::Autonomous,
        FailureReason::Duplicate,
        RejectionDiagnostics {
            similarity: Some(0.67),
            duplicate_title: Some("New job offer".into()),
            ..Default::default()
        },
        t0() + Duration::minutes(5),
    );
    store.append_creation_attempt(&later).await.unwrap();

    let attempts = store.recent_creation_attempts(1).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0], later);

    let all = store.recent_creation_attempts(10).await.unwrap();
    assert_eq!(all[1], rejected);
}

#[tokio::test]
async fn test_sqlite_processing_marker_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storylines.db");
    let url = format!("sqlite://{}", path.display());
    let day = t0().date_naive();

    {
        let store = SqliteStore::new(&url).await.unwrap();
        assert_eq!(store.get_processing_marker().await.unwrap(), None);
        assert!(store.advance_processing_marker(None, day).await.unwrap());
        assert!(!store.advance_processing_marker(None, day).await.unwrap());
        store.pool().close().await;
    }

    let reopened = SqliteStore::new(&url).await.unwrap();
    assert_eq!(reopened.get_processing_marker().await.unwrap(), Some(day));
    let next = day.succ_opt().unwrap();
    assert!(reopened
        .advance_processing_marker(Some(day), next)
        .await
        .unwrap());
    assert_eq!(reopened.get_processing_marker().await.unwrap(), Some(next));
}
