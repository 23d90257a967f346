//! SQLite storyline store
//!
//! Timestamps are stored as INTEGER milliseconds since the epoch, ids and enum
//! values as TEXT. Optimistic concurrency uses the `version` column; atomic
//! writes run in a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use storyline_core::{
    CreationAttempt, Precondition, RejectionDiagnostics, Result, Storyline, StorylineCategory,
    StorylineError, StorylinePhase, StorylineStore, StorylineUpdate,
};
use tracing::{debug, info};
use uuid::Uuid;

const COOLDOWN_MARKER: &str = "cooldown";
const PROCESSING_MARKER: &str = "processing";

const STORYLINE_COLUMNS: &str = "id, title, category, storyline_type, description, stakes, \
    phase, phase_started_at, emotional_tone, emotional_intensity, outcome, \
    outcome_description, mention_count, last_mentioned_at, should_mention_by, \
    created_at, resolved_at, updated_at, version";

const UPDATE_COLUMNS: &str = "id, storyline_id, update_type, content, emotional_tone, \
    mentioned, mentioned_at, reveal_at, created_at";

/// SQLite-backed [`StorylineStore`]
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_path` and make sure
    /// the schema exists.
    ///
    /// `:memory:` and `sqlite::memory:` open a private in-memory database held
    /// by a single long-lived connection.
    pub async fn new(database_path: &str) -> Result<Self> {
        info!("Opening SQLite database at: {}", database_path);

        let opts = SqliteConnectOptions::from_str(database_path)
            .map_err(|e| StorylineError::database(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = database_path.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options.connect_with(opts).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check that the database answers
    pub async fn is_ready(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    async fn init_schema(&self) -> Result<()> {
        debug!("Initializing storyline schema...");

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS storylines (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                storyline_type TEXT NOT NULL,
                description TEXT,
                stakes TEXT,
                phase TEXT NOT NULL,
                phase_started_at INTEGER NOT NULL,
                emotional_tone TEXT NOT NULL,
                emotional_intensity REAL NOT NULL,
                outcome TEXT,
                outcome_description TEXT,
                mention_count INTEGER NOT NULL DEFAULT 0,
                last_mentioned_at INTEGER,
                should_mention_by INTEGER,
                created_at INTEGER NOT NULL,
                resolved_at INTEGER,
                updated_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS storyline_updates (
                id TEXT PRIMARY KEY,
                storyline_id TEXT NOT NULL REFERENCES storylines(id) ON DELETE CASCADE,
                update_type TEXT NOT NULL,
                content TEXT NOT NULL,
                emotional_tone TEXT NOT NULL,
                mentioned INTEGER NOT NULL DEFAULT 0,
                mentioned_at INTEGER,
                reveal_at INTEGER,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Append-only; rows are never updated or deleted
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS creation_attempts (
                id TEXT PRIMARY KEY,
                attempted_at INTEGER NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                source TEXT NOT NULL,
                success INTEGER NOT NULL,
                failure_reason TEXT,
                diagnostics TEXT NOT NULL DEFAULT '{}',
                storyline_id TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_markers (
                name TEXT PRIMARY KEY,
                instant INTEGER,
                day TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_storylines_outcome ON storylines(outcome)",
            "CREATE INDEX IF NOT EXISTS idx_storylines_created ON storylines(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_storylines_category ON storylines(category, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_storylines_resolved ON storylines(resolved_at)",
            "CREATE INDEX IF NOT EXISTS idx_updates_storyline ON storyline_updates(storyline_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_attempts_time ON creation_attempts(attempted_at)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        debug!("Storyline schema ready");
        Ok(())
    }

    async fn fetch_storylines(&self, filter: &str, binds: &[Bind]) -> Result<Vec<Storyline>> {
        let sql = format!(
            "SELECT {} FROM storylines {} ORDER BY created_at ASC, id ASC",
            STORYLINE_COLUMNS, filter
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = match bind {
                Bind::Int(v) => query.bind(*v),
                Bind::Text(v) => query.bind(v.clone()),
            };
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_storyline).collect()
    }
}

enum Bind {
    Int(i64),
    Text(String),
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorylineError::database(format!("Invalid timestamp: {}", ms)))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StorylineError::database(format!("Invalid UUID: {}", e)))
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| StorylineError::database(format!("Invalid marker day '{}': {}", raw, e)))
}

fn row_to_storyline(row: &SqliteRow) -> Result<Storyline> {
    let id: String = row.try_get("id")?;
    let category: String = row.try_get("category")?;
    let storyline_type: String = row.try_get("storyline_type")?;
    let phase: String = row.try_get("phase")?;
    let outcome: Option<String> = row.try_get("outcome")?;
    let mention_count: i64 = row.try_get("mention_count")?;

    Ok(Storyline {
        id: parse_uuid(&id)?,
        title: row.try_get("title")?,
        category: category.parse()?,
        storyline_type: storyline_type.parse()?,
        description: row.try_get("description")?,
        stakes: row.try_get("stakes")?,
        phase: phase.parse()?,
        phase_started_at: from_millis(row.try_get("phase_started_at")?)?,
        emotional_tone: row.try_get("emotional_tone")?,
        emotional_intensity: row.try_get("emotional_intensity")?,
        outcome: outcome.as_deref().map(str::parse).transpose()?,
        outcome_description: row.try_get("outcome_description")?,
        mention_count: u32::try_from(mention_count).unwrap_or(u32::MAX),
        last_mentioned_at: opt_from_millis(row.try_get("last_mentioned_at")?)?,
        should_mention_by: opt_from_millis(row.try_get("should_mention_by")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        resolved_at: opt_from_millis(row.try_get("resolved_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        version: row.try_get("version")?,
    })
}

fn row_to_update(row: &SqliteRow) -> Result<StorylineUpdate> {
    let id: String = row.try_get("id")?;
    let storyline_id: String = row.try_get("storyline_id")?;
    let update_type: String = row.try_get("update_type")?;
    let mentioned: i64 = row.try_get("mentioned")?;

    Ok(StorylineUpdate {
        id: parse_uuid(&id)?,
        storyline_id: parse_uuid(&storyline_id)?,
        update_type: update_type.parse()?,
        content: row.try_get("content")?,
        emotional_tone: row.try_get("emotional_tone")?,
        mentioned: mentioned != 0,
        mentioned_at: opt_from_millis(row.try_get("mentioned_at")?)?,
        reveal_at: opt_from_millis(row.try_get("reveal_at")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn row_to_attempt(row: &SqliteRow) -> Result<CreationAttempt> {
    let id: String = row.try_get("id")?;
    let category: String = row.try_get("category")?;
    let source: String = row.try_get("source")?;
    let success: i64 = row.try_get("success")?;
    let failure_reason: Option<String> = row.try_get("failure_reason")?;
    let diagnostics: String = row.try_get("diagnostics")?;
    let storyline_id: Option<String> = row.try_get("storyline_id")?;

    Ok(CreationAttempt {
        id: parse_uuid(&id)?,
        attempted_at: from_millis(row.try_get("attempted_at")?)?,
        title: row.try_get("title")?,
        category: category.parse()?,
        source: source.parse()?,
        success: success != 0,
        failure_reason: failure_reason.as_deref().map(str::parse).transpose()?,
        diagnostics: serde_json::from_str::<RejectionDiagnostics>(&diagnostics)?,
        storyline_id: storyline_id.as_deref().map(parse_uuid).transpose()?,
    })
}

async fn insert_storyline<'e, E>(executor: E, storyline: &Storyline) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(&format!(
        "INSERT INTO storylines ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        STORYLINE_COLUMNS
    ))
    .bind(storyline.id.to_string())
    .bind(&storyline.title)
    .bind(storyline.category.as_str())
    .bind(storyline.storyline_type.as_str())
    .bind(&storyline.description)
    .bind(&storyline.stakes)
    .bind(storyline.phase.as_str())
    .bind(to_millis(storyline.phase_started_at))
    .bind(&storyline.emotional_tone)
    .bind(storyline.emotional_intensity)
    .bind(storyline.outcome.map(|o| o.as_str()))
    .bind(&storyline.outcome_description)
    .bind(i64::from(storyline.mention_count))
    .bind(storyline.last_mentioned_at.map(to_millis))
    .bind(storyline.should_mention_by.map(to_millis))
    .bind(to_millis(storyline.created_at))
    .bind(storyline.resolved_at.map(to_millis))
    .bind(to_millis(storyline.updated_at))
    .bind(storyline.version)
    .execute(executor)
    .await?;
    Ok(())
}

async fn swap_storyline<'e, E>(executor: E, storyline: &Storyline) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE storylines SET
            title = ?, category = ?, storyline_type = ?, description = ?, stakes = ?,
            phase = ?, phase_started_at = ?, emotional_tone = ?, emotional_intensity = ?,
            outcome = ?, outcome_description = ?, mention_count = ?, last_mentioned_at = ?,
            should_mention_by = ?, resolved_at = ?, updated_at = ?, version = version + 1
        WHERE id = ? AND version = ?
    "#,
    )
    .bind(&storyline.title)
    .bind(storyline.category.as_str())
    .bind(storyline.storyline_type.as_str())
    .bind(&storyline.description)
    .bind(&storyline.stakes)
    .bind(storyline.phase.as_str())
    .bind(to_millis(storyline.phase_started_at))
    .bind(&storyline.emotional_tone)
    .bind(storyline.emotional_intensity)
    .bind(storyline.outcome.map(|o| o.as_str()))
    .bind(&storyline.outcome_description)
    .bind(i64::from(storyline.mention_count))
    .bind(storyline.last_mentioned_at.map(to_millis))
    .bind(storyline.should_mention_by.map(to_millis))
    .bind(storyline.resolved_at.map(to_millis))
    .bind(to_millis(storyline.updated_at))
    .bind(storyline.id.to_string())
    .bind(storyline.version)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn insert_update_row<'e, E>(executor: E, update: &StorylineUpdate) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(&format!(
        "INSERT INTO storyline_updates ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        UPDATE_COLUMNS
    ))
    .bind(update.id.to_string())
    .bind(update.storyline_id.to_string())
    .bind(update.update_type.as_str())
    .bind(&update.content)
    .bind(&update.emotional_tone)
    .bind(i64::from(update.mentioned))
    .bind(update.mentioned_at.map(to_millis))
    .bind(update.reveal_at.map(to_millis))
    .bind(to_millis(update.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_attempt_row<'e, E>(executor: E, attempt: &CreationAttempt) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO creation_attempts
            (id, attempted_at, title, category, source, success, failure_reason, diagnostics, storyline_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(attempt.id.to_string())
    .bind(to_millis(attempt.attempted_at))
    .bind(&attempt.title)
    .bind(attempt.category.as_str())
    .bind(attempt.source.as_str())
    .bind(i64::from(attempt.success))
    .bind(attempt.failure_reason.map(|r| r.as_str()))
    .bind(serde_json::to_string(&attempt.diagnostics)?)
    .bind(attempt.storyline_id.map(|id| id.to_string()))
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl StorylineStore for SqliteStore {
    async fn get_storyline(&self, id: Uuid) -> Result<Option<Storyline>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM storylines WHERE id = ?",
            STORYLINE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_storyline).transpose()
    }

    async fn list_active_storylines(&self) -> Result<Vec<Storyline>> {
        self.fetch_storylines("WHERE outcome IS NULL", &[]).await
    }

    async fn list_storylines_created_since(
        &self,
        since: DateTime<Utc>,
        category: Option<StorylineCategory>,
    ) -> Result<Vec<Storyline>> {
        match category {
            Some(category) => {
                self.fetch_storylines(
                    "WHERE created_at >= ? AND category = ?",
                    &[
                        Bind::Int(to_millis(since)),
                        Bind::Text(category.as_str().to_string()),
                    ],
                )
                .await
            }
            None => {
                self.fetch_storylines("WHERE created_at >= ?", &[Bind::Int(to_millis(since))])
                    .await
            }
        }
    }

    async fn list_resolved_since(&self, since: DateTime<Utc>) -> Result<Vec<Storyline>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM storylines WHERE resolved_at IS NOT NULL AND resolved_at >= ? \
             ORDER BY resolved_at DESC",
            STORYLINE_COLUMNS
        ))
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_storyline).collect()
    }

    async fn list_storylines_in_phase(&self, phase: StorylinePhase) -> Result<Vec<Storyline>> {
        self.fetch_storylines("WHERE phase = ?", &[Bind::Text(phase.as_str().to_string())])
            .await
    }

    async fn update_storyline(&self, storyline: &Storyline) -> Result<bool> {
        swap_storyline(&self.pool, storyline).await
    }

    async fn delete_storyline(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM storylines WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_update(&self, update: &StorylineUpdate) -> Result<()> {
        insert_update_row(&self.pool, update).await
    }

    async fn list_updates(&self, storyline_id: Uuid) -> Result<Vec<StorylineUpdate>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM storyline_updates WHERE storyline_id = ? \
             ORDER BY created_at ASC, rowid ASC",
            UPDATE_COLUMNS
        ))
        .bind(storyline_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_update).collect()
    }

    async fn latest_update(&self, storyline_id: Uuid) -> Result<Option<StorylineUpdate>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM storyline_updates WHERE storyline_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            UPDATE_COLUMNS
        ))
        .bind(storyline_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_update).transpose()
    }

    async fn append_creation_attempt(&self, attempt: &CreationAttempt) -> Result<()> {
        insert_attempt_row(&self.pool, attempt).await
    }

    async fn recent_creation_attempts(&self, limit: usize) -> Result<Vec<CreationAttempt>> {
        let rows = sqlx::query(
            "SELECT id, attempted_at, title, category, source, success, failure_reason, \
             diagnostics, storyline_id FROM creation_attempts \
             ORDER BY attempted_at DESC, rowid DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_attempt).collect()
    }

    async fn get_cooldown_marker(&self) -> Result<Option<DateTime<Utc>>> {
        let instant: Option<Option<i64>> =
            sqlx::query_scalar("SELECT instant FROM engine_markers WHERE name = ?")
                .bind(COOLDOWN_MARKER)
                .fetch_optional(&self.pool)
                .await?;
        opt_from_millis(instant.flatten())
    }

    async fn get_processing_marker(&self) -> Result<Option<NaiveDate>> {
        let day: Option<Option<String>> =
            sqlx::query_scalar("SELECT day FROM engine_markers WHERE name = ?")
                .bind(PROCESSING_MARKER)
                .fetch_optional(&self.pool)
                .await?;
        day.flatten().as_deref().map(parse_day).transpose()
    }

    async fn advance_processing_marker(
        &self,
        expected: Option<NaiveDate>,
        next: NaiveDate,
    ) -> Result<bool> {
        let next = next.format("%Y-%m-%d").to_string();
        let result = match expected {
            None => {
                sqlx::query(
                    "INSERT INTO engine_markers (name, day) VALUES (?, ?) \
                     ON CONFLICT(name) DO NOTHING",
                )
                .bind(PROCESSING_MARKER)
                .bind(&next)
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query("UPDATE engine_markers SET day = ? WHERE name = ? AND day = ?")
                    .bind(&next)
                    .bind(PROCESSING_MARKER)
                    .bind(expected.format("%Y-%m-%d").to_string())
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn commit_creation(
        &self,
        storyline: &Storyline,
        attempt: &CreationAttempt,
        cooldown: Precondition<Option<DateTime<Utc>>>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let created = to_millis(storyline.created_at);

        let marker = match cooldown {
            Precondition::Any => {
                sqlx::query(
                    "INSERT INTO engine_markers (name, instant) VALUES (?, ?) \
                     ON CONFLICT(name) DO UPDATE SET instant = excluded.instant",
                )
                .bind(COOLDOWN_MARKER)
                .bind(created)
                .execute(&mut *tx)
                .await?
            }
            Precondition::Equals(None) => {
                sqlx::query(
                    "INSERT INTO engine_markers (name, instant) VALUES (?, ?) \
                     ON CONFLICT(name) DO NOTHING",
                )
                .bind(COOLDOWN_MARKER)
                .bind(created)
                .execute(&mut *tx)
                .await?
            }
            Precondition::Equals(Some(expected)) => {
                sqlx::query(
                    "UPDATE engine_markers SET instant = ? WHERE name = ? AND instant = ?",
                )
                .bind(created)
                .bind(COOLDOWN_MARKER)
                .bind(to_millis(expected))
                .execute(&mut *tx)
                .await?
            }
        };

        if marker.rows_affected() != 1 {
            tx.rollback().await?;
            debug!(storyline_id = %storyline.id, "Cooldown marker moved, creation not committed");
            return Ok(false);
        }

        insert_storyline(&mut *tx, storyline).await?;
        insert_attempt_row(&mut *tx, attempt).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn commit_resolution(
        &self,
        storyline: &Storyline,
        closure: &[StorylineUpdate],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        if !swap_storyline(&mut *tx, storyline).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        for update in closure {
            insert_update_row(&mut *tx, update).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn commit_mention(
        &self,
        storyline: &Storyline,
        update_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await?;

        if !swap_storyline(&mut *tx, storyline).await? {
            tx.rollback().await?;
            return Ok(None);
        }
        let mut changed = 0;
        for id in update_ids {
            let result = sqlx::query(
                "UPDATE storyline_updates SET mentioned = 1, mentioned_at = ? \
                 WHERE id = ? AND storyline_id = ? AND mentioned = 0",
            )
            .bind(to_millis(at))
            .bind(id.to_string())
            .bind(storyline.id.to_string())
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }

        tx.commit().await?;
        debug!(storyline_id = %storyline.id, updates = changed, "Mention committed");
        Ok(Some(changed))
    }
}
