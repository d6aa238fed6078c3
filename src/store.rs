//! SQLite persistence for the caller side of the engine
//!
//! The strategies never touch storage. This module does what a caller owes
//! them: keeps failure counters, writes an audit row per evaluation, and
//! checks stage strategies out and back in with a version check so two
//! writers can't both advance the same stage.
//!
//! Public functions take the pool. The private helpers take a single
//! connection so [`apply_progression`] can run all of its writes in one
//! transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{ProgressionError, ValidationError};
use crate::models::{FailureCounter, ProgressionContext, ProgressionResult, TriggerType};
use crate::progression::{Progression, ProgressionType, Strategy};

// ---------------------------------------------------------------------------
/// Error Handling
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Progression(#[from] ProgressionError),

    #[error("Failed to encode snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {progression_id}: expected {expected}, found {found}")]
    VersionConflict {
        progression_id: String,
        expected: i64,
        found: i64,
    },

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl Serialize for StoreError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

// ---------------------------------------------------------------------------
/// Stored strategies
// ---------------------------------------------------------------------------

/// A strategy attached to one user's lift, with its optimistic-lock version
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProgression {
    pub user_id: String,
    pub lift_id: String,
    pub strategy: Strategy,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Insert or replace a strategy's configuration
pub async fn save_progression(
    pool: &SqlitePool,
    user_id: &str,
    lift_id: &str,
    strategy: &Strategy,
) -> Result<StoredProgression, StoreError> {
    strategy
        .validate()
        .map_err(ProgressionError::InvalidConfig)?;
    let config_json = strategy.to_json()?;
    let now = timestamp(Utc::now());

    let mut conn = pool.acquire().await?;
    sqlx::query(
        r#"
        INSERT INTO user_progressions
            (user_id, lift_id, progression_id, progression_type, config_json, version, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT(user_id, lift_id, progression_id) DO UPDATE SET
            progression_type = excluded.progression_type,
            config_json = excluded.config_json,
            version = user_progressions.version + 1,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(lift_id)
    .bind(strategy.id())
    .bind(strategy.progression_type().as_str())
    .bind(&config_json)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    fetch_progression(&mut conn, user_id, lift_id, strategy.id()).await
}

/// Check out one strategy
pub async fn load_progression(
    pool: &SqlitePool,
    user_id: &str,
    lift_id: &str,
    progression_id: &str,
) -> Result<StoredProgression, StoreError> {
    let mut conn = pool.acquire().await?;
    fetch_progression(&mut conn, user_id, lift_id, progression_id).await
}

/// Every strategy attached to a user's lift
pub async fn load_progressions_for_lift(
    pool: &SqlitePool,
    user_id: &str,
    lift_id: &str,
) -> Result<Vec<StoredProgression>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, lift_id, config_json, version, updated_at
        FROM user_progressions
        WHERE user_id = ? AND lift_id = ?
        ORDER BY progression_id
        "#,
    )
    .bind(user_id)
    .bind(lift_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(stored_from_row).collect()
}

/// Check a strategy back in. Fails with `VersionConflict` if someone else
/// wrote it since it was loaded. Returns the new version.
pub async fn update_progression(
    pool: &SqlitePool,
    stored: &StoredProgression,
) -> Result<i64, StoreError> {
    let mut conn = pool.acquire().await?;
    check_in(&mut conn, stored).await
}

async fn fetch_progression(
    conn: &mut SqliteConnection,
    user_id: &str,
    lift_id: &str,
    progression_id: &str,
) -> Result<StoredProgression, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT user_id, lift_id, config_json, version, updated_at
        FROM user_progressions
        WHERE user_id = ? AND lift_id = ? AND progression_id = ?
        "#,
    )
    .bind(user_id)
    .bind(lift_id)
    .bind(progression_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        StoreError::NotFound(format!(
            "progression {} for {}/{}",
            progression_id, user_id, lift_id
        ))
    })?;

    stored_from_row(&row)
}

async fn check_in(
    conn: &mut SqliteConnection,
    stored: &StoredProgression,
) -> Result<i64, StoreError> {
    let progression_id = stored.strategy.id();
    let config_json = stored.strategy.to_json()?;

    let updated = sqlx::query(
        r#"
        UPDATE user_progressions
        SET config_json = ?, version = version + 1, updated_at = ?
        WHERE user_id = ? AND lift_id = ? AND progression_id = ? AND version = ?
        "#,
    )
    .bind(&config_json)
    .bind(timestamp(Utc::now()))
    .bind(&stored.user_id)
    .bind(&stored.lift_id)
    .bind(progression_id)
    .bind(stored.version)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 1 {
        return Ok(stored.version + 1);
    }

    let current = fetch_progression(conn, &stored.user_id, &stored.lift_id, progression_id).await?;
    tracing::warn!(
        progression = %progression_id,
        expected = stored.version,
        found = current.version,
        "stale progression check-in rejected"
    );
    Err(StoreError::VersionConflict {
        progression_id: progression_id.to_string(),
        expected: stored.version,
        found: current.version,
    })
}

fn stored_from_row(row: &SqliteRow) -> Result<StoredProgression, StoreError> {
    let user_id: String = row.try_get("user_id")?;
    let lift_id: String = row.try_get("lift_id")?;
    let config_json: String = row.try_get("config_json")?;
    let strategy = Strategy::from_json(&config_json).map_err(|e| {
        StoreError::Corrupt(format!("progression config for {}/{}: {}", user_id, lift_id, e))
    })?;

    Ok(StoredProgression {
        user_id,
        lift_id,
        strategy,
        version: row.try_get("version")?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

// ---------------------------------------------------------------------------
/// Failure counters
// ---------------------------------------------------------------------------

const COUNTER_COLUMNS: &str = "id, user_id, lift_id, progression_id, consecutive_failures, \
     last_failure_at, last_success_at, created_at, updated_at";

pub async fn load_failure_counter(
    pool: &SqlitePool,
    user_id: &str,
    lift_id: &str,
    progression_id: &str,
) -> Result<Option<FailureCounter>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM failure_counters WHERE user_id = ? AND lift_id = ? AND progression_id = ?",
        COUNTER_COLUMNS
    ))
    .bind(user_id)
    .bind(lift_id)
    .bind(progression_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(counter_from_row).transpose()
}

pub async fn save_failure_counter(
    pool: &SqlitePool,
    counter: &FailureCounter,
) -> Result<(), StoreError> {
    counter
        .validate()
        .map_err(ProgressionError::InvalidArgument)?;

    sqlx::query(
        r#"
        INSERT INTO failure_counters (
            id, user_id, lift_id, progression_id, consecutive_failures,
            last_failure_at, last_success_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, lift_id, progression_id) DO UPDATE SET
            consecutive_failures = excluded.consecutive_failures,
            last_failure_at = excluded.last_failure_at,
            last_success_at = excluded.last_success_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&counter.id)
    .bind(&counter.user_id)
    .bind(&counter.lift_id)
    .bind(&counter.progression_id)
    .bind(i64::from(counter.consecutive_failures))
    .bind(counter.last_failure_at.map(timestamp))
    .bind(counter.last_success_at.map(timestamp))
    .bind(timestamp(counter.created_at))
    .bind(timestamp(counter.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Count one more failed set, creating the counter on first failure
pub async fn record_failure(
    pool: &SqlitePool,
    user_id: &str,
    lift_id: &str,
    progression_id: &str,
) -> Result<FailureCounter, StoreError> {
    let mut conn = pool.acquire().await?;
    increment_counter(&mut conn, user_id, lift_id, progression_id).await
}

/// Break the failure streak. Nothing to do if no counter exists yet.
pub async fn record_success(
    pool: &SqlitePool,
    user_id: &str,
    lift_id: &str,
    progression_id: &str,
) -> Result<Option<FailureCounter>, StoreError> {
    let mut conn = pool.acquire().await?;
    reset_counter(&mut conn, user_id, lift_id, progression_id).await
}

/// Single-statement upsert: the increment happens inside SQLite, so
/// concurrent failures for the same tuple never overwrite each other.
async fn increment_counter(
    conn: &mut SqliteConnection,
    user_id: &str,
    lift_id: &str,
    progression_id: &str,
) -> Result<FailureCounter, StoreError> {
    let mut fresh = FailureCounter::new(user_id, lift_id, progression_id)
        .map_err(ProgressionError::InvalidArgument)?;
    fresh.increment_failure();

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO failure_counters (
            id, user_id, lift_id, progression_id, consecutive_failures,
            last_failure_at, last_success_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)
        ON CONFLICT(user_id, lift_id, progression_id) DO UPDATE SET
            consecutive_failures = failure_counters.consecutive_failures + 1,
            last_failure_at = excluded.last_failure_at,
            updated_at = excluded.updated_at
        RETURNING {}
        "#,
        COUNTER_COLUMNS
    ))
    .bind(&fresh.id)
    .bind(&fresh.user_id)
    .bind(&fresh.lift_id)
    .bind(&fresh.progression_id)
    .bind(i64::from(fresh.consecutive_failures))
    .bind(fresh.last_failure_at.map(timestamp))
    .bind(timestamp(fresh.created_at))
    .bind(timestamp(fresh.updated_at))
    .fetch_one(&mut *conn)
    .await?;

    counter_from_row(&row)
}

async fn reset_counter(
    conn: &mut SqliteConnection,
    user_id: &str,
    lift_id: &str,
    progression_id: &str,
) -> Result<Option<FailureCounter>, StoreError> {
    let now = timestamp(Utc::now());
    let row = sqlx::query(&format!(
        r#"
        UPDATE failure_counters
        SET consecutive_failures = 0, last_success_at = ?, updated_at = ?
        WHERE user_id = ? AND lift_id = ? AND progression_id = ?
        RETURNING {}
        "#,
        COUNTER_COLUMNS
    ))
    .bind(&now)
    .bind(&now)
    .bind(user_id)
    .bind(lift_id)
    .bind(progression_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(counter_from_row).transpose()
}

fn counter_from_row(row: &SqliteRow) -> Result<FailureCounter, StoreError> {
    let count: i64 = row.try_get("consecutive_failures")?;
    Ok(FailureCounter {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        lift_id: row.try_get("lift_id")?,
        progression_id: row.try_get("progression_id")?,
        consecutive_failures: u32::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("failure count {}", count)))?,
        last_failure_at: parse_optional_timestamp(row.try_get("last_failure_at")?)?,
        last_success_at: parse_optional_timestamp(row.try_get("last_success_at")?)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

// ---------------------------------------------------------------------------
/// Audit log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionLogEntry {
    pub id: i64,
    pub user_id: String,
    pub progression_id: String,
    pub progression_type: ProgressionType,
    pub trigger_type: TriggerType,
    pub result: ProgressionResult,
}

/// Write one audit row per evaluation, applied or not
pub async fn log_result(
    pool: &SqlitePool,
    ctx: &ProgressionContext,
    progression: &dyn Progression,
    result: &ProgressionResult,
) -> Result<i64, StoreError> {
    let mut conn = pool.acquire().await?;
    insert_log(&mut conn, ctx, progression, result).await
}

async fn insert_log(
    conn: &mut SqliteConnection,
    ctx: &ProgressionContext,
    progression: &dyn Progression,
    result: &ProgressionResult,
) -> Result<i64, StoreError> {
    let snapshot = serde_json::to_string(ctx)?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO progression_logs (
            user_id, lift_id, progression_id, progression_type, trigger_type, max_type,
            applied, previous_value, new_value, delta, reason, applied_at, context_snapshot_json
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&ctx.user_id)
    .bind(&result.lift_id)
    .bind(progression.id())
    .bind(progression.progression_type().as_str())
    .bind(ctx.trigger_type().as_str())
    .bind(result.max_type.as_str())
    .bind(result.applied)
    .bind(result.previous_value)
    .bind(result.new_value)
    .bind(result.delta)
    .bind(&result.reason)
    .bind(timestamp(result.applied_at))
    .bind(&snapshot)
    .execute(&mut *conn)
    .await?;

    Ok(inserted.last_insert_rowid())
}

/// History for one lift, newest first
pub async fn load_progression_log(
    pool: &SqlitePool,
    user_id: &str,
    lift_id: &str,
) -> Result<Vec<ProgressionLogEntry>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT
            id, user_id, lift_id, progression_id, progression_type, trigger_type, max_type,
            applied, previous_value, new_value, delta, reason, applied_at
        FROM progression_logs
        WHERE user_id = ? AND lift_id = ?
        ORDER BY id DESC
        "#,
    )
    .bind(user_id)
    .bind(lift_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(log_entry_from_row).collect()
}

fn log_entry_from_row(row: &SqliteRow) -> Result<ProgressionLogEntry, StoreError> {
    let progression_type: String = row.try_get("progression_type")?;
    let trigger_type: String = row.try_get("trigger_type")?;
    let max_type: String = row.try_get("max_type")?;
    let corrupt = |e: ValidationError| StoreError::Corrupt(e.to_string());

    Ok(ProgressionLogEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        progression_id: row.try_get("progression_id")?,
        progression_type: progression_type.parse().map_err(corrupt)?,
        trigger_type: trigger_type.parse().map_err(corrupt)?,
        result: ProgressionResult {
            applied: row.try_get("applied")?,
            previous_value: row.try_get("previous_value")?,
            new_value: row.try_get("new_value")?,
            delta: row.try_get("delta")?,
            lift_id: row.try_get("lift_id")?,
            max_type: max_type.parse().map_err(corrupt)?,
            applied_at: parse_timestamp(&row.try_get::<String, _>("applied_at")?)?,
            reason: row.try_get("reason")?,
        },
    })
}

// ---------------------------------------------------------------------------
// Progression Actions
// ---------------------------------------------------------------------------

/// Load, apply, check in, update the failure counter, log.
///
/// For failure-gated strategies an `ON_FAILURE` trigger bumps the stored
/// counter first and, when the event carries no count of its own, the stored
/// count is what the strategy sees. Every write happens in one transaction:
/// a version conflict on a stage strategy rolls back the counter too, and
/// no log row is written for the failed attempt.
pub async fn apply_progression(
    pool: &SqlitePool,
    ctx: &ProgressionContext,
    progression_id: &str,
) -> Result<ProgressionResult, StoreError> {
    ctx.validate().map_err(ProgressionError::InvalidContext)?;

    let mut tx = pool.begin().await?;
    let stored = fetch_progression(&mut tx, &ctx.user_id, &ctx.lift_id, progression_id).await?;
    let (result, _) = evaluate(&mut tx, ctx, stored).await?;
    tx.commit().await?;

    Ok(result)
}

/// Same loop as [`apply_progression`], against a copy the caller checked out
/// earlier. `stored` is only updated once the transaction commits; after a
/// `VersionConflict` it is untouched and should be reloaded.
pub async fn apply_to_stored(
    pool: &SqlitePool,
    ctx: &ProgressionContext,
    stored: &mut StoredProgression,
) -> Result<ProgressionResult, StoreError> {
    ctx.validate().map_err(ProgressionError::InvalidContext)?;
    if ctx.user_id != stored.user_id || ctx.lift_id != stored.lift_id {
        return Err(ProgressionError::InvalidArgument(ValidationError::invalid(
            "liftId",
            format!(
                "context is for {}/{} but the progression belongs to {}/{}",
                ctx.user_id, ctx.lift_id, stored.user_id, stored.lift_id
            ),
        ))
        .into());
    }

    let mut tx = pool.begin().await?;
    let (result, next) = evaluate(&mut tx, ctx, stored.clone()).await?;
    tx.commit().await?;

    *stored = next;
    Ok(result)
}

async fn evaluate(
    conn: &mut SqliteConnection,
    ctx: &ProgressionContext,
    mut stored: StoredProgression,
) -> Result<(ProgressionResult, StoredProgression), StoreError> {
    let progression_id = stored.strategy.id().to_string();
    let failure_gated = stored.strategy.trigger_type() == TriggerType::OnFailure
        && ctx.trigger_type() == TriggerType::OnFailure;

    let mut ctx = ctx.clone();
    if failure_gated {
        let counter = increment_counter(conn, &ctx.user_id, &ctx.lift_id, &progression_id).await?;
        if ctx.trigger_event.consecutive_failures().is_none() {
            ctx.trigger_event.consecutive_failures = Some(counter.consecutive_failures);
        }
    }

    let before = stored.strategy.clone();
    let result = stored.strategy.apply(&ctx)?;

    if stored.strategy.is_stateful() && stored.strategy != before {
        stored.version = check_in(conn, &stored).await?;
        tracing::debug!(
            progression = %progression_id,
            version = stored.version,
            "checked in stateful progression"
        );
    }

    if failure_gated && result.applied && stored.strategy.should_reset_failure_counter() {
        reset_counter(conn, &ctx.user_id, &ctx.lift_id, &progression_id).await?;
    }

    insert_log(conn, &ctx, &stored.strategy, &result).await?;
    Ok((result, stored))
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {}: {}", value, e)))
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.as_deref().map(parse_timestamp).transpose()
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MaxType, TriggerEvent};
    use crate::progression::{CycleProgression, DeloadMode, DeloadOnFailure};
    use crate::test_utils::{
        after_cycle_context, failure_context, setup_test_db, teardown_test_db,
        three_stage_progression,
    };

    fn deload_strategy(reset_on_deload: bool) -> Strategy {
        DeloadOnFailure::new(
            "deload-squat",
            "Squat deload",
            2,
            DeloadMode::Percent { percent: 0.1 },
            reset_on_deload,
            MaxType::TrainingMax,
        )
        .unwrap()
        .into()
    }

    fn bare_failure(current: f64) -> ProgressionContext {
        crate::test_utils::context_with("squat", current, TriggerEvent::new(TriggerType::OnFailure))
    }

    #[tokio::test]
    async fn test_save_and_load_progression_roundtrip() {
        let pool = setup_test_db().await;
        let strategy: Strategy = three_stage_progression(true, Some(0.15)).into();

        let saved = save_progression(&pool, "user-1", "squat", &strategy)
            .await
            .expect("Should save progression");
        assert_eq!(saved.version, 1);

        let loaded = load_progression(&pool, "user-1", "squat", strategy.id())
            .await
            .expect("Should load progression");
        assert_eq!(loaded.strategy, strategy);

        // Saving again bumps the version
        let resaved = save_progression(&pool, "user-1", "squat", &strategy)
            .await
            .expect("Should resave");
        assert_eq!(resaved.version, 2);

        let all = load_progressions_for_lift(&pool, "user-1", "squat")
            .await
            .expect("Should list");
        assert_eq!(all.len(), 1);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_load_missing_progression() {
        let pool = setup_test_db().await;
        let result = load_progression(&pool, "user-1", "squat", "nope").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_stale_checkin_is_rejected() {
        let pool = setup_test_db().await;
        let strategy: Strategy = three_stage_progression(true, None).into();
        save_progression(&pool, "user-1", "squat", &strategy).await.unwrap();

        let mut first = load_progression(&pool, "user-1", "squat", strategy.id()).await.unwrap();
        let mut second = load_progression(&pool, "user-1", "squat", strategy.id()).await.unwrap();

        first.strategy.apply(&failure_context(200.0, 1)).unwrap();
        second.strategy.apply(&failure_context(200.0, 1)).unwrap();

        assert_eq!(update_progression(&pool, &first).await.unwrap(), 2);
        let conflict = update_progression(&pool, &second).await;
        assert!(matches!(
            conflict,
            Err(StoreError::VersionConflict { expected: 1, found: 2, .. })
        ));

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_failure_counter_lifecycle() {
        let pool = setup_test_db().await;

        assert!(load_failure_counter(&pool, "user-1", "squat", "deload-squat")
            .await
            .unwrap()
            .is_none());
        assert!(record_success(&pool, "user-1", "squat", "deload-squat")
            .await
            .unwrap()
            .is_none());

        let counter = record_failure(&pool, "user-1", "squat", "deload-squat").await.unwrap();
        assert_eq!(counter.consecutive_failures, 1);
        let counter = record_failure(&pool, "user-1", "squat", "deload-squat").await.unwrap();
        assert_eq!(counter.consecutive_failures, 2);

        let reloaded = load_failure_counter(&pool, "user-1", "squat", "deload-squat")
            .await
            .unwrap()
            .expect("Counter should exist");
        assert_eq!(reloaded.consecutive_failures, 2);
        assert_eq!(reloaded.id, counter.id);
        assert!(reloaded.last_failure_at.is_some());

        let reset = record_success(&pool, "user-1", "squat", "deload-squat")
            .await
            .unwrap()
            .expect("Counter should exist");
        assert_eq!(reset.consecutive_failures, 0);
        assert!(reset.last_success_at.is_some());

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_apply_progression_logs_every_evaluation() {
        let pool = setup_test_db().await;
        let cycle: Strategy = CycleProgression::new("cycle", "Cycle", 10.0, MaxType::TrainingMax)
            .unwrap()
            .into();
        save_progression(&pool, "user-1", "squat", &cycle).await.unwrap();

        let applied = apply_progression(&pool, &after_cycle_context(400.0), "cycle")
            .await
            .unwrap();
        assert!(applied.applied);

        let skipped = apply_progression(&pool, &bare_failure(410.0), "cycle")
            .await
            .unwrap();
        assert!(!skipped.applied);

        let log = load_progression_log(&pool, "user-1", "squat").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].trigger_type, TriggerType::OnFailure);
        assert!(!log[0].result.applied);
        assert!(log[0].result.reason.is_some());
        assert_eq!(log[1].progression_type, ProgressionType::Cycle);
        assert_eq!(log[1].result.new_value, 410.0);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_apply_progression_counts_failures_and_resets_after_deload() {
        let pool = setup_test_db().await;
        save_progression(&pool, "user-1", "squat", &deload_strategy(true))
            .await
            .unwrap();

        let first = apply_progression(&pool, &bare_failure(200.0), "deload-squat")
            .await
            .unwrap();
        assert!(!first.applied, "one failure is below the threshold of two");

        let second = apply_progression(&pool, &bare_failure(200.0), "deload-squat")
            .await
            .unwrap();
        assert!(second.applied);
        crate::assert_approx_eq!(second.new_value, 180.0, 1e-9);

        let counter = load_failure_counter(&pool, "user-1", "squat", "deload-squat")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.consecutive_failures, 0);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_apply_progression_keeps_counter_without_reset_flag() {
        let pool = setup_test_db().await;
        save_progression(&pool, "user-1", "squat", &deload_strategy(false))
            .await
            .unwrap();

        for _ in 0..2 {
            apply_progression(&pool, &bare_failure(200.0), "deload-squat")
                .await
                .unwrap();
        }

        let counter = load_failure_counter(&pool, "user-1", "squat", "deload-squat")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.consecutive_failures, 2);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_apply_progression_checks_in_stage_state() {
        let pool = setup_test_db().await;
        let stage: Strategy = three_stage_progression(true, Some(0.15)).into();
        save_progression(&pool, "user-1", "squat", &stage).await.unwrap();

        let mut current = 200.0;
        for _ in 0..3 {
            let result = apply_progression(&pool, &failure_context(current, 1), stage.id())
                .await
                .unwrap();
            current = result.new_value;
        }

        let stored = load_progression(&pool, "user-1", "squat", stage.id()).await.unwrap();
        assert_eq!(stored.version, 4);
        match stored.strategy {
            Strategy::Stage(s) => assert_eq!(s.current_stage, 0),
            other => panic!("Wrong type: {:?}", other),
        }
        crate::assert_approx_eq!(current, 170.0, 1e-9);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_both_counted() {
        let pool = setup_test_db().await;

        let (a, b) = tokio::join!(
            record_failure(&pool, "user-1", "squat", "deload-squat"),
            record_failure(&pool, "user-1", "squat", "deload-squat"),
        );
        let mut counts = vec![
            a.unwrap().consecutive_failures,
            b.unwrap().consecutive_failures,
        ];
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 2]);

        let stored = load_failure_counter(&pool, "user-1", "squat", "deload-squat")
            .await
            .unwrap()
            .expect("Counter should exist");
        assert_eq!(stored.consecutive_failures, 2);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_concurrent_stage_applies_both_land() {
        let pool = setup_test_db().await;
        let stage: Strategy = three_stage_progression(true, None).into();
        save_progression(&pool, "user-1", "squat", &stage).await.unwrap();

        let ctx = failure_context(200.0, 1);
        let (a, b) = tokio::join!(
            apply_progression(&pool, &ctx, stage.id()),
            apply_progression(&pool, &ctx, stage.id()),
        );
        assert!(a.unwrap().applied);
        assert!(b.unwrap().applied);

        let stored = load_progression(&pool, "user-1", "squat", stage.id()).await.unwrap();
        assert_eq!(stored.version, 3);
        match stored.strategy {
            Strategy::Stage(s) => assert_eq!(s.current_stage, 2),
            other => panic!("Wrong type: {:?}", other),
        }
        let counter = load_failure_counter(&pool, "user-1", "squat", stage.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.consecutive_failures, 2);
        assert_eq!(load_progression_log(&pool, "user-1", "squat").await.unwrap().len(), 2);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_version_conflict_rolls_back_counter_and_log() {
        let pool = setup_test_db().await;
        let stage: Strategy = three_stage_progression(true, None).into();
        save_progression(&pool, "user-1", "squat", &stage).await.unwrap();
        let mut stale = load_progression(&pool, "user-1", "squat", stage.id()).await.unwrap();

        apply_progression(&pool, &failure_context(200.0, 1), stage.id())
            .await
            .unwrap();

        let conflict = apply_to_stored(&pool, &failure_context(200.0, 1), &mut stale).await;
        assert!(matches!(
            conflict,
            Err(StoreError::VersionConflict { expected: 1, found: 2, .. })
        ));

        // The stale copy is untouched and nothing from the failed attempt persisted
        assert_eq!(stale.version, 1);
        match &stale.strategy {
            Strategy::Stage(s) => assert_eq!(s.current_stage, 0),
            other => panic!("Wrong type: {:?}", other),
        }
        let counter = load_failure_counter(&pool, "user-1", "squat", stage.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.consecutive_failures, 1);
        assert_eq!(load_progression_log(&pool, "user-1", "squat").await.unwrap().len(), 1);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_apply_to_stored_updates_checked_out_copy() {
        let pool = setup_test_db().await;
        let stage: Strategy = three_stage_progression(true, None).into();
        save_progression(&pool, "user-1", "squat", &stage).await.unwrap();
        let mut stored = load_progression(&pool, "user-1", "squat", stage.id()).await.unwrap();

        let result = apply_to_stored(&pool, &failure_context(200.0, 1), &mut stored)
            .await
            .unwrap();
        assert!(result.applied);
        assert_eq!(stored.version, 2);
        match &stored.strategy {
            Strategy::Stage(s) => assert_eq!(s.current_stage, 1),
            other => panic!("Wrong type: {:?}", other),
        }

        let mut bench = failure_context(200.0, 1);
        bench.lift_id = "bench".into();
        let mismatch = apply_to_stored(&pool, &bench, &mut stored).await;
        assert!(matches!(
            mismatch,
            Err(StoreError::Progression(ProgressionError::InvalidArgument(_)))
        ));

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_undecodable_config_is_corrupt() {
        let pool = setup_test_db().await;
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO user_progressions
                (user_id, lift_id, progression_id, progression_type, config_json, version, created_at, updated_at)
            VALUES ('user-1', 'squat', 'wave', 'WAVE_PROGRESSION', '{"type":"WAVE_PROGRESSION","id":"wave"}', 1, ?, ?)
            "#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        let loaded = load_progression(&pool, "user-1", "squat", "wave").await;
        assert!(matches!(loaded, Err(StoreError::Corrupt(_))));
        let listed = load_progressions_for_lift(&pool, "user-1", "squat").await;
        assert!(matches!(listed, Err(StoreError::Corrupt(_))));

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_apply_progression_rejects_invalid_context() {
        let pool = setup_test_db().await;
        let mut ctx = after_cycle_context(400.0);
        ctx.current_value = 0.0;
        let result = apply_progression(&pool, &ctx, "cycle").await;
        assert!(matches!(
            result,
            Err(StoreError::Progression(ProgressionError::InvalidContext(_)))
        ));
        teardown_test_db(pool).await;
    }
}
