//! Test utilities and helpers for unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Context factories for each trigger kind
//! - Strategy fixtures
//! - Helper assertions

use sqlx::SqlitePool;

use crate::models::{
    CycleTriggerContext, FailureTriggerContext, MaxType, ProgressionContext,
    SessionTriggerContext, SetTriggerContext, TriggerContext, TriggerEvent,
};
use crate::progression::{Stage, StageProgression};

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1): every pooled connection to `sqlite::memory:`
/// opens its own empty database
pub async fn setup_test_db() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
    pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Context Factories
/// ---------------------------------------------------------------------------

/// Training-max context for "user-1" around an arbitrary event
pub fn context_with(lift_id: &str, current_value: f64, event: TriggerEvent) -> ProgressionContext {
    ProgressionContext::new("user-1", lift_id, MaxType::TrainingMax, current_value, event)
}

/// Week-1 session in which `lifts` were performed
pub fn session_context(lift_id: &str, current_value: f64, lifts: &[&str]) -> ProgressionContext {
    let event = TriggerEvent::from_context(TriggerContext::Session(SessionTriggerContext {
        session_id: "session-1".into(),
        day_key: "day-a".into(),
        week_number: 1,
        lifts_performed: lifts.iter().map(|l| l.to_string()).collect(),
    }));
    context_with(lift_id, current_value, event)
}

/// Squat, cycle 1 of a 4-week program just finished
pub fn after_cycle_context(current_value: f64) -> ProgressionContext {
    let event = TriggerEvent::from_context(TriggerContext::Cycle(CycleTriggerContext {
        completed_cycle: 1,
        new_cycle: 2,
        total_weeks: 4,
    }));
    context_with("squat", current_value, event)
}

/// Squat set of 5 missed with 3 reps, at the current weight
pub fn failure_context(current_value: f64, consecutive_failures: u32) -> ProgressionContext {
    let event = TriggerEvent::from_context(TriggerContext::Failure(FailureTriggerContext {
        failed_set_id: "set-1".into(),
        lift_id: "squat".into(),
        target_reps: 5,
        reps_performed: 3,
        consecutive_failures,
        weight: current_value,
        progression_id: "squat-progression".into(),
    }));
    context_with("squat", current_value, event)
}

/// One logged squat set
pub fn set_context(
    current_value: f64,
    reps_performed: u32,
    reps_ceiling: Option<u32>,
    is_amrap: bool,
) -> ProgressionContext {
    let event = TriggerEvent::from_context(TriggerContext::Set(SetTriggerContext {
        set_id: "set-1".into(),
        lift_id: "squat".into(),
        reps_performed,
        reps_ceiling,
        is_amrap,
        weight: current_value * 0.85,
    }));
    context_with("squat", current_value, event)
}

/// ---------------------------------------------------------------------------
/// Strategy Fixtures
/// ---------------------------------------------------------------------------

/// 5x3 -> 6x2 -> 10x1, starting at the first stage
pub fn three_stage_progression(
    reset_on_exhaustion: bool,
    deload_on_reset: Option<f64>,
) -> StageProgression {
    StageProgression::new(
        "squat-stages",
        "Squat 5x3/6x2/10x1",
        vec![
            Stage::new("5x3", 5, 3, 15),
            Stage::new("6x2", 6, 2, 12),
            Stage::new("10x1", 10, 1, 10),
        ],
        reset_on_exhaustion,
        deload_on_reset,
    )
    .expect("Fixture stages should be valid")
}

/// ---------------------------------------------------------------------------
/// Helper Assertions
/// ---------------------------------------------------------------------------

/// Assert two floats differ by less than `tolerance`
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let (left, right, tolerance): (f64, f64, f64) = ($left, $right, $tolerance);
        assert!(
            (left - right).abs() < tolerance,
            "{} is not within {} of {}",
            left,
            tolerance,
            right
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerType;

    #[test]
    fn test_context_factories_validate() {
        let contexts = [
            session_context("squat", 300.0, &["squat", "bench"]),
            after_cycle_context(400.0),
            failure_context(200.0, 2),
            set_context(300.0, 5, Some(8), true),
        ];
        for ctx in &contexts {
            assert!(ctx.validate().is_ok(), "{:?}", ctx.trigger_type());
        }
        assert_eq!(contexts[2].trigger_event.consecutive_failures(), Some(2));
    }

    #[test]
    fn test_context_with_uses_given_event() {
        let ctx = context_with("bench", 100.0, TriggerEvent::new(TriggerType::AfterWeek));
        assert_eq!(ctx.lift_id, "bench");
        assert_eq!(ctx.trigger_type(), TriggerType::AfterWeek);
    }

    #[test]
    fn test_stage_fixture() {
        let stages = three_stage_progression(true, Some(0.1));
        assert_eq!(stages.stage_count(), 3);
        assert!(stages.deload_on_reset);
    }

    #[tokio::test]
    async fn test_setup_db_runs_migrations() {
        let pool = setup_test_db().await;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_progressions")
            .fetch_one(&pool)
            .await
            .expect("Table should exist");
        assert_eq!(count.0, 0);
        teardown_test_db(pool).await;
    }

    #[test]
    fn test_assert_approx_eq() {
        crate::assert_approx_eq!(0.1 + 0.2, 0.3, 1e-12);
    }

    #[test]
    #[should_panic]
    fn test_assert_approx_eq_fails_outside_tolerance() {
        crate::assert_approx_eq!(1.0, 1.1, 1e-3);
    }
}
