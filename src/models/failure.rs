use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Consecutive failed sets for one (user, lift, progression).
///
/// The caller owns persistence; these methods only update the in-memory value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCounter {
    pub id: String,
    pub user_id: String,
    pub lift_id: String,
    pub progression_id: String,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailureCounter {
    pub fn new(
        user_id: impl Into<String>,
        lift_id: impl Into<String>,
        progression_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::with_count(user_id, lift_id, progression_id, 0)
    }

    /// Rebuild a counter from a stored count
    pub fn with_count(
        user_id: impl Into<String>,
        lift_id: impl Into<String>,
        progression_id: impl Into<String>,
        count: i64,
    ) -> Result<Self, ValidationError> {
        let consecutive_failures = u32::try_from(count).map_err(|_| {
            ValidationError::invalid(
                "consecutiveFailures",
                format!("{} is not a valid failure count", count),
            )
        })?;
        let now = Utc::now();
        let counter = Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            lift_id: lift_id.into(),
            progression_id: progression_id.into(),
            consecutive_failures,
            last_failure_at: None,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        };
        counter.validate()?;
        Ok(counter)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::MissingField("userId"));
        }
        if self.lift_id.trim().is_empty() {
            return Err(ValidationError::MissingField("liftId"));
        }
        if self.progression_id.trim().is_empty() {
            return Err(ValidationError::MissingField("progressionId"));
        }
        Ok(())
    }

    /// Record a failed set, returning the new count
    pub fn increment_failure(&mut self) -> u32 {
        let now = Utc::now();
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
        self.updated_at = now;
        self.consecutive_failures
    }

    /// A successful set (or an applied deload) breaks the streak
    pub fn reset_on_success(&mut self) {
        let now = Utc::now();
        self.consecutive_failures = 0;
        self.last_success_at = Some(now);
        self.updated_at = now;
    }

    pub fn meets_threshold(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }

    pub fn has_failures(&self) -> bool {
        self.consecutive_failures > 0
    }
}
