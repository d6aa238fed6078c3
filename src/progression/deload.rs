use serde::{Deserialize, Serialize};

use super::{check_context, clamped_deload, precondition_mismatch};
use super::{require_fraction, require_id, require_positive};
use super::{Progression, ProgressionType};
use crate::error::{ProgressionError, ValidationError};
use crate::models::{MaxType, ProgressionContext, ProgressionResult, TriggerType};

/// How much to take off when a deload fires
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "deloadType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeloadMode {
    /// Fraction of the current value, in (0, 1]
    Percent {
        #[serde(rename = "deloadPercent")]
        percent: f64,
    },
    /// Fixed weight, > 0
    Fixed {
        #[serde(rename = "deloadAmount")]
        amount: f64,
    },
}

impl DeloadMode {
    pub fn amount(&self, current: f64) -> f64 {
        match self {
            Self::Percent { percent } => current * percent,
            Self::Fixed { amount } => *amount,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Percent { percent } => require_fraction(*percent, "deloadPercent"),
            Self::Fixed { amount } => require_positive(*amount, "deloadAmount"),
        }
    }
}

/// Drop the max once consecutive failures reach a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeloadOnFailure {
    pub id: String,
    pub name: String,
    pub failure_threshold: u32,
    #[serde(flatten)]
    pub mode: DeloadMode,
    pub reset_on_deload: bool,
    pub max_type: MaxType,
}

impl DeloadOnFailure {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        failure_threshold: u32,
        mode: DeloadMode,
        reset_on_deload: bool,
        max_type: MaxType,
    ) -> Result<Self, ProgressionError> {
        let progression = Self {
            id: id.into(),
            name: name.into(),
            failure_threshold,
            mode,
            reset_on_deload,
            max_type,
        };
        progression
            .validate()
            .map_err(ProgressionError::InvalidConfig)?;
        Ok(progression)
    }

    pub fn apply(&self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        check_context(ctx)?;
        self.validate().map_err(ProgressionError::InvalidConfig)?;

        if let Some(reason) = precondition_mismatch(TriggerType::OnFailure, Some(self.max_type), ctx)
        {
            return Ok(ProgressionResult::not_applied(ctx, reason));
        }

        let Some(failures) = ctx.trigger_event.consecutive_failures() else {
            return Ok(ProgressionResult::not_applied(
                ctx,
                "consecutive failure count was not provided",
            ));
        };
        if failures < self.failure_threshold {
            return Ok(ProgressionResult::not_applied(
                ctx,
                format!(
                    "{} consecutive failures is below the threshold of {}",
                    failures, self.failure_threshold
                ),
            ));
        }

        let delta = clamped_deload(ctx.current_value, self.mode.amount(ctx.current_value));
        tracing::info!(
            progression = %self.id,
            lift = %ctx.lift_id,
            failures,
            from = ctx.current_value,
            delta,
            "deloading after repeated failures"
        );
        Ok(ProgressionResult::applied(ctx, delta))
    }
}

impl Progression for DeloadOnFailure {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn progression_type(&self) -> ProgressionType {
        ProgressionType::DeloadOnFailure
    }

    fn trigger_type(&self) -> TriggerType {
        TriggerType::OnFailure
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(&self.id, "id")?;
        require_id(&self.name, "name")?;
        if self.failure_threshold < 1 {
            return Err(ValidationError::invalid(
                "failureThreshold",
                "must be at least 1",
            ));
        }
        self.mode.validate()
    }

    fn apply(&mut self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        DeloadOnFailure::apply(self, ctx)
    }

    fn should_reset_failure_counter(&self) -> bool {
        self.reset_on_deload
    }
}
