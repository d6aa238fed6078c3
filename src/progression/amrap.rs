use serde::{Deserialize, Deserializer, Serialize};

use super::{check_context, precondition_mismatch, require_id, require_positive};
use super::{Progression, ProgressionType};
use crate::error::{ProgressionError, ValidationError};
use crate::models::{MaxType, ProgressionContext, ProgressionResult, TriggerType};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmrapThreshold {
    pub min_reps: u32,
    pub increment: f64,
}

/// Piecewise increment keyed on reps hit in an AMRAP set.
///
/// Thresholds are kept sorted by `min_reps`, strictly ascending, and their
/// increments never decrease, so more reps never earn a smaller bump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmrapProgression {
    pub id: String,
    pub name: String,
    pub max_type: MaxType,
    #[serde(deserialize_with = "sorted_thresholds")]
    pub thresholds: Vec<AmrapThreshold>,
}

/// Stored order is not trusted
fn sorted_thresholds<'de, D>(deserializer: D) -> Result<Vec<AmrapThreshold>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut thresholds = Vec::<AmrapThreshold>::deserialize(deserializer)?;
    thresholds.sort_by_key(|t| t.min_reps);
    Ok(thresholds)
}

impl AmrapProgression {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        max_type: MaxType,
        thresholds: Vec<AmrapThreshold>,
    ) -> Result<Self, ProgressionError> {
        let progression = Self {
            id: id.into(),
            name: name.into(),
            max_type,
            thresholds,
        };
        progression
            .validate()
            .map_err(ProgressionError::InvalidConfig)?;
        Ok(progression)
    }

    /// Increment for the highest threshold reached, if any
    pub fn increment_for(&self, reps_performed: u32) -> Option<f64> {
        let reached = self
            .thresholds
            .partition_point(|t| t.min_reps <= reps_performed);
        reached
            .checked_sub(1)
            .map(|idx| self.thresholds[idx].increment)
    }

    pub fn apply(&self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        check_context(ctx)?;
        self.validate().map_err(ProgressionError::InvalidConfig)?;

        if let Some(reason) = precondition_mismatch(TriggerType::AfterSet, Some(self.max_type), ctx) {
            return Ok(ProgressionResult::not_applied(ctx, reason));
        }

        let event = &ctx.trigger_event;
        if !event.is_amrap() {
            return Ok(ProgressionResult::not_applied(ctx, "set was not an AMRAP set"));
        }
        let Some(reps) = event.reps_performed() else {
            return Ok(ProgressionResult::not_applied(
                ctx,
                "reps performed were not recorded",
            ));
        };

        match self.increment_for(reps) {
            Some(increment) => Ok(ProgressionResult::applied(ctx, increment)),
            None => Ok(ProgressionResult::not_applied(
                ctx,
                format!(
                    "{} reps is below the minimum threshold of {}",
                    reps,
                    self.thresholds.first().map(|t| t.min_reps).unwrap_or_default()
                ),
            )),
        }
    }
}

impl Progression for AmrapProgression {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn progression_type(&self) -> ProgressionType {
        ProgressionType::Amrap
    }

    fn trigger_type(&self) -> TriggerType {
        TriggerType::AfterSet
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(&self.id, "id")?;
        require_id(&self.name, "name")?;
        if self.thresholds.is_empty() {
            return Err(ValidationError::invalid(
                "thresholds",
                "at least one threshold is required",
            ));
        }
        for threshold in &self.thresholds {
            require_positive(threshold.increment, "thresholds.increment")?;
        }
        for pair in self.thresholds.windows(2) {
            if pair[1].min_reps <= pair[0].min_reps {
                return Err(ValidationError::invalid(
                    "thresholds",
                    format!(
                        "minReps must be strictly ascending ({} then {})",
                        pair[0].min_reps, pair[1].min_reps
                    ),
                ));
            }
            if pair[1].increment < pair[0].increment {
                return Err(ValidationError::invalid(
                    "thresholds",
                    format!(
                        "increment for {} reps ({}) is smaller than for {} reps ({})",
                        pair[1].min_reps, pair[1].increment, pair[0].min_reps, pair[0].increment
                    ),
                ));
            }
        }
        Ok(())
    }

    fn apply(&mut self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        AmrapProgression::apply(self, ctx)
    }
}
