use serde::{Deserialize, Serialize};

use super::{check_context, precondition_mismatch, require_id, require_positive};
use super::{Progression, ProgressionType};
use crate::error::{ProgressionError, ValidationError};
use crate::models::{MaxType, ProgressionContext, ProgressionResult, TriggerType};

/// Add weight once reps reach the top of the rep range.
///
/// Only ever emits a weight increase. Moving the rep target up while below
/// the ceiling is left to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoubleProgression {
    pub id: String,
    pub name: String,
    pub increment: f64,
    pub max_type: MaxType,
}

impl DoubleProgression {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        increment: f64,
        max_type: MaxType,
    ) -> Result<Self, ProgressionError> {
        let progression = Self {
            id: id.into(),
            name: name.into(),
            increment,
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

        if let Some(reason) = precondition_mismatch(TriggerType::AfterSet, Some(self.max_type), ctx) {
            return Ok(ProgressionResult::not_applied(ctx, reason));
        }

        let event = &ctx.trigger_event;
        let (Some(reps), Some(ceiling)) = (event.reps_performed(), event.reps_ceiling()) else {
            return Ok(ProgressionResult::not_applied(
                ctx,
                "reps performed and rep ceiling are both required",
            ));
        };

        if reps >= ceiling {
            Ok(ProgressionResult::applied(ctx, self.increment))
        } else {
            Ok(ProgressionResult::not_applied(
                ctx,
                format!("{} reps has not reached the ceiling of {}", reps, ceiling),
            ))
        }
    }
}

impl Progression for DoubleProgression {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn progression_type(&self) -> ProgressionType {
        ProgressionType::Double
    }

    fn trigger_type(&self) -> TriggerType {
        TriggerType::AfterSet
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(&self.id, "id")?;
        require_id(&self.name, "name")?;
        require_positive(self.increment, "increment")
    }

    fn apply(&mut self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        DoubleProgression::apply(self, ctx)
    }
}
