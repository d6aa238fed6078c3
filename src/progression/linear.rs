use serde::{Deserialize, Serialize};

use super::{check_context, precondition_mismatch, require_id, require_positive};
use super::{Progression, ProgressionType};
use crate::error::{ProgressionError, ValidationError};
use crate::models::{MaxType, ProgressionContext, ProgressionResult, TriggerType};

/// Fixed increment after every session or every week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearProgression {
    pub id: String,
    pub name: String,
    pub increment: f64,
    pub max_type: MaxType,
    /// `AFTER_SESSION` or `AFTER_WEEK`
    pub trigger_type: TriggerType,
}

impl LinearProgression {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        increment: f64,
        max_type: MaxType,
        trigger_type: TriggerType,
    ) -> Result<Self, ProgressionError> {
        let progression = Self {
            id: id.into(),
            name: name.into(),
            increment,
            max_type,
            trigger_type,
        };
        progression
            .validate()
            .map_err(ProgressionError::InvalidConfig)?;
        Ok(progression)
    }

    pub fn apply(&self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        check_context(ctx)?;
        self.validate().map_err(ProgressionError::InvalidConfig)?;

        if let Some(reason) = precondition_mismatch(self.trigger_type, Some(self.max_type), ctx) {
            return Ok(ProgressionResult::not_applied(ctx, reason));
        }

        // An empty or missing lift list means the session didn't report lifts
        if self.trigger_type == TriggerType::AfterSession {
            if let Some(lifts) = ctx.trigger_event.lifts_performed() {
                if !lifts.is_empty() && !lifts.iter().any(|l| l == &ctx.lift_id) {
                    return Ok(ProgressionResult::not_applied(
                        ctx,
                        format!("lift {} was not performed in this session", ctx.lift_id),
                    ));
                }
            }
        }

        Ok(ProgressionResult::applied(ctx, self.increment))
    }
}

impl Progression for LinearProgression {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn progression_type(&self) -> ProgressionType {
        ProgressionType::Linear
    }

    fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(&self.id, "id")?;
        require_id(&self.name, "name")?;
        require_positive(self.increment, "increment")?;
        match self.trigger_type {
            TriggerType::AfterSession | TriggerType::AfterWeek => Ok(()),
            other => Err(ValidationError::invalid(
                "triggerType",
                format!("linear progression cannot run {}", other),
            )),
        }
    }

    fn apply(&mut self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        LinearProgression::apply(self, ctx)
    }
}
