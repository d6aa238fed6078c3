use serde::{Deserialize, Serialize};

use super::{check_context, precondition_mismatch, require_id, require_positive};
use super::{Progression, ProgressionType};
use crate::error::{ProgressionError, ValidationError};
use crate::models::{MaxType, ProgressionContext, ProgressionResult, TriggerType};

/// Increment once per completed cycle.
///
/// One configuration can serve several lifts with different increments
/// (+10 lower body, +5 upper body) through [`CycleProgression::apply_with_increment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleProgression {
    pub id: String,
    pub name: String,
    pub increment: f64,
    pub max_type: MaxType,
}

impl CycleProgression {
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
        self.apply_with_increment(ctx, None)
    }

    /// Apply using `override_increment` in place of the configured default.
    pub fn apply_with_increment(
        &self,
        ctx: &ProgressionContext,
        override_increment: Option<f64>,
    ) -> Result<ProgressionResult, ProgressionError> {
        check_context(ctx)?;
        self.validate().map_err(ProgressionError::InvalidConfig)?;
        if let Some(increment) = override_increment {
            require_positive(increment, "overrideIncrement")
                .map_err(ProgressionError::InvalidArgument)?;
        }

        if let Some(reason) =
            precondition_mismatch(TriggerType::AfterCycle, Some(self.max_type), ctx)
        {
            return Ok(ProgressionResult::not_applied(ctx, reason));
        }

        let increment = override_increment.unwrap_or(self.increment);
        Ok(ProgressionResult::applied(ctx, increment))
    }
}

impl Progression for CycleProgression {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn progression_type(&self) -> ProgressionType {
        ProgressionType::Cycle
    }

    fn trigger_type(&self) -> TriggerType {
        TriggerType::AfterCycle
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(&self.id, "id")?;
        require_id(&self.name, "name")?;
        require_positive(self.increment, "increment")
    }

    fn apply(&mut self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        CycleProgression::apply(self, ctx)
    }
}
