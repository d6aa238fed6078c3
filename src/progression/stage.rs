//! Stage progression: cycle through rep schemes at constant weight.
//!
//! Each failure moves the lifter to the next stage (for example 5x3 -> 6x2 ->
//! 10x1). Failing the last stage either resets to the first one, optionally
//! with a deload, or stops and asks for a human decision.
//!
//! This is the only strategy with runtime state: `current_stage` changes
//! inside [`StageProgression::apply`], so one instance must not be applied from
//! two places at once. Load it, apply, and persist the new index.

use serde::{Deserialize, Serialize};

use super::{check_context, clamped_deload, precondition_mismatch};
use super::{require_fraction, require_id};
use super::{Progression, ProgressionType};
use crate::error::{ProgressionError, ValidationError};
use crate::models::{ProgressionContext, ProgressionResult, TriggerType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub name: String,
    pub sets: u32,
    pub reps: u32,
    #[serde(default, rename = "isAMRAP")]
    pub is_amrap: bool,
    /// Total reps the stage must produce to count as completed
    pub min_volume: u32,
}

impl Stage {
    pub fn new(name: impl Into<String>, sets: u32, reps: u32, min_volume: u32) -> Self {
        Self {
            name: name.into(),
            sets,
            reps,
            is_amrap: false,
            min_volume,
        }
    }

    pub fn prescribed_volume(&self) -> u32 {
        self.sets.saturating_mul(self.reps)
    }

    pub fn volume_met(&self, total_reps: u32) -> bool {
        total_reps >= self.min_volume
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(&self.name, "stages.name")?;
        if self.sets < 1 {
            return Err(ValidationError::invalid("stages.sets", "must be at least 1"));
        }
        if self.reps < 1 {
            return Err(ValidationError::invalid("stages.reps", "must be at least 1"));
        }
        if self.min_volume < 1 {
            return Err(ValidationError::invalid("stages.minVolume", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgression {
    pub id: String,
    pub name: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub current_stage: usize,
    pub reset_on_exhaustion: bool,
    #[serde(default)]
    pub deload_on_reset: bool,
    /// Only read when `deload_on_reset` is set
    #[serde(default)]
    pub deload_percent: f64,
}

impl StageProgression {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        stages: Vec<Stage>,
        reset_on_exhaustion: bool,
        deload_on_reset: Option<f64>,
    ) -> Result<Self, ProgressionError> {
        let progression = Self {
            id: id.into(),
            name: name.into(),
            stages,
            current_stage: 0,
            reset_on_exhaustion,
            deload_on_reset: deload_on_reset.is_some(),
            deload_percent: deload_on_reset.unwrap_or_default(),
        };
        progression
            .validate()
            .map_err(ProgressionError::InvalidConfig)?;
        Ok(progression)
    }

    pub fn current(&self) -> Option<&Stage> {
        self.stages.get(self.current_stage)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.current_stage + 1 >= self.stages.len()
    }

    pub fn apply(
        &mut self,
        ctx: &ProgressionContext,
    ) -> Result<ProgressionResult, ProgressionError> {
        check_context(ctx)?;
        self.validate().map_err(ProgressionError::InvalidConfig)?;

        if let Some(reason) = precondition_mismatch(TriggerType::OnFailure, None, ctx) {
            return Ok(ProgressionResult::not_applied(ctx, reason));
        }

        if !self.is_terminal() {
            self.current_stage += 1;
            return Ok(ProgressionResult::applied(ctx, 0.0));
        }

        if !self.reset_on_exhaustion {
            tracing::warn!(
                progression = %self.id,
                user = %ctx.user_id,
                lift = %ctx.lift_id,
                stage = self.current_stage,
                "final stage failed, waiting for manual intervention"
            );
            return Ok(ProgressionResult::not_applied(
                ctx,
                format!(
                    "failed final stage {} of {}: manual intervention required",
                    self.current_stage + 1,
                    self.stages.len()
                ),
            ));
        }

        self.current_stage = 0;
        let delta = if self.deload_on_reset {
            clamped_deload(ctx.current_value, ctx.current_value * self.deload_percent)
        } else {
            0.0
        };
        tracing::info!(
            progression = %self.id,
            lift = %ctx.lift_id,
            delta,
            "stages exhausted, restarting from the first stage"
        );
        Ok(ProgressionResult::applied(ctx, delta))
    }
}

impl Progression for StageProgression {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn progression_type(&self) -> ProgressionType {
        ProgressionType::Stage
    }

    fn trigger_type(&self) -> TriggerType {
        TriggerType::OnFailure
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(&self.id, "id")?;
        require_id(&self.name, "name")?;
        if self.stages.len() < 2 {
            return Err(ValidationError::invalid(
                "stages",
                format!("need at least 2 stages, got {}", self.stages.len()),
            ));
        }
        for stage in &self.stages {
            stage.validate()?;
        }
        if self.current_stage >= self.stages.len() {
            return Err(ValidationError::invalid(
                "currentStage",
                format!(
                    "index {} is out of range for {} stages",
                    self.current_stage,
                    self.stages.len()
                ),
            ));
        }
        if self.deload_on_reset {
            require_fraction(self.deload_percent, "deloadPercent")?;
        }
        Ok(())
    }

    fn apply(&mut self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        StageProgression::apply(self, ctx)
    }
}
