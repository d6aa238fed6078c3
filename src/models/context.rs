//! Input and output envelopes shared by every progression strategy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::trigger::TriggerEvent;

// ---------------------------------------------------------------------------
/// Max Type: which tracked maximum is being evaluated
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MaxType {
    /// Tested or estimated one-rep max
    OneRm,
    /// Working max programs take their percentages from
    TrainingMax,
}

impl MaxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneRm => "ONE_RM",
            Self::TrainingMax => "TRAINING_MAX",
        }
    }
}

impl std::fmt::Display for MaxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MaxType {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONE_RM" => Ok(Self::OneRm),
            "TRAINING_MAX" => Ok(Self::TrainingMax),
            _ => Err(ValidationError::UnknownVariant {
                kind: "max type",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for MaxType {
    type Error = ValidationError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MaxType> for String {
    fn from(value: MaxType) -> Self {
        value.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
/// Progression Context: one evaluation request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionContext {
    pub user_id: String,
    pub lift_id: String,
    pub max_type: MaxType,
    pub current_value: f64,
    pub trigger_event: TriggerEvent,
}

impl ProgressionContext {
    pub fn new(
        user_id: impl Into<String>,
        lift_id: impl Into<String>,
        max_type: MaxType,
        current_value: f64,
        trigger_event: TriggerEvent,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            lift_id: lift_id.into(),
            max_type,
            current_value,
            trigger_event,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::MissingField("userId"));
        }
        if self.lift_id.trim().is_empty() {
            return Err(ValidationError::MissingField("liftId"));
        }
        if !self.current_value.is_finite() || self.current_value <= 0.0 {
            return Err(ValidationError::invalid(
                "currentValue",
                format!("{} must be a positive number", self.current_value),
            ));
        }
        self.trigger_event.validate()
    }

    pub fn trigger_type(&self) -> crate::models::TriggerType {
        self.trigger_event.trigger_type
    }
}

// ---------------------------------------------------------------------------
/// Progression Result: the auditable outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionResult {
    pub applied: bool,
    pub previous_value: f64,
    pub new_value: f64,
    /// Signed change; negative for deloads
    pub delta: f64,
    pub lift_id: String,
    pub max_type: MaxType,
    pub applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProgressionResult {
    /// The progression fired and moved the value by `delta`.
    pub fn applied(ctx: &ProgressionContext, delta: f64) -> Self {
        Self {
            applied: true,
            previous_value: ctx.current_value,
            new_value: ctx.current_value + delta,
            delta,
            lift_id: ctx.lift_id.clone(),
            max_type: ctx.max_type,
            applied_at: Utc::now(),
            reason: None,
        }
    }

    /// The progression did not fire; the value is unchanged.
    pub fn not_applied(ctx: &ProgressionContext, reason: impl Into<String>) -> Self {
        Self {
            applied: false,
            previous_value: ctx.current_value,
            new_value: ctx.current_value,
            delta: 0.0,
            lift_id: ctx.lift_id.clone(),
            max_type: ctx.max_type,
            applied_at: Utc::now(),
            reason: Some(reason.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lift_id.trim().is_empty() {
            return Err(ValidationError::MissingField("liftId"));
        }
        if self.applied {
            if self.reason.is_some() {
                return Err(ValidationError::invalid(
                    "reason",
                    "must be empty when the progression applied",
                ));
            }
            if self.new_value != self.previous_value + self.delta {
                return Err(ValidationError::invalid(
                    "delta",
                    format!(
                        "{} + {} does not equal {}",
                        self.previous_value, self.delta, self.new_value
                    ),
                ));
            }
        } else {
            if self.reason.as_deref().is_none_or(|r| r.trim().is_empty()) {
                return Err(ValidationError::MissingField("reason"));
            }
            if self.new_value != self.previous_value || self.delta != 0.0 {
                return Err(ValidationError::invalid(
                    "newValue",
                    "must equal the previous value when the progression did not apply",
                ));
            }
        }
        Ok(())
    }
}
