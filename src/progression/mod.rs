//! Progression Engine
//!
//! Decides, for one triggering training event, whether a lifter's tracked max
//! should change and by how much. Each strategy:
//! - responds to exactly one trigger kind (Linear may pick one of two)
//! - re-validates the incoming context and errors on structural problems
//! - returns `applied == false` with a reason when its precondition isn't met
//!
//! All strategies are plain values except [`StageProgression`], which advances
//! its own stage index inside `apply`. Treat a stage strategy as a checked-out
//! resource: load it, apply, persist the new index. Everything else can be
//! shared freely across callers.

mod amrap;
mod cycle;
mod deload;
mod double;
mod linear;
mod stage;

pub use amrap::{AmrapProgression, AmrapThreshold};
pub use cycle::CycleProgression;
pub use deload::{DeloadMode, DeloadOnFailure};
pub use double::DoubleProgression;
pub use linear::LinearProgression;
pub use stage::{Stage, StageProgression};

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ProgressionError, ValidationError};
use crate::models::{MaxType, ProgressionContext, ProgressionResult, TriggerType};
use crate::registry;

// ---------------------------------------------------------------------------
/// Progression Type: wire discriminator for strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProgressionType {
    Linear,
    Cycle,
    Amrap,
    DeloadOnFailure,
    Stage,
    Double,
}

impl ProgressionType {
    pub const ALL: [ProgressionType; 6] = [
        Self::Linear,
        Self::Cycle,
        Self::Amrap,
        Self::DeloadOnFailure,
        Self::Stage,
        Self::Double,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "LINEAR_PROGRESSION",
            Self::Cycle => "CYCLE_PROGRESSION",
            Self::Amrap => "AMRAP_PROGRESSION",
            Self::DeloadOnFailure => "DELOAD_ON_FAILURE",
            Self::Stage => "STAGE_PROGRESSION",
            Self::Double => "DOUBLE_PROGRESSION",
        }
    }
}

impl std::fmt::Display for ProgressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProgressionType {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "progression type",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for ProgressionType {
    type Error = ValidationError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProgressionType> for String {
    fn from(value: ProgressionType) -> Self {
        value.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
/// Progression: the contract every strategy satisfies
// ---------------------------------------------------------------------------

pub trait Progression {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn progression_type(&self) -> ProgressionType;
    /// The one trigger kind this strategy responds to
    fn trigger_type(&self) -> TriggerType;
    /// Static configuration sanity
    fn validate(&self) -> Result<(), ValidationError>;

    /// Evaluate one trigger. Stateful strategies advance themselves here, so
    /// persist them afterwards.
    fn apply(&mut self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError>;

    /// Whether the caller should zero the failure counter after an applied result
    fn should_reset_failure_counter(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
/// Strategy: tagged union over every variant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Strategy {
    #[serde(rename = "LINEAR_PROGRESSION")]
    Linear(LinearProgression),
    #[serde(rename = "CYCLE_PROGRESSION")]
    Cycle(CycleProgression),
    #[serde(rename = "AMRAP_PROGRESSION")]
    Amrap(AmrapProgression),
    #[serde(rename = "DELOAD_ON_FAILURE")]
    DeloadOnFailure(DeloadOnFailure),
    #[serde(rename = "STAGE_PROGRESSION")]
    Stage(StageProgression),
    #[serde(rename = "DOUBLE_PROGRESSION")]
    Double(DoubleProgression),
}

impl Strategy {
    pub fn as_progression(&self) -> &dyn Progression {
        match self {
            Self::Linear(p) => p,
            Self::Cycle(p) => p,
            Self::Amrap(p) => p,
            Self::DeloadOnFailure(p) => p,
            Self::Stage(p) => p,
            Self::Double(p) => p,
        }
    }

    /// True for variants whose `apply` mutates the strategy itself
    pub fn is_stateful(&self) -> bool {
        matches!(self, Self::Stage(_))
    }

    /// Evaluate one trigger. Only the stage variant actually uses `&mut self`.
    pub fn apply(
        &mut self,
        ctx: &ProgressionContext,
    ) -> Result<ProgressionResult, ProgressionError> {
        let progression_type = self.progression_type();
        let result = match self {
            Self::Linear(p) => p.apply(ctx),
            Self::Cycle(p) => p.apply(ctx),
            Self::Amrap(p) => p.apply(ctx),
            Self::DeloadOnFailure(p) => p.apply(ctx),
            Self::Stage(p) => p.apply(ctx),
            Self::Double(p) => p.apply(ctx),
        }?;

        tracing::debug!(
            progression = %progression_type,
            user = %ctx.user_id,
            lift = %ctx.lift_id,
            trigger = %ctx.trigger_type(),
            applied = result.applied,
            delta = result.delta,
            reason = result.reason.as_deref().unwrap_or(""),
            "evaluated progression"
        );
        Ok(result)
    }

    /// Decode through the default registry
    pub fn from_json(json: &str) -> Result<Self, ProgressionError> {
        registry::default_registry().create_from_json(json.as_bytes())
    }

    pub fn to_json(&self) -> Result<String, ProgressionError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Progression for Strategy {
    fn id(&self) -> &str {
        self.as_progression().id()
    }

    fn name(&self) -> &str {
        self.as_progression().name()
    }

    fn progression_type(&self) -> ProgressionType {
        self.as_progression().progression_type()
    }

    fn trigger_type(&self) -> TriggerType {
        self.as_progression().trigger_type()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.as_progression().validate()
    }

    fn apply(&mut self, ctx: &ProgressionContext) -> Result<ProgressionResult, ProgressionError> {
        Strategy::apply(self, ctx)
    }

    fn should_reset_failure_counter(&self) -> bool {
        self.as_progression().should_reset_failure_counter()
    }
}

impl<'de> Deserialize<'de> for Strategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let bytes = serde_json::to_vec(&value).map_err(de::Error::custom)?;
        registry::default_registry()
            .create_from_json(&bytes)
            .map_err(de::Error::custom)
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Strategy {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_variant! {
    Linear => LinearProgression,
    Cycle => CycleProgression,
    Amrap => AmrapProgression,
    DeloadOnFailure => DeloadOnFailure,
    Stage => StageProgression,
    Double => DoubleProgression,
}

// ---------------------------------------------------------------------------
// Shared checks
// ---------------------------------------------------------------------------

pub(crate) fn check_context(ctx: &ProgressionContext) -> Result<(), ProgressionError> {
    ctx.validate().map_err(ProgressionError::InvalidContext)
}

/// Trigger first, then max type: the first mismatch becomes the reason.
pub(crate) fn precondition_mismatch(
    expected_trigger: TriggerType,
    expected_max: Option<MaxType>,
    ctx: &ProgressionContext,
) -> Option<String> {
    let actual_trigger = ctx.trigger_type();
    if actual_trigger != expected_trigger {
        return Some(format!(
            "trigger type mismatch: expected {}, got {}",
            expected_trigger, actual_trigger
        ));
    }
    match expected_max {
        Some(expected) if expected != ctx.max_type => Some(format!(
            "max type mismatch: expected {}, got {}",
            expected, ctx.max_type
        )),
        _ => None,
    }
}

pub(crate) fn require_id(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

pub(crate) fn require_positive(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            field,
            format!("{} must be greater than zero", value),
        ))
    }
}

pub(crate) fn require_fraction(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            field,
            format!("{} must be in (0, 1]", value),
        ))
    }
}

/// Negative delta for removing `amount` from `current`, never dropping below zero
pub(crate) fn clamped_deload(current: f64, amount: f64) -> f64 {
    if amount >= current {
        -current
    } else {
        -amount
    }
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------
