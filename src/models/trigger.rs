//! Trigger model: the closed set of training events that can cause a
//! progression to be re-evaluated, and the payload each one carries.
//!
//! On the wire every context is an object with a `type` tag. Events wrap the
//! context in an envelope that repeats the tag, and decoding happens in two
//! passes: read the tag, then decode the payload for that tag only.

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ProgressionError, ValidationError};

// ---------------------------------------------------------------------------
/// Trigger Type: which event fired
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TriggerType {
    AfterSession,
    AfterWeek,
    AfterCycle,
    AfterSet,
    OnFailure,
}

impl TriggerType {
    pub const ALL: [TriggerType; 5] = [
        Self::AfterSession,
        Self::AfterWeek,
        Self::AfterCycle,
        Self::AfterSet,
        Self::OnFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AfterSession => "AFTER_SESSION",
            Self::AfterWeek => "AFTER_WEEK",
            Self::AfterCycle => "AFTER_CYCLE",
            Self::AfterSet => "AFTER_SET",
            Self::OnFailure => "ON_FAILURE",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "trigger type",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for TriggerType {
    type Error = ValidationError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TriggerType> for String {
    fn from(value: TriggerType) -> Self {
        value.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
/// Context payloads, one per trigger kind
// ---------------------------------------------------------------------------

/// A completed training session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTriggerContext {
    pub session_id: String,
    pub day_key: String,
    pub week_number: u32,
    /// Lifts performed in the session, in the order they were performed
    #[serde(default)]
    pub lifts_performed: Vec<String>,
}

impl SessionTriggerContext {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(&self.session_id, "sessionId")?;
        require_non_empty(&self.day_key, "dayKey")?;
        if self.week_number < 1 {
            return Err(ValidationError::invalid("weekNumber", "must be at least 1"));
        }
        Ok(())
    }
}

/// The program rolled over to a new week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekTriggerContext {
    pub previous_week: u32,
    pub new_week: u32,
    pub cycle_iteration: u32,
}

impl WeekTriggerContext {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.previous_week < 1 {
            return Err(ValidationError::invalid("previousWeek", "must be at least 1"));
        }
        if self.new_week <= self.previous_week {
            return Err(ValidationError::invalid(
                "newWeek",
                format!(
                    "{} must be greater than previous week {}",
                    self.new_week, self.previous_week
                ),
            ));
        }
        if self.cycle_iteration < 1 {
            return Err(ValidationError::invalid("cycleIteration", "must be at least 1"));
        }
        Ok(())
    }
}

/// A full program cycle was completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleTriggerContext {
    pub completed_cycle: u32,
    pub new_cycle: u32,
    pub total_weeks: u32,
}

impl CycleTriggerContext {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.completed_cycle < 1 {
            return Err(ValidationError::invalid("completedCycle", "must be at least 1"));
        }
        if Some(self.new_cycle) != self.completed_cycle.checked_add(1) {
            return Err(ValidationError::invalid(
                "newCycle",
                format!(
                    "{} must directly follow completed cycle {}",
                    self.new_cycle, self.completed_cycle
                ),
            ));
        }
        if self.total_weeks < 1 {
            return Err(ValidationError::invalid("totalWeeks", "must be at least 1"));
        }
        Ok(())
    }
}

/// A single logged set, used by rep-driven strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTriggerContext {
    pub set_id: String,
    pub lift_id: String,
    pub reps_performed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps_ceiling: Option<u32>,
    #[serde(default, rename = "isAMRAP")]
    pub is_amrap: bool,
    pub weight: f64,
}

impl SetTriggerContext {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(&self.set_id, "setId")?;
        require_non_empty(&self.lift_id, "liftId")?;
        if self.reps_ceiling == Some(0) {
            return Err(ValidationError::invalid("repsCeiling", "must be at least 1"));
        }
        require_non_negative(self.weight, "weight")
    }
}

/// A set was missed: fewer reps than the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureTriggerContext {
    pub failed_set_id: String,
    pub lift_id: String,
    pub target_reps: u32,
    pub reps_performed: u32,
    pub consecutive_failures: u32,
    pub weight: f64,
    pub progression_id: String,
}

impl FailureTriggerContext {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty(&self.failed_set_id, "failedSetId")?;
        require_non_empty(&self.lift_id, "liftId")?;
        require_non_empty(&self.progression_id, "progressionId")?;
        if self.target_reps < 1 {
            return Err(ValidationError::invalid("targetReps", "must be at least 1"));
        }
        if self.reps_performed >= self.target_reps {
            return Err(ValidationError::invalid(
                "repsPerformed",
                format!(
                    "{} reps is not a failure against a target of {}",
                    self.reps_performed, self.target_reps
                ),
            ));
        }
        if self.consecutive_failures < 1 {
            return Err(ValidationError::invalid(
                "consecutiveFailures",
                "must be at least 1",
            ));
        }
        require_non_negative(self.weight, "weight")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum TriggerContext {
    #[serde(rename = "AFTER_SESSION")]
    Session(SessionTriggerContext),
    #[serde(rename = "AFTER_WEEK")]
    Week(WeekTriggerContext),
    #[serde(rename = "AFTER_CYCLE")]
    Cycle(CycleTriggerContext),
    #[serde(rename = "AFTER_SET")]
    Set(SetTriggerContext),
    #[serde(rename = "ON_FAILURE")]
    Failure(FailureTriggerContext),
}

impl TriggerContext {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Session(_) => TriggerType::AfterSession,
            Self::Week(_) => TriggerType::AfterWeek,
            Self::Cycle(_) => TriggerType::AfterCycle,
            Self::Set(_) => TriggerType::AfterSet,
            Self::Failure(_) => TriggerType::OnFailure,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Session(ctx) => ctx.validate(),
            Self::Week(ctx) => ctx.validate(),
            Self::Cycle(ctx) => ctx.validate(),
            Self::Set(ctx) => ctx.validate(),
            Self::Failure(ctx) => ctx.validate(),
        }
    }

    /// Decode a tagged context: read `type`, then decode only that variant.
    pub fn from_value(value: Value) -> Result<Self, ProgressionError> {
        let trigger_type = match value.get("type").and_then(Value::as_str) {
            Some(tag) => tag
                .parse::<TriggerType>()
                .map_err(ProgressionError::InvalidContext)?,
            None => {
                return Err(ProgressionError::InvalidContext(
                    ValidationError::MissingField("context.type"),
                ))
            }
        };

        let decoded = match trigger_type {
            TriggerType::AfterSession => serde_json::from_value(value).map(Self::Session),
            TriggerType::AfterWeek => serde_json::from_value(value).map(Self::Week),
            TriggerType::AfterCycle => serde_json::from_value(value).map(Self::Cycle),
            TriggerType::AfterSet => serde_json::from_value(value).map(Self::Set),
            TriggerType::OnFailure => serde_json::from_value(value).map(Self::Failure),
        };

        decoded.map_err(|source| ProgressionError::InvalidPayload {
            kind: trigger_type.to_string(),
            source,
        })
    }
}

impl<'de> Deserialize<'de> for TriggerContext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
/// Trigger Event: envelope handed to every strategy
// ---------------------------------------------------------------------------

/// The event that caused an evaluation.
///
/// Older producers never sent a `context` and put what they knew into the flat
/// optional fields instead. Both shapes are still accepted; the accessor
/// methods prefer the typed context and fall back to the flat fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawTriggerEvent")]
pub struct TriggerEvent {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<TriggerContext>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps_performed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps_ceiling: Option<u32>,
    #[serde(rename = "isAMRAP", skip_serializing_if = "std::ops::Not::not")]
    pub is_amrap: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifts_performed: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
}

/// First-pass wire shape: the tag stays a string and the context stays raw.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTriggerEvent {
    #[serde(rename = "type")]
    trigger_type: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    context: Option<Value>,
    #[serde(default)]
    reps_performed: Option<u32>,
    #[serde(default)]
    reps_ceiling: Option<u32>,
    #[serde(default, rename = "isAMRAP")]
    is_amrap: bool,
    #[serde(default)]
    lifts_performed: Option<Vec<String>>,
    #[serde(default)]
    week_number: Option<u32>,
    #[serde(default)]
    cycle_iteration: Option<u32>,
    #[serde(default)]
    consecutive_failures: Option<u32>,
}

impl TryFrom<RawTriggerEvent> for TriggerEvent {
    type Error = ProgressionError;

    fn try_from(raw: RawTriggerEvent) -> Result<Self, Self::Error> {
        let trigger_type = raw
            .trigger_type
            .parse::<TriggerType>()
            .map_err(ProgressionError::InvalidContext)?;

        let context = match raw.context {
            None | Some(Value::Null) => None,
            Some(value) => Some(TriggerContext::from_value(value)?),
        };

        Ok(Self {
            trigger_type,
            timestamp: raw.timestamp,
            context,
            reps_performed: raw.reps_performed,
            reps_ceiling: raw.reps_ceiling,
            is_amrap: raw.is_amrap,
            lifts_performed: raw.lifts_performed,
            week_number: raw.week_number,
            cycle_iteration: raw.cycle_iteration,
            consecutive_failures: raw.consecutive_failures,
        })
    }
}

impl TriggerEvent {
    /// A bare event of the given kind, stamped now
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            timestamp: Utc::now(),
            context: None,
            reps_performed: None,
            reps_ceiling: None,
            is_amrap: false,
            lifts_performed: None,
            week_number: None,
            cycle_iteration: None,
            consecutive_failures: None,
        }
    }

    pub fn from_context(context: TriggerContext) -> Self {
        let mut event = Self::new(context.trigger_type());
        event.context = Some(context);
        event
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_reps(mut self, reps_performed: u32) -> Self {
        self.reps_performed = Some(reps_performed);
        self
    }

    pub fn with_ceiling(mut self, reps_ceiling: u32) -> Self {
        self.reps_ceiling = Some(reps_ceiling);
        self
    }

    pub fn amrap(mut self) -> Self {
        self.is_amrap = true;
        self
    }

    pub fn with_lifts<I, S>(mut self, lifts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lifts_performed = Some(lifts.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_consecutive_failures(mut self, count: u32) -> Self {
        self.consecutive_failures = Some(count);
        self
    }

    /// Check the envelope before any strategy sees it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(context) = &self.context {
            let actual = context.trigger_type();
            if actual != self.trigger_type {
                return Err(ValidationError::TriggerMismatch {
                    declared: self.trigger_type,
                    actual,
                });
            }
            context.validate()?;
        }
        if self.reps_ceiling == Some(0) {
            return Err(ValidationError::invalid("repsCeiling", "must be at least 1"));
        }
        if self.week_number == Some(0) {
            return Err(ValidationError::invalid("weekNumber", "must be at least 1"));
        }
        if self.cycle_iteration == Some(0) {
            return Err(ValidationError::invalid("cycleIteration", "must be at least 1"));
        }
        Ok(())
    }

    /// Lifts performed in the triggering session. `None` means "not reported".
    pub fn lifts_performed(&self) -> Option<&[String]> {
        match &self.context {
            Some(TriggerContext::Session(ctx)) => Some(ctx.lifts_performed.as_slice()),
            _ => self.lifts_performed.as_deref(),
        }
    }

    pub fn reps_performed(&self) -> Option<u32> {
        match &self.context {
            Some(TriggerContext::Set(ctx)) => Some(ctx.reps_performed),
            _ => self.reps_performed,
        }
    }

    pub fn reps_ceiling(&self) -> Option<u32> {
        match &self.context {
            Some(TriggerContext::Set(ctx)) => ctx.reps_ceiling.or(self.reps_ceiling),
            _ => self.reps_ceiling,
        }
    }

    pub fn is_amrap(&self) -> bool {
        match &self.context {
            Some(TriggerContext::Set(ctx)) => ctx.is_amrap || self.is_amrap,
            _ => self.is_amrap,
        }
    }

    pub fn consecutive_failures(&self) -> Option<u32> {
        match &self.context {
            Some(TriggerContext::Failure(ctx)) => Some(ctx.consecutive_failures),
            _ => self.consecutive_failures,
        }
    }

    pub fn week_number(&self) -> Option<u32> {
        match &self.context {
            Some(TriggerContext::Session(ctx)) => Some(ctx.week_number),
            Some(TriggerContext::Week(ctx)) => Some(ctx.new_week),
            _ => self.week_number,
        }
    }

    pub fn cycle_iteration(&self) -> Option<u32> {
        match &self.context {
            Some(TriggerContext::Week(ctx)) => Some(ctx.cycle_iteration),
            Some(TriggerContext::Cycle(ctx)) => Some(ctx.new_cycle),
            _ => self.cycle_iteration,
        }
    }
}

fn require_non_empty(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

fn require_non_negative(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 {
        Err(ValidationError::invalid(
            field,
            format!("{} must be a non-negative number", value),
        ))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------
