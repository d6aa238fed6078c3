//! Error types shared by the trigger model, strategies and registry.
//!
//! Two channels are kept apart: these errors mean the caller or the stored
//! configuration is broken. A strategy whose precondition simply isn't met
//! returns an `Ok` result with `applied == false` instead.

use serde::Serialize;

use crate::models::TriggerType;

// ---------------------------------------------------------------------------
/// Field-level validation failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("trigger type mismatch: event declares {declared}, context is {actual}")]
    TriggerMismatch {
        declared: TriggerType,
        actual: TriggerType,
    },
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// True when the error points at a value outside a closed enumeration,
    /// which usually means a configuration or version skew bug.
    pub fn is_unknown_variant(&self) -> bool {
        matches!(self, Self::UnknownVariant { .. })
    }
}

// ---------------------------------------------------------------------------
/// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProgressionError {
    #[error("invalid progression context: {0}")]
    InvalidContext(ValidationError),

    #[error("invalid progression configuration: {0}")]
    InvalidConfig(ValidationError),

    #[error("invalid argument: {0}")]
    InvalidArgument(ValidationError),

    #[error("progression payload has no type discriminator")]
    MissingDiscriminator,

    #[error("unknown progression type: {0}")]
    UnknownProgressionType(String),

    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Serialize for ProgressionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
