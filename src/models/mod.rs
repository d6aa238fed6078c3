pub mod context;
pub mod failure;
pub mod trigger;

pub use context::{MaxType, ProgressionContext, ProgressionResult};
pub use failure::FailureCounter;
pub use trigger::{
    CycleTriggerContext, FailureTriggerContext, SessionTriggerContext, SetTriggerContext,
    TriggerContext, TriggerEvent, TriggerType, WeekTriggerContext,
};
