//! Progression engine for strength programs.
//!
//! Given a lifter's current tracked max and the training event that just
//! happened, a strategy decides whether the max moves and by how much.
//! Strategies are stored as tagged JSON and decoded through a [`Registry`].
//! The [`store`] module holds the SQLite side: stored strategies, failure
//! counters and the evaluation log.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod progression;
pub mod registry;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigError, EngineConfig};
pub use db::{initialize_db, DbPool};
pub use error::{ProgressionError, ValidationError};
pub use models::{
  FailureCounter, MaxType, ProgressionContext, ProgressionResult, TriggerContext, TriggerEvent,
  TriggerType,
};
pub use progression::{Progression, ProgressionType, Strategy};
pub use registry::{default_registry, Registry};
pub use store::{apply_progression, apply_to_stored, StoreError};
