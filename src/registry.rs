//! Strategy registry: discriminator string -> decoder.
//!
//! Stored strategies are opaque JSON objects carrying a `type` field. Decoding
//! reads that field alone first, then hands the full payload to whichever
//! decoder was registered for it.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ProgressionError;
use crate::progression::{
    AmrapProgression, CycleProgression, DeloadOnFailure, DoubleProgression, LinearProgression,
    Progression, ProgressionType, StageProgression, Strategy,
};

/// Turns raw JSON bytes into a validated strategy
pub type DecodeFn = fn(&[u8]) -> Result<Strategy, ProgressionError>;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    decoders: HashMap<String, DecodeFn>,
}

/// First pass: only the discriminator
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in strategy
    pub fn with_defaults() -> Self {
        let decoders: HashMap<String, DecodeFn> = HashMap::from([
            (
                ProgressionType::Linear.to_string(),
                decode::<LinearProgression> as DecodeFn,
            ),
            (
                ProgressionType::Cycle.to_string(),
                decode::<CycleProgression> as DecodeFn,
            ),
            (
                ProgressionType::Amrap.to_string(),
                decode::<AmrapProgression> as DecodeFn,
            ),
            (
                ProgressionType::DeloadOnFailure.to_string(),
                decode::<DeloadOnFailure> as DecodeFn,
            ),
            (
                ProgressionType::Stage.to_string(),
                decode::<StageProgression> as DecodeFn,
            ),
            (
                ProgressionType::Double.to_string(),
                decode::<DoubleProgression> as DecodeFn,
            ),
        ]);
        Self { decoders }
    }

    /// Associate a discriminator with a decoder, replacing any previous one
    pub fn register(&mut self, kind: impl Into<String>, decoder: DecodeFn) {
        self.decoders.insert(kind.into(), decoder);
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn registered_types(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create_from_json(&self, bytes: &[u8]) -> Result<Strategy, ProgressionError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let kind = envelope
            .kind
            .filter(|k| !k.is_empty())
            .ok_or(ProgressionError::MissingDiscriminator)?;

        let decoder = self
            .decoders
            .get(&kind)
            .ok_or_else(|| ProgressionError::UnknownProgressionType(kind.clone()))?;

        let strategy = decoder(bytes)?;
        tracing::trace!(kind = %kind, id = %strategy.id(), "decoded progression");
        Ok(strategy)
    }
}

/// Decode one variant and reject it unless its configuration validates
pub fn decode<T>(bytes: &[u8]) -> Result<Strategy, ProgressionError>
where
    T: DeserializeOwned + Progression + Into<Strategy>,
{
    let progression: T =
        serde_json::from_slice(bytes).map_err(|source| ProgressionError::InvalidPayload {
            kind: type_name_of::<T>(bytes),
            source,
        })?;
    progression
        .validate()
        .map_err(ProgressionError::InvalidConfig)?;
    Ok(progression.into())
}

fn type_name_of<T>(bytes: &[u8]) -> String {
    serde_json::from_slice::<Envelope>(bytes)
        .ok()
        .and_then(|e| e.kind)
        .unwrap_or_else(|| std::any::type_name::<T>().to_string())
}

/// Process-wide registry holding the built-in strategies
pub fn default_registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::with_defaults)
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------
