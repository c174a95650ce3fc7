//! Store configuration.

use serde::Deserialize;

use crate::error::PetuxError;

/// What to do with an effect emitted while no queue is open.
///
/// The effect is dropped in every case. The policy only controls logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardPolicy {
    /// Drop without a trace.
    Silent,
    /// Log at `debug` level.
    #[default]
    Debug,
    /// Log at `warn` level. Useful while hunting reducers that emit from
    /// the wrong place.
    Warn,
}

/// Tunables for an [`EffectStore`](crate::EffectStore).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use petux_core::{DiscardPolicy, EffectsConfig};
///
/// let config = EffectsConfig::from_json_str(r#"{ "discard_policy": "warn" }"#).unwrap();
/// assert_eq!(config.discard_policy, DiscardPolicy::Warn);
/// assert!(config.catch_panics);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    /// Store name used in log spans and error messages.
    pub name: String,
    /// Logging for effects emitted outside a dispatch cycle.
    pub discard_policy: DiscardPolicy,
    /// Catch handler panics and report them as failed effects. When off, a
    /// panicking handler unwinds through the scheduler.
    pub catch_panics: bool,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            discard_policy: DiscardPolicy::default(),
            catch_panics: true,
        }
    }
}

impl EffectsConfig {
    /// Config with the given store name and default settings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse from a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, PetuxError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse from an already decoded JSON value.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, PetuxError> {
        Ok(serde_json::from_value(value)?)
    }
}
