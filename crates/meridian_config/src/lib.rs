//! Serialization utilities for component configurations.
//!
//! A config struct dumps itself into a flat map whose keys are dotted
//! parameter paths:
//!
//! ```json
//! "conf1.conf2.param_name": {
//!     "description": "Param description.",
//!     "value": json_value,
//!     "privacy": "Public"
//! }
//! ```
//!
//! The flat form is what deployment tooling and the command line updater
//! consume; [`loading::load`] folds it back into the nested struct.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod converters;
pub mod dumping;
pub mod loading;

/// The path of a parameter in the flat config map, e.g. `timeouts.base`.
pub type ParamPath = String;

/// Separator between nested config names in a [`ParamPath`].
pub const FIELD_SEPARATOR: &str = ".";

/// Errors at the config-serialization layer.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("parameter path collides with a nested config: {param_path}")]
    ParamPathCollision { param_path: ParamPath },
}

/// Whether a parameter may be published (logs, dashboards) or must be kept
/// out of shared output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamPrivacyInput {
    Public,
    Private,
}

/// A parameter as it appears in the dumped config map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedParam {
    /// Human-readable description of the parameter.
    pub description: String,
    /// The parameter's default value.
    pub value: Value,
    /// The parameter's privacy classification.
    pub privacy: ParamPrivacyInput,
}
