//! Dumping a config struct into the flat parameter map.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{ConfigError, ParamPath, ParamPrivacyInput, SerializedParam, FIELD_SEPARATOR};

#[cfg(test)]
#[path = "dumping_test.rs"]
mod dumping_test;

/// A config struct that can serialize itself into the flat parameter map.
pub trait SerializeConfig {
    /// Returns a map from parameter path to its serialized form.
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam>;

    /// Dumps into a single JSON object, for writing a default config file.
    fn dump_to_json(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(self.dump())?)
    }
}

/// Serializes a single parameter of a config.
pub fn ser_param<T: Serialize>(
    name: &str,
    value: &T,
    description: &str,
    privacy: ParamPrivacyInput,
) -> (ParamPath, SerializedParam) {
    (
        name.to_owned(),
        SerializedParam {
            description: description.to_owned(),
            value: serde_json::to_value(value).expect("Config parameters should serialize"),
            privacy,
        },
    )
}

/// Prefixes every path of a sub-config's dump with the sub-config's name.
pub fn prepend_sub_config_name(
    sub_dump: BTreeMap<ParamPath, SerializedParam>,
    sub_config_name: &str,
) -> BTreeMap<ParamPath, SerializedParam> {
    sub_dump
        .into_iter()
        .map(|(path, param)| (format!("{sub_config_name}{FIELD_SEPARATOR}{path}"), param))
        .collect()
}
