//! Loading a config struct back from the flat parameter map.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{ConfigError, ParamPath, SerializedParam, FIELD_SEPARATOR};

/// Folds a flat dumped map back into the nested config struct it came from.
pub fn load<T: for<'a> Deserialize<'a>>(
    config_dump: &BTreeMap<ParamPath, SerializedParam>,
) -> Result<T, ConfigError> {
    let mut root = Map::new();
    for (path, param) in config_dump {
        insert_value(&mut root, path, param.value.clone())?;
    }
    Ok(serde_json::from_value(Value::Object(root))?)
}

// Walks the dotted path, creating intermediate objects as needed.
fn insert_value(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), ConfigError> {
    let mut current = root;
    let mut segments = path.split(FIELD_SEPARATOR).peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_owned(), value);
            return Ok(());
        }
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry
            .as_object_mut()
            .ok_or_else(|| ConfigError::ParamPathCollision { param_path: path.to_owned() })?;
    }
    Ok(())
}
