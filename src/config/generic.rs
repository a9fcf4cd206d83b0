//! Untyped configuration blocks decoded onto typed records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ConfigError, match_key};

/// A configuration block whose shape is only known to its consumer.
///
/// The `type` tag lets a caller pick the record to decode `config` into.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GenericConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub config: Map<String, Value>,
}

impl GenericConfig {
    /// Decode `config` onto `into`.
    ///
    /// Fields of `into` without a matching key keep their current value.
    /// Nested maps merge recursively rather than replacing whole records.
    pub fn load<T>(&self, into: &mut T) -> Result<(), ConfigError>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut current = serde_json::to_value(&*into).map_err(ConfigError::Decode)?;
        merge(&mut current, &self.config);
        *into = serde_json::from_value(current).map_err(ConfigError::Decode)?;
        Ok(())
    }
}

fn merge(dest: &mut Value, source: &Map<String, Value>) {
    if !dest.is_object() {
        *dest = Value::Object(source.clone());
        return;
    }
    let Some(dest) = dest.as_object_mut() else {
        return;
    };

    for (key, value) in source {
        let Some(existing) = match_key(dest, key) else {
            dest.insert(key.clone(), value.clone());
            continue;
        };
        let slot = &mut dest[&existing];
        match (slot.is_object(), value) {
            (true, Value::Object(nested)) => merge(slot, nested),
            _ => *slot = value.clone(),
        }
    }
}
