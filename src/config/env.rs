//! Environment variables decoded onto typed records.
//!
//! Variable names are the upper-cased, underscore-joined path of each field,
//! optionally behind a prefix: with prefix `app`, the field `log.level`
//! is read from `APP_LOG_LEVEL`.
//!
//! Values are coerced to the shape the field currently has once serialized:
//! - strings are taken as-is
//! - booleans accept `1 t T true TRUE True` and `0 f F false FALSE False`
//! - numbers parse as integers, or floats when the field holds a float
//! - lists split on `,`
//! - maps parse `key:value` pairs split on `,`
//!
//! Unset variables leave the field untouched.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

use super::ConfigError;

/// Populate `into` from the process environment.
pub fn process<T>(prefix: Option<&str>, into: &mut T) -> Result<(), ConfigError>
where
    T: Serialize + DeserializeOwned,
{
    process_with(prefix, into, |name| std::env::var(name).ok())
}

/// Populate `into` from variables resolved through `lookup`.
pub fn process_with<T, F>(prefix: Option<&str>, into: &mut T, lookup: F) -> Result<(), ConfigError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let mut current = serde_json::to_value(&*into).map_err(ConfigError::Decode)?;
    let prefix = prefix
        .filter(|p| !p.is_empty())
        .map(|p| p.to_ascii_uppercase());

    let mut schema = Schema::<T>::new(current.clone());
    let mut untyped = Vec::new();
    if let Value::Object(fields) = &mut current {
        apply_object(fields, prefix.as_deref(), "", &lookup, &mut schema, &mut untyped)?;
    }
    settle_untyped::<T>(&mut current, &untyped);

    *into = serde_json::from_value(current).map_err(ConfigError::Decode)?;
    Ok(())
}

/// Answers shape questions about `T` by decoding trial values.
struct Schema<T> {
    base: Value,
    _record: PhantomData<fn() -> T>,
}

impl<T> Schema<T>
where
    T: Serialize + DeserializeOwned,
{
    const TRIAL_KEY: &'static str = "__env_trial_key__";

    fn new(base: Value) -> Self {
        Self {
            base,
            _record: PhantomData,
        }
    }

    fn set(&mut self, pointer: &str, value: Value) {
        if let Some(slot) = self.base.pointer_mut(pointer) {
            *slot = value;
        }
    }

    /// Decode `T` with `value` at `pointer`, then encode it again.
    fn round_trip(&self, pointer: &str, value: Value) -> Option<Value> {
        let mut trial = self.base.clone();
        *trial.pointer_mut(pointer)? = value;
        let typed: T = serde_json::from_value(trial).ok()?;
        serde_json::to_value(&typed).ok()
    }

    /// A map keeps keys it has never seen; a record drops or rejects them.
    fn is_map(&self, pointer: &str) -> bool {
        let kept = format!("{pointer}/{}", Self::TRIAL_KEY);
        [
            Value::String(String::new()),
            Value::from(0),
            Value::Bool(false),
            Value::Array(Vec::new()),
            Value::Object(Map::new()),
        ]
        .into_iter()
        .any(|value| {
            let trial = Value::Object(Map::from_iter([(Self::TRIAL_KEY.to_string(), value)]));
            self.round_trip(pointer, trial)
                .is_some_and(|out| out.pointer(&kept).is_some())
        })
    }

    /// The default object for an unset optional field, when it holds one.
    fn default_object(&self, pointer: &str) -> Option<Map<String, Value>> {
        let out = self.round_trip(pointer, Value::Object(Map::new()))?;
        match out.pointer(pointer)? {
            Value::Object(fields) => Some(fields.clone()),
            _ => None,
        }
    }
}

/// A value written where the record gave no shape to follow (an unset
/// `Option`, an empty list). It is written as text first.
struct Untyped {
    pointer: String,
    original: Value,
}

/// Decide, field by field, whether the record accepts the text form of each
/// untyped value or needs it re-typed as a number or boolean.
fn settle_untyped<T: DeserializeOwned>(current: &mut Value, untyped: &[Untyped]) {
    if untyped.is_empty() {
        return;
    }

    let mut base = current.clone();
    for u in untyped {
        if let Some(slot) = base.pointer_mut(&u.pointer) {
            *slot = u.original.clone();
        }
    }

    for u in untyped {
        let Some(written) = current.pointer(&u.pointer).cloned() else {
            continue;
        };
        let mut trial = base.clone();
        if let Some(slot) = trial.pointer_mut(&u.pointer) {
            *slot = written.clone();
        }
        if serde_json::from_value::<T>(trial).is_err()
            && let Some(slot) = current.pointer_mut(&u.pointer)
        {
            *slot = infer(&written);
        }
    }
}

/// Load `KEY=VALUE` lines from `path` into the process environment.
///
/// Variables that are already set keep their value.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();
    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Loaded env file");
            Ok(())
        }
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ConfigError::FileNotFound(path.to_path_buf()))
        }
        Err(source) => Err(ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn var_name(prefix: Option<&str>, key: &str) -> String {
    let key = key.to_ascii_uppercase();
    match prefix {
        Some(prefix) => format!("{prefix}_{key}"),
        None => key,
    }
}

/// Apply variables to the fields of one record. Returns how many were set.
fn apply_object<T, F>(
    fields: &mut Map<String, Value>,
    prefix: Option<&str>,
    pointer: &str,
    lookup: &F,
    schema: &mut Schema<T>,
    untyped: &mut Vec<Untyped>,
) -> Result<usize, ConfigError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let mut applied = 0;
    for (key, slot) in fields.iter_mut() {
        let var = var_name(prefix, key);
        let pointer = format!("{pointer}/{}", escape_pointer(key));

        match &mut *slot {
            Value::Object(children) if !schema.is_map(&pointer) => {
                applied += apply_object(children, Some(&var), &pointer, lookup, schema, untyped)?;
            }
            Value::Null => {
                if let Some(value) = apply_unset(&var, &pointer, lookup, schema, untyped)? {
                    *slot = value;
                    applied += 1;
                }
            }
            _ => {
                if let Some(raw) = lookup(&var) {
                    *slot = coerce(&var, &raw, slot, &pointer, untyped)?;
                    applied += 1;
                }
            }
        }
    }
    Ok(applied)
}

/// An unset optional field. A record is built from its default and kept only
/// when one of its own variables is set; anything else reads its variable.
fn apply_unset<T, F>(
    var: &str,
    pointer: &str,
    lookup: &F,
    schema: &mut Schema<T>,
    untyped: &mut Vec<Untyped>,
) -> Result<Option<Value>, ConfigError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let Some(mut record) = schema.default_object(pointer) else {
        return lookup(var)
            .map(|raw| coerce(var, &raw, &Value::Null, pointer, untyped))
            .transpose();
    };

    schema.set(pointer, Value::Object(record.clone()));
    if schema.is_map(pointer) {
        schema.set(pointer, Value::Null);
        let shape = Value::Object(Map::new());
        return lookup(var)
            .map(|raw| coerce(var, &raw, &shape, pointer, untyped))
            .transpose();
    }

    if apply_object(&mut record, Some(var), pointer, lookup, schema, untyped)? == 0 {
        schema.set(pointer, Value::Null);
        return Ok(None);
    }
    Ok(Some(Value::Object(record)))
}

fn coerce(
    var: &str,
    raw: &str,
    current: &Value,
    pointer: &str,
    untyped: &mut Vec<Untyped>,
) -> Result<Value, ConfigError> {
    let invalid = |reason: &str| ConfigError::EnvDecode {
        var: var.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    match current {
        Value::String(_) => Ok(Value::String(raw.to_string())),
        Value::Bool(_) => parse_bool(raw)
            .map(Value::Bool)
            .ok_or_else(|| invalid("invalid boolean")),
        Value::Number(n) => parse_number(raw, n.is_f64()).ok_or_else(|| invalid("invalid number")),
        Value::Array(items) => {
            if raw.trim().is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            let Some(template) = items.first() else {
                untyped.push(Untyped {
                    pointer: pointer.to_string(),
                    original: current.clone(),
                });
                let parsed = raw.split(',').map(|s| Value::String(s.trim().to_string()));
                return Ok(Value::Array(parsed.collect()));
            };
            let mut parsed = Vec::new();
            for (i, item) in raw.split(',').map(str::trim).enumerate() {
                parsed.push(coerce(var, item, template, &format!("{pointer}/{i}"), untyped)?);
            }
            Ok(Value::Array(parsed))
        }
        Value::Object(_) => parse_map(raw).ok_or_else(|| invalid("invalid map item, expected key:value")),
        Value::Null => {
            untyped.push(Untyped {
                pointer: pointer.to_string(),
                original: Value::Null,
            });
            Ok(Value::String(raw.to_string()))
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn parse_number(raw: &str, float: bool) -> Option<Value> {
    let raw = raw.trim();
    if float {
        return raw.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::from(n));
    }
    raw.parse::<u64>().ok().map(Value::from)
}

fn parse_map(raw: &str) -> Option<Value> {
    let mut map = Map::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = item.split_once(':')?;
        map.insert(key.trim().to_string(), Value::String(value.trim().to_string()));
    }
    Some(Value::Object(map))
}

fn infer(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(infer).collect()),
        Value::String(raw) => {
            if let Some(number) = parse_number(raw, false) {
                return number;
            }
            if let Some(number) = parse_number(raw, true) {
                return number;
            }
            match raw.as_str() {
                "true" | "TRUE" | "True" => Value::Bool(true),
                "false" | "FALSE" | "False" => Value::Bool(false),
                _ => value.clone(),
            }
        }
        _ => value.clone(),
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    #[serde(default)]
    struct Log {
        level: String,
        file: String,
        json: bool,
        fields: HashMap<String, String>,
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    #[serde(default)]
    struct Service {
        log: Log,
        service_field: i32,
        ratio: f64,
        servers: Vec<String>,
        ports: Vec<u16>,
        timeout: Option<u64>,
        name: Option<String>,
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn process_reads_nested_fields() {
        let mut config = Service::default();
        let lookup = vars(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_JSON", "true"),
            ("LOG_FIELDS", "abc:def,xyz:123"),
            ("SERVICE_FIELD", "5"),
        ]);
        process_with(None, &mut config, lookup).unwrap();

        assert_eq!(config.log.level, "debug");
        assert!(config.log.json);
        assert_eq!(config.log.fields.len(), 2);
        assert_eq!(config.log.fields["abc"], "def");
        assert_eq!(config.log.fields["xyz"], "123");
        assert_eq!(config.service_field, 5);
    }

    #[test]
    fn process_applies_prefix() {
        let mut config = Service::default();
        let lookup = vars(&[("TEST_LOG_LEVEL", "warn"), ("LOG_LEVEL", "debug")]);
        process_with(Some("test"), &mut config, lookup).unwrap();
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn process_keeps_defaults_for_unset_vars() {
        let mut config = Service {
            service_field: 42,
            log: Log {
                level: "info".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        process_with(None, &mut config, vars(&[("LOG_FILE", "/tmp/x.log")])).unwrap();
        assert_eq!(config.service_field, 42);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.file, "/tmp/x.log");
    }

    #[test]
    fn process_splits_lists() {
        let mut config = Service::default();
        let lookup = vars(&[("SERVERS", "nats://a:4222, nats://b:4222"), ("PORTS", "1,2")]);
        process_with(None, &mut config, lookup).unwrap();
        assert_eq!(config.servers, vec!["nats://a:4222", "nats://b:4222"]);
        assert_eq!(config.ports, vec![1, 2]);
    }

    #[test]
    fn process_fills_optional_fields() {
        let mut config = Service::default();
        let lookup = vars(&[("TIMEOUT", "30"), ("NAME", "1234")]);
        process_with(None, &mut config, lookup).unwrap();
        assert_eq!(config.timeout, Some(30));
        assert_eq!(config.name.as_deref(), Some("1234"));
    }

    #[test]
    fn process_parses_floats() {
        let mut config = Service::default();
        process_with(None, &mut config, vars(&[("RATIO", "0.25")])).unwrap();
        assert_eq!(config.ratio, 0.25);
    }

    #[test]
    fn process_rejects_bad_number() {
        let mut config = Service::default();
        let err = process_with(None, &mut config, vars(&[("SERVICE_FIELD", "five")])).unwrap_err();
        match err {
            ConfigError::EnvDecode { var, value, .. } => {
                assert_eq!(var, "SERVICE_FIELD");
                assert_eq!(value, "five");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn process_rejects_bad_bool() {
        let mut config = Service::default();
        let err = process_with(None, &mut config, vars(&[("LOG_JSON", "yes")])).unwrap_err();
        assert!(matches!(err, ConfigError::EnvDecode { .. }));
    }

    #[test]
    fn process_rejects_malformed_map() {
        let mut config = Service::default();
        let err = process_with(None, &mut config, vars(&[("LOG_FIELDS", "abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::EnvDecode { .. }));
    }

    #[derive(Debug, Default, Deserialize, Serialize)]
    #[serde(default)]
    struct Connections {
        nats: crate::messaging::NatsConfig,
        db: crate::mongo::Config,
    }

    #[test]
    fn process_builds_unset_tls_records() {
        let mut config = Connections::default();
        let lookup = vars(&[
            ("NATS_TLS_CONF_ENABLED", "true"),
            ("NATS_TLS_CONF_CA_FILES", "/etc/ca.pem,/etc/ca2.pem"),
            ("DB_TLS_CONF_CERT_FILE", "/etc/client.pem"),
        ]);
        process_with(None, &mut config, lookup).unwrap();

        let tls = config.nats.tls.expect("bus tls_conf from env");
        assert!(tls.enabled);
        assert_eq!(tls.ca_files, vec!["/etc/ca.pem", "/etc/ca2.pem"]);
        assert!(tls.cert_file.is_empty());

        let tls = config.db.tls.expect("database tls_conf from env");
        assert_eq!(tls.cert_file, "/etc/client.pem");
        assert!(!tls.enabled);
    }

    #[test]
    fn process_leaves_unset_records_without_vars() {
        let mut config = Connections::default();
        process_with(None, &mut config, vars(&[("NATS_SUBJECT", "events")])).unwrap();
        assert!(config.nats.tls.is_none());
        assert!(config.db.tls.is_none());
        assert_eq!(config.nats.subject, "events");
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    #[serde(default)]
    struct Paths {
        root: String,
        depth: u32,
    }

    impl Default for Paths {
        fn default() -> Self {
            Self {
                root: "/srv".to_string(),
                depth: 3,
            }
        }
    }

    #[derive(Debug, Default, Deserialize, Serialize)]
    #[serde(default)]
    struct Layout {
        path: Paths,
        labels: Option<HashMap<String, String>>,
    }

    #[test]
    fn record_named_like_a_variable_keeps_defaults() {
        let mut config = Layout::default();
        let lookup = vars(&[("PATH", "/usr/bin:/bin"), ("PATH_DEPTH", "5")]);
        process_with(None, &mut config, lookup).unwrap();
        assert_eq!(config.path.root, "/srv");
        assert_eq!(config.path.depth, 5);
    }

    #[test]
    fn unset_optional_map_reads_its_own_variable() {
        let mut config = Layout::default();
        process_with(None, &mut config, vars(&[("LABELS", "team:core,tier:1")])).unwrap();
        let labels = config.labels.unwrap();
        assert_eq!(labels["team"], "core");
        assert_eq!(labels["tier"], "1");
    }

    #[test]
    fn parse_bool_accepts_short_forms() {
        for raw in ["1", "t", "T", "true", "TRUE", "True"] {
            assert_eq!(parse_bool(raw), Some(true), "{raw}");
        }
        for raw in ["0", "f", "F", "false", "FALSE", "False"] {
            assert_eq!(parse_bool(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn load_env_file_missing_is_file_not_found() {
        let err = load_env_file("/nonexistent/dir/service.env").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn load_env_file_exports_variables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "SERVICE_COMMONS_ENV_FILE_TEST=loaded").unwrap();
        writeln!(file, "SERVICE_COMMONS_ENV_FILE_EMPTY=").unwrap();

        load_env_file(file.path()).unwrap();
        assert_eq!(
            std::env::var("SERVICE_COMMONS_ENV_FILE_TEST").as_deref(),
            Ok("loaded")
        );
        assert_eq!(
            std::env::var("SERVICE_COMMONS_ENV_FILE_EMPTY").as_deref(),
            Ok("")
        );
    }
}
