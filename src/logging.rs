//! Structured logging.
//!
//! [`configure`] installs a process-wide `tracing` subscriber the first time
//! it runs. Later calls reload the level filter and swap the output target in
//! place, so every caller ends up with the most recent settings.
//!
//! The returned [`Logger`] is the handle callers pass around. It carries the
//! configured level and a set of bound fields which are attached to every
//! event it emits. The installed formatter writes each bound field as its own
//! key, next to the event's own fields and the calling source location.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::panic::Location;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::time::{ChronoLocal, FormatTime};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Registry, reload};

const DEFAULT_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Event field carrying a logger's bound fields as a JSON object.
const BOUND_FIELDS: &str = "bound_fields";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log level: {0:?}")]
    InvalidLevel(String),
    #[error("failed to open log file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),
    #[error("another global tracing subscriber is already installed")]
    SubscriberInstalled(#[source] TryInitError),
}

/// Logging settings, read from `LOG_*` variables by the bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn (or warning), error. Empty means info.
    pub level: String,
    /// Append to this file instead of stdout.
    pub file: String,
    pub disable_colors: bool,
    /// JSON lines instead of text. Fixed by the first call to [`configure`].
    pub json: bool,
    /// chrono format string for timestamps.
    pub ts_format: String,
    /// Fields bound to every event of the returned logger.
    pub fields: HashMap<String, String>,
}

impl LoggingConfig {
    pub fn parse_level(&self) -> Result<Level, LogError> {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "" => Ok(Level::INFO),
            "warning" => Ok(Level::WARN),
            "fatal" | "panic" => Ok(Level::ERROR),
            other => Level::from_str(other).map_err(|_| LogError::InvalidLevel(self.level.clone())),
        }
    }
}

/// Install or update the process-wide subscriber and build a [`Logger`].
pub fn configure(config: &LoggingConfig) -> Result<Logger, LogError> {
    let level = config.parse_level()?;
    let output = if config.file.is_empty() {
        Output::Stdout
    } else {
        let path = PathBuf::from(&config.file);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogError::File { path, source })?;
        Output::File(Arc::new(file))
    };

    let mut installed = SUBSCRIBER.lock();
    if installed.is_none() {
        *installed = Some(install(config, level)?);
    }
    if let Some(handles) = installed.as_ref() {
        handles.filter.reload(filter_for(level))?;
        *handles.writer.0.write() = output;
    }
    drop(installed);

    Ok(Logger {
        level,
        fields: config
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        silent: false,
    })
}

struct Handles {
    filter: reload::Handle<EnvFilter, Registry>,
    writer: SharedWriter,
}

static SUBSCRIBER: Mutex<Option<Handles>> = Mutex::new(None);

fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::new(level.as_str().to_ascii_lowercase())
}

fn install(config: &LoggingConfig, level: Level) -> Result<Handles, LogError> {
    let (filter, filter_handle) = reload::Layer::new(filter_for(level));
    let writer = SharedWriter::default();
    let ts_format = if config.ts_format.is_empty() {
        DEFAULT_TS_FORMAT.to_string()
    } else {
        config.ts_format.clone()
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(!config.json && !config.disable_colors)
        .event_format(EventFormat {
            json: config.json,
            timer: ChronoLocal::new(ts_format),
        })
        .with_writer(writer.clone());

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(LogError::SubscriberInstalled)?;

    Ok(Handles {
        filter: filter_handle,
        writer,
    })
}

/// Writes events as JSON lines or text, expanding bound logger fields.
struct EventFormat {
    json: bool,
    timer: ChronoLocal,
}

impl<S, N> FormatEvent<S, N> for EventFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut timestamp = String::new();
        self.timer.format_time(&mut format::Writer::new(&mut timestamp))?;

        let mut visitor = EventFields::default();
        event.record(&mut visitor);

        let spans: Vec<String> = ctx
            .event_scope()
            .map(|scope| scope.from_root().map(|span| span.name().to_string()).collect())
            .unwrap_or_default();
        let meta = event.metadata();

        if self.json {
            let mut fields = visitor.fields;
            fields.insert("message".to_string(), Value::String(visitor.message));
            let mut line = Map::new();
            line.insert("timestamp".to_string(), Value::String(timestamp));
            line.insert("level".to_string(), Value::String(meta.level().to_string()));
            line.insert("fields".to_string(), Value::Object(fields));
            line.insert("target".to_string(), Value::String(meta.target().to_string()));
            if !spans.is_empty() {
                line.insert("spans".to_string(), spans.into());
            }
            let line = serde_json::to_string(&line).map_err(|_| fmt::Error)?;
            return writeln!(writer, "{line}");
        }

        let level = meta.level();
        if writer.has_ansi_escapes() {
            write!(writer, "{timestamp} \x1b[{}m{level:>5}\x1b[0m ", level_color(level))?;
        } else {
            write!(writer, "{timestamp} {level:>5} ")?;
        }
        for span in &spans {
            write!(writer, "{span}:")?;
        }
        if !spans.is_empty() {
            writer.write_char(' ')?;
        }
        write!(writer, "{}: {}", meta.target(), visitor.message)?;
        for (key, value) in &visitor.fields {
            write!(writer, " {key}=")?;
            write_text_value(&mut writer, value)?;
        }
        writeln!(writer)
    }
}

fn level_color(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 31,
        Level::WARN => 33,
        Level::INFO => 32,
        Level::DEBUG => 34,
        _ => 35,
    }
}

fn write_text_value(w: &mut impl fmt::Write, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) if s.is_empty() || s.contains(char::is_whitespace) => write!(w, "{s:?}"),
        Value::String(s) => w.write_str(s),
        other => write!(w, "{other}"),
    }
}

/// Collects an event's message and fields, unpacking [`BOUND_FIELDS`].
#[derive(Default)]
struct EventFields {
    message: String,
    fields: Map<String, Value>,
}

impl EventFields {
    fn insert(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(message)) => self.message = message,
            (BOUND_FIELDS, Value::String(bound)) => match serde_json::from_str(&bound) {
                Ok(Value::Object(bound)) => self.fields.extend(bound),
                _ => {
                    self.fields.insert(BOUND_FIELDS.to_string(), Value::String(bound));
                }
            },
            (name, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }
}

enum Output {
    Stdout,
    File(Arc<File>),
}

/// A writer whose target can be swapped after the subscriber is installed.
#[derive(Clone)]
struct SharedWriter(Arc<RwLock<Output>>);

impl Default for SharedWriter {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(Output::Stdout)))
    }
}

enum OutputWriter {
    Stdout(io::Stdout),
    File(Arc<File>),
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(out) => out.write(buf),
            Self::File(file) => (&**file).write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.flush(),
            Self::File(file) => (&**file).flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = OutputWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match &*self.0.read() {
            Output::Stdout => OutputWriter::Stdout(io::stdout()),
            Output::File(file) => OutputWriter::File(Arc::clone(file)),
        }
    }
}

/// A logging handle with a level and bound fields.
///
/// Cloning is cheap enough for per-component child loggers; deriving a child
/// never affects the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logger {
    level: Level,
    fields: BTreeMap<String, String>,
    silent: bool,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            fields: BTreeMap::new(),
            silent: false,
        }
    }
}

impl Logger {
    /// A logger that emits nothing. Used where callers pass no logger.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn with_field(&self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let mut child = self.clone();
        child.fields.insert(key.into(), value.to_string());
        child
    }

    pub fn with_fields<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        let mut child = self.clone();
        for (k, v) in fields {
            child.fields.insert(k.into(), v.to_string());
        }
        child
    }

    pub fn enabled(&self, level: Level) -> bool {
        !self.silent && level <= self.level
    }

    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.emit(Level::DEBUG, message, None);
    }

    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.emit(Level::INFO, message, None);
    }

    #[track_caller]
    pub fn warn(&self, message: impl fmt::Display) {
        self.emit(Level::WARN, message, None);
    }

    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.emit(Level::ERROR, message, None);
    }

    /// Emit an error event carrying `err` in its `error` field.
    #[track_caller]
    pub fn error_with(&self, err: &dyn std::error::Error, message: impl fmt::Display) {
        self.emit(Level::ERROR, message, Some(err));
    }

    #[track_caller]
    fn emit(&self, level: Level, message: impl fmt::Display, err: Option<&dyn std::error::Error>) {
        if !self.enabled(level) {
            return;
        }
        let bound = serde_json::to_string(&self.fields).unwrap_or_default();
        let caller = Location::caller();
        let err = err.map(tracing::field::display);
        match level {
            Level::ERROR => tracing::error!(bound_fields = bound.as_str(), caller = %caller, error = err, "{message}"),
            Level::WARN => tracing::warn!(bound_fields = bound.as_str(), caller = %caller, error = err, "{message}"),
            Level::INFO => tracing::info!(bound_fields = bound.as_str(), caller = %caller, error = err, "{message}"),
            Level::DEBUG => tracing::debug!(bound_fields = bound.as_str(), caller = %caller, error = err, "{message}"),
            _ => tracing::trace!(bound_fields = bound.as_str(), caller = %caller, error = err, "{message}"),
        }
    }
}
