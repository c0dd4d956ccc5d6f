//! Structured log events shipped to the telemetry sink.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Data key whose value is pre-serialized to a string to keep sink field counts down.
pub const COMPACT_FIELD: &str = "msc";
/// Data key that overrides the event level.
pub const LEVEL_FIELD: &str = "level";
/// Data key holding an error object.
pub const ERROR_FIELD: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" | "log" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Serialize for TagValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TagValue::Null => serializer.serialize_none(),
            TagValue::Bool(b) => serializer.serialize_bool(*b),
            TagValue::Int(i) => serializer.serialize_i64(*i),
            TagValue::Float(f) => serializer.serialize_f64(*f),
            TagValue::Str(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Str(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

impl<T: Into<TagValue>> From<Option<T>> for TagValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(TagValue::Null)
    }
}

pub type Tags = BTreeMap<String, TagValue>;

/// One telemetry record. Immutable once constructed.
///
/// Serializes as `{"_time", "message", "tags": {.., "level"}, "data"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    timestamp: DateTime<Utc>,
    message: String,
    level: LogLevel,
    tags: Tags,
    data: Option<Map<String, Value>>,
}

impl LogEvent {
    /// Builds an event and applies the ingestion normalizations:
    ///
    /// * a string `level` in `data` overrides `level` and is removed from `data`;
    /// * an `error` object with a `message` is flattened to `{message, stack}`;
    /// * a non-string `msc` value is serialized to a JSON string.
    ///
    /// Non-object `data` is wrapped as `{"value": data}`.
    pub fn new(message: impl Into<String>, level: LogLevel, data: Option<Value>) -> Self {
        let mut level = level;
        let mut data = data.map(|value| match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        });

        if let Some(map) = data.as_mut() {
            if let Some(Value::String(raw)) = map.get(LEVEL_FIELD) {
                if let Some(parsed) = LogLevel::parse(raw) {
                    level = parsed;
                }
                map.remove(LEVEL_FIELD);
            }

            if let Some(Value::Object(error)) = map.get(ERROR_FIELD) {
                if let Some(message) = error.get("message").cloned() {
                    let stack = error.get("stack").cloned().unwrap_or(Value::Null);
                    let mut flat = Map::new();
                    flat.insert("message".to_string(), message);
                    flat.insert("stack".to_string(), stack);
                    map.insert(ERROR_FIELD.to_string(), Value::Object(flat));
                }
            }

            if let Some(compact) = map.get_mut(COMPACT_FIELD) {
                if !compact.is_string() {
                    *compact = Value::String(compact.to_string());
                }
            }
        }

        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            tags: Tags::new(),
            data,
        }
    }

    /// Adds a tag, replacing an existing one with the same name.
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Fills in `base` tags the event does not already carry.
    pub(crate) fn merge_base_tags(&mut self, base: &Tags) {
        for (name, value) in base {
            self.tags
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }
}

struct WireTags<'a> {
    tags: &'a Tags,
    level: LogLevel,
}

impl WireTags<'_> {
    /// Event tags minus any `level` tag, which the event's own level replaces.
    fn own_tags(&self) -> impl Iterator<Item = (&String, &TagValue)> + '_ {
        self.tags
            .iter()
            .filter(|(name, _)| name.as_str() != LEVEL_FIELD)
    }

    /// Number of entries written, `level` included.
    fn len(&self) -> usize {
        self.own_tags().count() + 1
    }
}

impl Serialize for WireTags<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.own_tags() {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(LEVEL_FIELD, self.level.as_str())?;
        map.end()
    }
}

impl Serialize for LogEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.data.is_some() { 4 } else { 3 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(
            "_time",
            &self
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        map.serialize_entry("message", &self.message)?;
        map.serialize_entry(
            "tags",
            &WireTags {
                tags: &self.tags,
                level: self.level,
            },
        )?;
        if let Some(data) = &self.data {
            map.serialize_entry("data", data)?;
        }
        map.end()
    }
}

/// Flattens an error into `{message, stack}`, using the source chain as the stack.
pub fn error_fields(err: &(dyn std::error::Error + 'static)) -> Value {
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(format!("caused by: {}", cause));
        source = cause.source();
    }

    let stack = if chain.is_empty() {
        Value::Null
    } else {
        Value::String(chain.join("\n"))
    };

    serde_json::json!({
        "message": err.to_string(),
        "stack": stack,
    })
}
