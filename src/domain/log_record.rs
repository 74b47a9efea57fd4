use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Level written to the sink when a record carries none.
pub const DEFAULT_LEVEL: &str = "INFO";

/// A structured log event. The three well-known fields are optional and a
/// JSON `null` counts as absent; every other key is kept verbatim, in its
/// original order, in `extra`.
#[derive(Serialize, Clone, Debug, PartialEq, Default)]
pub struct LogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why a payload could not be read as a record.
#[derive(Debug)]
pub enum RecordParseError {
    Json(serde_json::Error),
    NotAnObject,
}

impl LogRecord {
    /// Parse a JSON object. Arrays, scalars and `null` are rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RecordParseError> {
        let value: Value = serde_json::from_slice(bytes).map_err(RecordParseError::Json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RecordParseError> {
        match value {
            Value::Object(mut object) => Ok(Self {
                timestamp: take_field(&mut object, "timestamp"),
                level: take_field(&mut object, "level"),
                message: take_field(&mut object, "message"),
                extra: object,
            }),
            _ => Err(RecordParseError::NotAnObject),
        }
    }

    /// Set `timestamp` to `now` if the record has none, returning the value in effect.
    pub fn ensure_timestamp(&mut self, now: DateTime<Utc>) -> &Value {
        self.timestamp
            .get_or_insert_with(|| Value::String(iso_timestamp(now)))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Render the sink line `[timestamp] [level] message\n`, applying the
    /// consumer-side defaults.
    #[must_use]
    pub fn format_line(&self, now: DateTime<Utc>) -> String {
        let timestamp = self
            .timestamp
            .as_ref()
            .map_or_else(|| iso_timestamp(now), render_field);
        let level = self
            .level
            .as_ref()
            .map_or_else(|| DEFAULT_LEVEL.to_string(), render_field);
        let message = match &self.message {
            Some(value) => render_field(value),
            None => self.to_compact_json(),
        };

        format!("[{timestamp}] [{level}] {message}\n")
    }

    fn to_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self.extra))
    }
}

fn take_field(object: &mut Map<String, Value>, key: &str) -> Option<Value> {
    object.shift_remove(key).filter(|value| !value.is_null())
}

/// ISO-8601 UTC with microseconds and an explicit `+00:00` offset.
#[must_use]
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Strings render as their raw text, anything else as compact JSON.
fn render_field(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
