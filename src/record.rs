//! Wire contracts: records and the envelope they travel in.
//!
//! A payload on the wire is JSON whose top-level value is either a single
//! object or an array of objects. Each object is a [`Record`]: an open map of
//! business fields plus three reserved, always-optional attributes.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error_handler::NormalizedError;

/// Reserved key: identity of the producing service.
pub const MESSAGE_ORIGIN: &str = "messageOrigin";
/// Reserved key: correlation id for the success/error side channels.
pub const REQUEUE_UID: &str = "requeueUid";
/// Reserved key: assign-once lineage id.
pub const PROCESS_UID: &str = "habitarProcessUid";

/// A single message object.
///
/// Business fields are kept as an open JSON map so handlers can read any
/// shape; the reserved fields are typed attributes. A reserved key holding a
/// non-string value is not an attribute and stays in `fields`, so the record
/// still renders back to the object it was decoded from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub habitar_process_uid: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object's fields, routing reserved keys.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut record = Self::new();
        for (key, value) in map {
            record.insert(key, value);
        }
        record
    }

    /// Insert a field. A string under a reserved key sets the typed
    /// attribute; any other value is kept as a plain field.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if self.slot(&key).is_none() {
            self.fields.insert(key, value);
            return;
        }
        match value {
            Value::String(s) => self.set_reserved(&key, Some(s)),
            other => {
                self.set_reserved(&key, None);
                self.fields.insert(key, other);
            }
        }
    }

    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            MESSAGE_ORIGIN => Some(&mut self.message_origin),
            REQUEUE_UID => Some(&mut self.requeue_uid),
            PROCESS_UID => Some(&mut self.habitar_process_uid),
            _ => None,
        }
    }

    fn set_reserved(&mut self, key: &str, value: Option<String>) {
        self.fields.remove(key);
        if let Some(slot) = self.slot(key) {
            *slot = value;
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn with_requeue_uid(mut self, uid: impl Into<String>) -> Self {
        self.set_reserved(REQUEUE_UID, Some(uid.into()));
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.set_reserved(MESSAGE_ORIGIN, Some(origin.into()));
        self
    }

    pub fn with_process_uid(mut self, uid: impl Into<String>) -> Self {
        self.set_reserved(PROCESS_UID, Some(uid.into()));
        self
    }

    /// The correlation id for the side channels: a non-empty `requeueUid`.
    pub fn correlation_uid(&self) -> Option<&str> {
        self.requeue_uid.as_deref().filter(|uid| !uid.is_empty())
    }

    /// The lineage id, if one has been assigned.
    pub fn process_uid(&self) -> Option<&str> {
        self.habitar_process_uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
    }

    /// Get a field by its wire key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The full JSON object, reserved fields included.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        let reserved = [
            (MESSAGE_ORIGIN, &self.message_origin),
            (REQUEUE_UID, &self.requeue_uid),
            (PROCESS_UID, &self.habitar_process_uid),
        ];
        for (key, value) in reserved {
            if let Some(value) = value {
                map.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        Value::Object(map)
    }

    pub fn to_json_string(&self) -> String {
        self.to_value().to_string()
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        self.to_json_string().into_bytes()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, Value>::deserialize(deserializer).map(Record::from_map)
    }
}

/// The `{requeueUid}` echo sent to `success.messages` after a handled record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessEcho {
    pub requeue_uid: String,
}

impl SuccessEcho {
    /// The echo for `record`, if it carries a correlation id.
    pub fn for_record(record: &Record) -> Option<Self> {
        record.correlation_uid().map(|uid| Self {
            requeue_uid: uid.to_string(),
        })
    }
}

impl From<SuccessEcho> for Record {
    fn from(echo: SuccessEcho) -> Self {
        Record::new().with_requeue_uid(echo.requeue_uid)
    }
}

/// The failure record sent to `error.messages`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub requeue_uid: String,
    /// The consuming service.
    pub origin: String,
    /// The namespaced queue the record was consumed from.
    pub queue: String,
    /// The record as it was received.
    pub data: Value,
    pub error: NormalizedError,
}

impl ErrorRecord {
    /// Reuses the record's correlation id, or generates one.
    pub fn new(
        record: &Record,
        origin: impl Into<String>,
        queue: impl Into<String>,
        error: NormalizedError,
    ) -> Self {
        let requeue_uid = record
            .correlation_uid()
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        Self {
            requeue_uid,
            origin: origin.into(),
            queue: queue.into(),
            data: record.to_value(),
            error,
        }
    }
}

impl From<ErrorRecord> for Record {
    fn from(record: ErrorRecord) -> Self {
        Record::new()
            .with_requeue_uid(record.requeue_uid)
            .with_field("origin", record.origin)
            .with_field("queue", record.queue)
            .with_field("data", record.data)
            .with_field("error", record.error.to_value())
    }
}

/// Error decoding a broker payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The body is not valid UTF-8.
    InvalidUtf8,
    /// The body is not JSON, or not an object / array of objects.
    InvalidShape(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidUtf8 => write!(f, "payload is not valid UTF-8"),
            DecodeError::InvalidShape(msg) => write!(f, "payload is not a record or batch: {}", msg),
        }
    }
}

impl Error for DecodeError {}

/// A decoded payload: one record, or an ordered batch of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Single(Record),
    Batch(Vec<Record>),
}

impl Envelope {
    /// Decode a raw body. An empty (or whitespace-only) body yields `Ok(None)`.
    pub fn decode(body: &[u8]) -> Result<Option<Envelope>, DecodeError> {
        let text = std::str::from_utf8(body).map_err(|_| DecodeError::InvalidUtf8)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::InvalidShape(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(Some(Envelope::Single(Record::from_map(map)))),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(Record::from_map(map)),
                    other => Err(DecodeError::InvalidShape(format!(
                        "batch item is not an object: {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|records| Some(Envelope::Batch(records))),
            other => Err(DecodeError::InvalidShape(format!(
                "top-level value is not an object or array: {}",
                other
            ))),
        }
    }
}
