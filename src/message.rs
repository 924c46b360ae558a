//! Message & Field data model (§3).
//!
//! `Message` carries the fixed Heka headers plus an ordered list of typed,
//! repeatable `Field`s. Both derive `serde::{Serialize, Deserialize}` so the
//! stats-to-fields decoder and test fixtures can round-trip them; this is
//! ambient serialization support, not a stance on the external wire codec.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single dynamic field. `values` is never empty when the field exists on
/// a message (I3): a scalar is a one-element array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Unit/format hint, e.g. `"B"`, `"ms"`, `"ipv4"`, `"json"`. Empty string
    /// if unspecified.
    pub representation: String,
    pub value: FieldValue,
}

/// The typed value array carried by a [`Field`]. Each variant holds one or
/// more repeated values: fields are repeatable, and each occurrence of a
/// field carries its own array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    String(Vec<String>),
    Bytes(Vec<Vec<u8>>),
    Integer(Vec<i64>),
    Double(Vec<f64>),
    Bool(Vec<bool>),
}

impl FieldValue {
    pub fn len(&self) -> usize {
        match self {
            FieldValue::String(v) => v.len(),
            FieldValue::Bytes(v) => v.len(),
            FieldValue::Integer(v) => v.len(),
            FieldValue::Double(v) => v.len(),
            FieldValue::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the element at `idx` as the string form used by matcher
    /// comparisons, or `None` if out of range.
    pub fn as_string_at(&self, idx: usize) -> Option<String> {
        match self {
            FieldValue::String(v) => v.get(idx).cloned(),
            FieldValue::Bytes(v) => v.get(idx).map(|b| String::from_utf8_lossy(b).into_owned()),
            FieldValue::Integer(v) => v.get(idx).map(|n| n.to_string()),
            FieldValue::Double(v) => v.get(idx).map(|n| n.to_string()),
            FieldValue::Bool(v) => v.get(idx).map(|b| if *b { "TRUE".to_string() } else { "FALSE".to_string() }),
        }
    }

    /// Renders the element at `idx` as a double for numeric comparisons.
    pub fn as_f64_at(&self, idx: usize) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => v.get(idx).map(|n| *n as f64),
            FieldValue::Double(v) => v.get(idx).copied(),
            FieldValue::String(v) => v.get(idx).and_then(|s| s.parse::<f64>().ok()),
            _ => None,
        }
    }

    pub fn as_bool_at(&self, idx: usize) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => v.get(idx).copied(),
            _ => None,
        }
    }
}

/// The unit of data flowing through the engine (§3). Fixed headers plus an
/// ordered, repeatable field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: [u8; 16],
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub logger: String,
    /// RFC5424 numeric severity. Interpreted by consumers only (I4).
    pub severity: i32,
    pub payload: String,
    pub env_version: String,
    pub pid: i32,
    pub hostname: String,
    pub fields: Vec<Field>,
}

impl Message {
    /// A blank message with a fresh v4 uuid and all other headers zeroed.
    /// This is what the pool hands back from `clear()`.
    pub fn new() -> Self {
        Message {
            uuid: *Uuid::new_v4().as_bytes(),
            timestamp: 0,
            msg_type: String::new(),
            logger: String::new(),
            severity: 0,
            payload: String::new(),
            env_version: String::new(),
            pid: 0,
            hostname: String::new(),
            fields: Vec::new(),
        }
    }

    /// Clears all mutable content and fields but leaves a fresh identity
    /// (new uuid) behind, the same way the pool resets a released pack
    /// before reuse.
    pub fn clear(&mut self) {
        self.uuid = *Uuid::new_v4().as_bytes();
        self.timestamp = 0;
        self.msg_type.clear();
        self.logger.clear();
        self.severity = 0;
        self.payload.clear();
        self.env_version.clear();
        self.pid = 0;
        self.hostname.clear();
        self.fields.clear();
    }

    /// Looks up a field by name, returning the Nth occurrence (default 0).
    pub fn find_field(&self, name: &str, occurrence: usize) -> Option<&Field> {
        self.fields.iter().filter(|f| f.name == name).nth(occurrence)
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}
