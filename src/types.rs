//! Core types for the tail client.

use crate::error::TailError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Resume point in the operation log.
///
/// Packs `(seconds, ordinal)` into one u64: the high 32 bits hold epoch
/// seconds and the low 32 bits the ordinal of the operation within that
/// second. Ordering is the ordering of the packed value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Position(pub u64);

impl Position {
    pub const MIN: Position = Position(0);

    pub const fn new(seconds: u32, ordinal: u32) -> Self {
        Position(((seconds as u64) << 32) | ordinal as u64)
    }

    pub const fn from_packed(packed: u64) -> Self {
        Position(packed)
    }

    pub const fn packed(self) -> u64 {
        self.0
    }

    pub const fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn ordinal(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position({}:{})", self.seconds(), self.ordinal())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.seconds(), self.ordinal())
    }
}

/// Operator-supplied starting point. The ordinal defaults to 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartPosition {
    pub seconds: u32,
    pub ordinal: Option<u32>,
}

impl StartPosition {
    pub fn new(seconds: u32, ordinal: Option<u32>) -> Self {
        Self { seconds, ordinal }
    }

    pub fn position(&self) -> Position {
        Position::new(self.seconds, self.ordinal.unwrap_or(0))
    }
}

impl From<Position> for StartPosition {
    fn from(position: Position) -> Self {
        Self {
            seconds: position.seconds(),
            ordinal: Some(position.ordinal()),
        }
    }
}

/// Which replica-set members may serve the tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreference {
    /// Only the primary; connecting fails when no primary is reachable.
    #[default]
    StrictPrimary,
    /// Prefer a secondary, fall back to the primary.
    SecondaryPreferred,
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPreference::StrictPrimary => f.write_str("primary"),
            ReadPreference::SecondaryPreferred => f.write_str("secondary-preferred"),
        }
    }
}

impl FromStr for ReadPreference {
    type Err = TailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" | "strict-primary" => Ok(ReadPreference::StrictPrimary),
            "secondary-preferred" | "secondaryPreferred" => Ok(ReadPreference::SecondaryPreferred),
            other => Err(TailError::Config(format!("unknown read preference: {other}"))),
        }
    }
}

/// A self-describing value stored in log entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    /// The store's native timestamp type.
    Timestamp(Position),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Position> {
        match self {
            Value::Timestamp(p) => Some(*p),
            _ => None,
        }
    }

    /// Render as relaxed extended JSON.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;

        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => json!(s),
            Value::Binary(bytes) => json!({ "$binary": hex::encode(bytes) }),
            Value::Timestamp(p) => json!({ "$timestamp": { "t": p.seconds(), "i": p.ordinal() } }),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Document(doc) => doc.to_json(),
        }
    }

    /// Parse relaxed extended JSON, recognising `$timestamp` and `$binary`.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if let Some(value) = extended_scalar(&map) {
                    return value;
                }
                Value::Document(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

fn extended_scalar(map: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    if let Some(ts) = map.get("$timestamp") {
        let t = u32::try_from(ts.get("t")?.as_u64()?).ok()?;
        let i = u32::try_from(ts.get("i")?.as_u64()?).ok()?;
        return Some(Value::Timestamp(Position::new(t, i)));
    }
    if let Some(bin) = map.get("$binary") {
        return hex::decode(bin.as_str()?).ok().map(Value::Binary);
    }
    None
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Position> for Value {
    fn from(p: Position) -> Self {
        Value::Timestamp(p)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

/// A string-keyed map of values; the body of every log entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }

    /// Parse a JSON object. Returns `None` for any other JSON value.
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match Value::from_json(json) {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Document(iter.into_iter().collect())
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// One observed write, delivered in log order.
///
/// Only constructed from documents carrying a valid `ts`; the rest of the
/// document is passed through untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    position: Position,
    document: Document,
}

impl ChangeEvent {
    /// Validate the `ts` field and wrap the document.
    ///
    /// A missing or mistyped `ts` breaks the log's schema contract and is
    /// reported as [`TailError::ContractViolation`].
    pub fn decode(document: Document) -> Result<Self, TailError> {
        let position = match document.get("ts") {
            Some(Value::Timestamp(p)) => *p,
            Some(other) => {
                return Err(TailError::ContractViolation {
                    reason: format!("`ts` has type {}, expected timestamp", other.type_name()),
                    entry: document.to_string(),
                })
            }
            None => {
                return Err(TailError::ContractViolation {
                    reason: "`ts` is not found".to_string(),
                    entry: document.to_string(),
                })
            }
        };
        Ok(Self { position, document })
    }

    pub fn ts(&self) -> Position {
        self.position
    }

    /// The `ns` field, when present as a string.
    pub fn namespace(&self) -> Option<&str> {
        self.document.get_str("ns")
    }

    /// The `op` field, when present as a string.
    pub fn operation(&self) -> Option<&str> {
        self.document.get_str("op")
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.document.to_json()
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.document.fmt(f)
    }
}
