//! Inbound log data model
//!
//! A [`LogBatch`] mirrors the resource → scope → record nesting used by log
//! collectors. The bridge only needs attribute lookup and the record body,
//! so the model keeps nothing else.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl AttributeValue {
    /// Render the value as text regardless of its type
    pub fn as_string(&self) -> String {
        match self {
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Int(i) => i.to_string(),
            AttributeValue::Double(d) => d.to_string(),
            AttributeValue::Str(s) => s.clone(),
        }
    }

    /// Integer view of the value. Strings holding a base-10 integer count.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            AttributeValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(value.into())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// String-keyed attribute set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }
}

/// Record body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    #[default]
    Empty,
    Str(String),
    Bytes(Vec<u8>),
}

impl Body {
    /// Body as text. Byte bodies are decoded lossily.
    pub fn as_string(&self) -> String {
        match self {
            Body::Empty => String::new(),
            Body::Str(s) => s.clone(),
            Body::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Str(s) => s.as_bytes(),
            Body::Bytes(b) => b,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Str(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Str(value)
    }
}

/// A single log record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub body: Body,

    #[serde(default)]
    pub attributes: Attributes,
}

impl LogRecord {
    pub fn new(body: impl Into<Body>) -> Self {
        Self {
            body: body.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key, value);
        self
    }
}

/// Records emitted by one instrumentation scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeLogs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default)]
    pub log_records: Vec<LogRecord>,
}

/// Scope groups emitted by one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLogs {
    #[serde(default)]
    pub resource: Attributes,

    #[serde(default)]
    pub scope_logs: Vec<ScopeLogs>,
}

/// One inbound batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub resource_logs: Vec<ResourceLogs>,
}

impl LogBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all groups
    pub fn record_count(&self) -> usize {
        self.resource_logs
            .iter()
            .flat_map(|rl| &rl.scope_logs)
            .map(|sl| sl.log_records.len())
            .sum()
    }

    /// Iterate over every record in batch order
    pub fn records(&self) -> impl Iterator<Item = &LogRecord> {
        self.resource_logs
            .iter()
            .flat_map(|rl| &rl.scope_logs)
            .flat_map(|sl| &sl.log_records)
    }

    /// Iterate mutably over every record in batch order
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut LogRecord> {
        self.resource_logs
            .iter_mut()
            .flat_map(|rl| &mut rl.scope_logs)
            .flat_map(|sl| &mut sl.log_records)
    }

    /// Keep only records matching `keep`, then drop scope groups and
    /// resource groups left empty. Returns the number of records removed.
    pub fn retain_records<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&LogRecord) -> bool,
    {
        let before = self.record_count();

        self.resource_logs.retain_mut(|rl| {
            rl.scope_logs.retain_mut(|sl| {
                sl.log_records.retain(|lr| keep(lr));
                !sl.log_records.is_empty()
            });
            !rl.scope_logs.is_empty()
        });

        before - self.record_count()
    }
}
