//! Event records extracted from log records
//!
//! Every record that survives filtering must carry the full set of event
//! attributes. Extraction never substitutes defaults for missing values.

pub mod envelope;

pub use envelope::*;

use crate::logs::LogRecord;
use thiserror::Error;

pub const ATTR_EVENT_COUNT: &str = "k8s.event.count";
pub const ATTR_EVENT_NAME: &str = "k8s.event.name";
pub const ATTR_EVENT_NS: &str = "k8s.namespace.name";
pub const ATTR_EVENT_REASON: &str = "k8s.event.reason";
pub const ATTR_EVENT_START_TIME: &str = "k8s.event.start_time";
pub const ATTR_EVENT_UID: &str = "k8s.event.uid";

/// Record could not be turned into an [`EventRecord`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("couldn't find {} attributes in the log record", format_missing(.0))]
    MissingAttributes(Vec<&'static str>),

    #[error("attribute {{{attribute}}} must be a non-negative integer, got '{value}'")]
    InvalidCount {
        attribute: &'static str,
        value: String,
    },
}

impl ValidationError {
    /// Attribute names the record was missing
    pub fn missing(&self) -> &[&'static str] {
        match self {
            ValidationError::MissingAttributes(missing) => missing,
            ValidationError::InvalidCount { .. } => &[],
        }
    }
}

fn format_missing(missing: &[&'static str]) -> String {
    missing
        .iter()
        .map(|attr| format!("{{{}}}", attr))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One validated event, ready for envelope construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub reason: String,
    pub name: String,
    pub namespace: String,
    pub count: u64,

    /// Passed through verbatim
    pub start_time: String,

    /// Becomes the envelope id
    pub correlation_id: String,

    /// Record body; may be empty
    pub message: String,
}

impl EventRecord {
    /// Extract an event from a log record.
    ///
    /// All six event attributes must be present; the error lists every one
    /// that is missing, not just the first.
    pub fn extract(record: &LogRecord) -> Result<Self, ValidationError> {
        let attrs = &record.attributes;

        let reason = attrs.get(ATTR_EVENT_REASON);
        let start_time = attrs.get(ATTR_EVENT_START_TIME);
        let name = attrs.get(ATTR_EVENT_NAME);
        let uid = attrs.get(ATTR_EVENT_UID);
        let namespace = attrs.get(ATTR_EVENT_NS);
        let count = attrs.get(ATTR_EVENT_COUNT);

        let (Some(reason), Some(start_time), Some(name), Some(uid), Some(namespace), Some(count)) =
            (reason, start_time, name, uid, namespace, count)
        else {
            let missing = [
                (ATTR_EVENT_REASON, reason.is_none()),
                (ATTR_EVENT_START_TIME, start_time.is_none()),
                (ATTR_EVENT_NAME, name.is_none()),
                (ATTR_EVENT_UID, uid.is_none()),
                (ATTR_EVENT_NS, namespace.is_none()),
                (ATTR_EVENT_COUNT, count.is_none()),
            ]
            .into_iter()
            .filter_map(|(attr, absent)| absent.then_some(attr))
            .collect();

            return Err(ValidationError::MissingAttributes(missing));
        };

        let count = count
            .as_int()
            .and_then(|c| u64::try_from(c).ok())
            .ok_or_else(|| ValidationError::InvalidCount {
                attribute: ATTR_EVENT_COUNT,
                value: count.as_string(),
            })?;

        Ok(Self {
            reason: reason.as_string(),
            name: name.as_string(),
            namespace: namespace.as_string(),
            count,
            start_time: start_time.as_string(),
            correlation_id: uid.as_string(),
            message: record.body.as_string(),
        })
    }
}
