//! CloudEvent envelope construction
//!
//! The JSON is written byte by byte rather than through a serializer so the
//! field order and escaping stay fixed for consumers doing exact matching.
//! Only `"` is escaped (as `\"`); every other byte is copied verbatim.

use super::EventRecord;
use std::sync::Arc;

pub const HEADER_CE_ID: &str = "Ce-Id";
pub const HEADER_CE_TYPE: &str = "Ce-Type";
pub const HEADER_CE_SOURCE: &str = "Ce-Source";
pub const HEADER_CE_SPECVERSION: &str = "Ce-Specversion";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Content type of a binary-mode request
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// `datacontenttype` of a structured envelope
pub const DATA_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const BACKSLASH_BYTE: u8 = b'\\';
const CLOSE_BRACE_BYTE: u8 = b'}';
const COLON_BYTE: u8 = b':';
const COMMA_BYTE: u8 = b',';
const OPEN_BRACE_BYTE: u8 = b'{';
const QUOTE_BYTE: u8 = b'"';

const INITIAL_CAPACITY: usize = 512;

/// Static identity shared by every envelope of one configured instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CeIdentity {
    pub source: String,
    pub spec_version: String,
    pub append_type: String,

    /// `v` followed by the first character of `spec_version`
    type_version: String,
}

impl CeIdentity {
    pub fn new(
        source: impl Into<String>,
        spec_version: impl Into<String>,
        append_type: impl Into<String>,
    ) -> Self {
        let spec_version = spec_version.into();
        let type_version = match spec_version.chars().next() {
            Some(major) => format!("v{}", major),
            None => String::new(),
        };

        Self {
            source: source.into(),
            spec_version,
            append_type: append_type.into(),
            type_version,
        }
    }

    pub fn type_version(&self) -> &str {
        &self.type_version
    }

    /// `{append_type}.{type_version}.{reason}` with all whitespace removed
    /// from the reason.
    pub fn ce_type(&self, reason: &str) -> String {
        let mut ret = String::with_capacity(
            self.append_type.len() + self.type_version.len() + reason.len() + 2,
        );

        ret.push_str(&self.append_type);
        ret.push('.');
        ret.push_str(&self.type_version);
        ret.push('.');
        ret.extend(reason.chars().filter(|ch| !ch.is_whitespace()));

        ret
    }
}

/// Where the identity fields travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeMode {
    /// Identity in `Ce-*` transport headers, body holds only the event data
    #[default]
    Binary,

    /// Identity embedded in the JSON body around a nested `data` object
    Structured,
}

/// A serialized envelope ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: String,
    pub ce_type: String,
    pub mode: EnvelopeMode,
    pub identity: Arc<CeIdentity>,
    pub body: Vec<u8>,
}

impl Envelope {
    /// Transport headers for this envelope, in send order
    pub fn headers(&self) -> Vec<(&'static str, &str)> {
        match self.mode {
            EnvelopeMode::Binary => vec![
                (HEADER_CE_ID, self.id.as_str()),
                (HEADER_CE_TYPE, self.ce_type.as_str()),
                (HEADER_CE_SOURCE, self.identity.source.as_str()),
                (HEADER_CE_SPECVERSION, self.identity.spec_version.as_str()),
                (HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON),
            ],
            EnvelopeMode::Structured => vec![(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON)],
        }
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Turns [`EventRecord`]s into [`Envelope`]s
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    identity: Arc<CeIdentity>,
    mode: EnvelopeMode,
}

impl EnvelopeBuilder {
    pub fn new(identity: CeIdentity, mode: EnvelopeMode) -> Self {
        Self {
            identity: Arc::new(identity),
            mode,
        }
    }

    pub fn identity(&self) -> &CeIdentity {
        &self.identity
    }

    pub fn mode(&self) -> EnvelopeMode {
        self.mode
    }

    pub fn build(&self, event: &EventRecord) -> Envelope {
        let ce_type = self.identity.ce_type(&event.reason);

        let body = match self.mode {
            EnvelopeMode::Binary => {
                let mut buf = Vec::with_capacity(INITIAL_CAPACITY);
                append_data_object(event, &mut buf);
                buf
            }
            EnvelopeMode::Structured => self.structured_body(event, &ce_type),
        };

        Envelope {
            id: event.correlation_id.clone(),
            ce_type,
            mode: self.mode,
            identity: Arc::clone(&self.identity),
            body,
        }
    }

    // {"datacontenttype":..,"id":..,"source":..,"specversion":..,"type":..,"data":{..}}
    fn structured_body(&self, event: &EventRecord, ce_type: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INITIAL_CAPACITY);

        buf.push(OPEN_BRACE_BYTE);
        append_json_str(b"datacontenttype", DATA_CONTENT_TYPE.as_bytes(), &mut buf);
        buf.push(COMMA_BYTE);
        append_json_str(b"id", event.correlation_id.as_bytes(), &mut buf);
        buf.push(COMMA_BYTE);
        append_json_str(b"source", self.identity.source.as_bytes(), &mut buf);
        buf.push(COMMA_BYTE);
        append_json_str(b"specversion", self.identity.spec_version.as_bytes(), &mut buf);
        buf.push(COMMA_BYTE);
        append_json_str(b"type", ce_type.as_bytes(), &mut buf);
        buf.push(COMMA_BYTE);
        append_key(b"data", &mut buf);
        append_data_object(event, &mut buf);
        buf.push(CLOSE_BRACE_BYTE);

        buf
    }
}

// {"reason":..,"start_time":..,"name":..,"namespace":..,"count":N,"message":..}
fn append_data_object(event: &EventRecord, buf: &mut Vec<u8>) {
    buf.push(OPEN_BRACE_BYTE);
    append_json_str(b"reason", event.reason.as_bytes(), buf);
    buf.push(COMMA_BYTE);
    append_json_str(b"start_time", event.start_time.as_bytes(), buf);
    buf.push(COMMA_BYTE);
    append_json_str(b"name", event.name.as_bytes(), buf);
    buf.push(COMMA_BYTE);
    append_json_str(b"namespace", event.namespace.as_bytes(), buf);
    buf.push(COMMA_BYTE);
    append_key(b"count", buf);
    buf.extend_from_slice(event.count.to_string().as_bytes());
    buf.push(COMMA_BYTE);
    append_json_str(b"message", event.message.as_bytes(), buf);
    buf.push(CLOSE_BRACE_BYTE);
}

fn append_key(key: &[u8], buf: &mut Vec<u8>) {
    buf.push(QUOTE_BYTE);
    buf.extend_from_slice(key);
    buf.push(QUOTE_BYTE);
    buf.push(COLON_BYTE);
}

/// `"key":"val"` with each `"` in `val` written as `\"`
fn append_json_str(key: &[u8], val: &[u8], buf: &mut Vec<u8>) {
    append_key(key, buf);
    buf.push(QUOTE_BYTE);
    for &byte in val {
        if byte == QUOTE_BYTE {
            buf.push(BACKSLASH_BYTE);
        }
        buf.push(byte);
    }
    buf.push(QUOTE_BYTE);
}
