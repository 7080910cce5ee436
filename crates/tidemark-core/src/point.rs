//! Time-series point model and line protocol rendering.
//!
//! A point is one sample: a measurement name, a sorted tag set, a typed
//! field set, and a nanosecond timestamp. `line_protocol` renders the
//! textual wire form consumed by the write API and by replication queues.
//! Semantic validation of points is the write path's concern, not this
//! module's.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// 64-bit float, the line protocol default numeric type.
    Float(f64),
    /// Signed integer, rendered with an `i` suffix.
    Integer(i64),
    /// Unsigned integer, rendered with a `u` suffix.
    Unsigned(u64),
    /// Boolean, rendered as `true`/`false`.
    Boolean(bool),
    /// String, rendered double-quoted with `\` and `"` escaped.
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Unsigned(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// One time-series sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Measurement name.
    pub measurement: String,
    /// Tag set; BTreeMap keeps the rendered order canonical.
    pub tags: BTreeMap<String, String>,
    /// Field set.
    pub fields: BTreeMap<String, FieldValue>,
    /// Timestamp in nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
}

impl Point {
    /// Creates a point with no tags or fields.
    pub fn new(measurement: impl Into<String>, timestamp_ns: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp_ns,
        }
    }

    /// Adds a tag, replacing any previous value for the key.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a field, replacing any previous value for the key.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Renders this point as one nanosecond-precision line protocol line,
    /// without a trailing newline.
    pub fn line_protocol(&self) -> String {
        let mut out = String::new();
        escape_measurement(&mut out, &self.measurement);
        for (key, value) in &self.tags {
            out.push(',');
            escape_key(&mut out, key);
            out.push('=');
            escape_key(&mut out, value);
        }
        out.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                out.push(',');
            }
            first = false;
            escape_key(&mut out, key);
            out.push('=');
            render_field_value(&mut out, value);
        }
        let _ = write!(out, " {}", self.timestamp_ns);
        out
    }
}

fn escape_measurement(out: &mut String, s: &str) {
    for c in s.chars() {
        if c == ',' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn escape_key(out: &mut String, s: &str) {
    for c in s.chars() {
        if c == ',' || c == '=' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn render_field_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Float(v) => {
            let _ = write!(out, "{v}");
        }
        FieldValue::Integer(v) => {
            let _ = write!(out, "{v}i");
        }
        FieldValue::Unsigned(v) => {
            let _ = write!(out, "{v}u");
        }
        FieldValue::Boolean(v) => {
            let _ = write!(out, "{v}");
        }
        FieldValue::Text(v) => {
            out.push('"');
            for c in v.chars() {
                if c == '\\' || c == '"' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
    }
}
