//! Typed values stored in hash fields and lists.
//!
//! Each value is written with a one-letter tag so its type survives the round
//! trip through the server: `s:<text>`, `n:<number>`, `t:<unix millis>` and
//! `z:` for null. Stored text without a known tag reads back as a string.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rkv_common::Arg;

/// A scalar stored by the object, list and hash helpers of [`Client`].
///
/// [`Client`]: crate::Client
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Number(f64),
    /// Stored with millisecond precision.
    Timestamp(SystemTime),
    Null,
}

impl FieldValue {
    /// Tagged text representation written to the server.
    pub fn encode(&self) -> String {
        match self {
            FieldValue::Str(text) => format!("s:{text}"),
            FieldValue::Number(value) => format!("n:{value}"),
            FieldValue::Timestamp(time) => format!("t:{}", unix_millis(*time)),
            FieldValue::Null => "z:".to_string(),
        }
    }

    /// Parses a stored value. Malformed numbers and timestamps, and values
    /// without a tag, come back as [`FieldValue::Str`] of the raw text.
    pub fn decode(raw: &str) -> FieldValue {
        let Some((tag, body)) = raw.split_once(':') else {
            return FieldValue::Str(raw.to_string());
        };
        match tag {
            "s" => FieldValue::Str(body.to_string()),
            "n" => body
                .parse()
                .map(FieldValue::Number)
                .unwrap_or_else(|_| FieldValue::Str(raw.to_string())),
            "t" => body
                .parse()
                .ok()
                .and_then(from_unix_millis)
                .map_or_else(|| FieldValue::Str(raw.to_string()), FieldValue::Timestamp),
            "z" if body.is_empty() => FieldValue::Null,
            _ => FieldValue::Str(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<SystemTime> {
        match self {
            FieldValue::Timestamp(time) => Some(*time),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(text) => f.write_str(text),
            FieldValue::Number(value) => write!(f, "{value}"),
            FieldValue::Timestamp(time) => write!(f, "@{}ms", unix_millis(*time)),
            FieldValue::Null => f.write_str("null"),
        }
    }
}

impl From<&FieldValue> for Arg {
    fn from(value: &FieldValue) -> Self {
        Arg::from(value.encode())
    }
}

impl From<FieldValue> for Arg {
    fn from(value: FieldValue) -> Self {
        Arg::from(value.encode())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<SystemTime> for FieldValue {
    fn from(value: SystemTime) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_millis())
            .map(|millis| -millis)
            .unwrap_or(i64::MIN),
    }
}

fn from_unix_millis(millis: i64) -> Option<SystemTime> {
    let offset = Duration::from_millis(millis.unsigned_abs());
    if millis >= 0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    }
}
