//! Backend scalar values and their JSON rendering.
//!
//! Exact numerics and temporal types are rendered as strings so nothing is
//! lost to float coercion.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// NUMERIC/DECIMAL in its exact decimal text form.
    Numeric(String),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(uuid::Uuid),
    Bytes(Vec<u8>),
    Json(Value),
    Array(Vec<ScalarValue>),
    /// A type the gateway does not decode; carries the type name.
    Unsupported(String),
}

impl ScalarValue {
    /// Render as JSON.
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Number(i.into()),
            Self::Float(f) => float_to_json(f),
            Self::Numeric(s) | Self::Text(s) => Value::String(s),
            Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            Self::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::TimestampTz(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Uuid(u) => Value::String(u.to_string()),
            Self::Bytes(b) => Value::String(STANDARD.encode(b)),
            Self::Json(v) => v,
            Self::Array(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Unsupported(type_name) => Value::String(format!("<unsupported:{type_name}>")),
        }
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for ScalarValue {
            fn from(value: $ty) -> Self {
                Self::$variant(value.into())
            }
        })*
    };
}

scalar_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => Text,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
    uuid::Uuid => Uuid,
    Vec<u8> => Bytes,
    Value => Json,
}

/// Widen through the shortest decimal text so `0.1::float4` stays `0.1`.
impl From<f32> for ScalarValue {
    fn from(value: f32) -> Self {
        Self::Float(value.to_string().parse().unwrap_or_else(|_| f64::from(value)))
    }
}

/// Postgres spells non-finite floats `NaN`, `Infinity`, `-Infinity`.
fn float_to_json(f: f64) -> Value {
    match Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None if f.is_nan() => Value::String("NaN".to_string()),
        None if f > 0.0 => Value::String("Infinity".to_string()),
        None => Value::String("-Infinity".to_string()),
    }
}
