//! Database values and conversions.
//!
//! `Value` is the driver-agnostic representation of a single column or
//! parameter. `ToValue` turns Rust values into parameters (and carries the
//! advisory parameter type tag for the type); `FromValue` coerces a database
//! value back into a Rust type, failing with a mapping error when the value
//! has no sensible conversion.

use crate::error::{DbError, DbResult};
use crate::models::param::ParamType;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A single database value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    Bool(bool),
    /// Signed integers of any width
    Int(i64),
    /// Unsigned 64-bit integers
    UInt(u64),
    Float(f64),
    /// Exact numeric kept in its textual database representation
    Decimal(String),
    Text(String),
    Uuid(Uuid),
    /// Date and time without offset
    DateTime(NaiveDateTime),
    /// Date and time with offset
    DateTimeOffset(DateTime<FixedOffset>),
    /// Binary data (base64 encoded in JSON)
    #[serde(serialize_with = "base64_bytes::serialize")]
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl Value {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Uuid(_) => "uuid",
            Self::DateTime(_) => "datetime",
            Self::DateTimeOffset(_) => "datetimeoffset",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// Describe the value for a mapping error, e.g. `text 'abc'`.
    fn describe(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Text(s) | Self::Decimal(s) => format!("{} '{}'", self.type_name(), s),
            Self::Bytes(b) => format!("bytes ({} bytes)", b.len()),
            Self::Int(v) => format!("int {}", v),
            Self::UInt(v) => format!("uint {}", v),
            Self::Float(v) => format!("float {}", v),
            Self::Bool(v) => format!("bool {}", v),
            other => other.type_name().to_string(),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

fn mismatch(expected: &str, value: &Value) -> DbError {
    DbError::mapping("", expected, value.describe())
}

// =============================================================================
// Rust -> Value
// =============================================================================

/// Conversion of a Rust value into a bindable parameter value.
///
/// `PARAM_TYPE` is the compile-time parameter type table: each implementing
/// type declares its tag, types outside the table leave it `None` and are
/// bound untagged.
pub trait ToValue {
    const PARAM_TYPE: Option<ParamType> = None;

    fn to_value(&self) -> Value;
}

macro_rules! impl_to_value_int {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl ToValue for $ty {
                const PARAM_TYPE: Option<ParamType> = Some(ParamType::$tag);

                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }
            }
        )*
    };
}

impl_to_value_int! {
    i8 => SByte,
    u8 => Byte,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
}

impl ToValue for u64 {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::UInt64);

    fn to_value(&self) -> Value {
        Value::UInt(*self)
    }
}

impl ToValue for f32 {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::Single);

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl ToValue for f64 {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::Double);

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl ToValue for bool {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::Boolean);

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ToValue for str {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::String);

    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl ToValue for String {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::String);

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ToValue for char {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::StringFixedLength);

    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl ToValue for Decimal {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::Decimal);

    fn to_value(&self) -> Value {
        Value::Decimal(self.0.clone())
    }
}

impl ToValue for Uuid {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::Guid);

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }
}

impl ToValue for NaiveDateTime {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::DateTime);

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }
}

impl ToValue for DateTime<FixedOffset> {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::DateTimeOffset);

    fn to_value(&self) -> Value {
        Value::DateTimeOffset(*self)
    }
}

impl ToValue for DateTime<Utc> {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::DateTimeOffset);

    fn to_value(&self) -> Value {
        Value::DateTimeOffset(self.fixed_offset())
    }
}

impl ToValue for [u8] {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::Binary);

    fn to_value(&self) -> Value {
        Value::Bytes(self.to_vec())
    }
}

impl ToValue for Vec<u8> {
    const PARAM_TYPE: Option<ParamType> = Some(ParamType::Binary);

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}

impl ToValue for JsonValue {
    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl<T: ToValue> ToValue for Option<T> {
    const PARAM_TYPE: Option<ParamType> = T::PARAM_TYPE;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    const PARAM_TYPE: Option<ParamType> = T::PARAM_TYPE;

    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

/// Exact numeric in its textual form, e.g. `"12.50"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Decimal(pub String);

impl Decimal {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Value -> Rust
// =============================================================================

/// Coercion of a database value into a Rust type.
///
/// NULL only converts into `Option<T>` and `Value`; every other target
/// reports a mapping error for it.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> DbResult<Self>;
}

fn to_i128(value: &Value, expected: &str) -> DbResult<i128> {
    match value {
        Value::Int(v) => Ok(i128::from(*v)),
        Value::UInt(v) => Ok(i128::from(*v)),
        Value::Bool(v) => Ok(i128::from(*v)),
        Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Ok(*v as i128),
        Value::Text(s) | Value::Decimal(s) => {
            let s = s.trim();
            s.parse::<i128>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| f as i128)
                })
                .ok_or_else(|| mismatch(expected, value))
        }
        _ => Err(mismatch(expected, value)),
    }
}

macro_rules! impl_from_value_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> DbResult<Self> {
                    let wide = to_i128(value, stringify!($ty))?;
                    <$ty>::try_from(wide).map_err(|_| mismatch(stringify!($ty), value))
                }
            }
        )*
    };
}

impl_from_value_int!(i8, u8, i16, u16, i32, u32, i64, u64);

impl FromValue for f64 {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::UInt(v) => Ok(*v as f64),
            Value::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Value::Text(s) | Value::Decimal(s) => {
                s.trim().parse().map_err(|_| mismatch("f64", value))
            }
            _ => Err(mismatch("f64", value)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> DbResult<Self> {
        f64::from_value(value)
            .map(|v| v as f32)
            .map_err(|_| mismatch("f32", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            Value::UInt(v) => Ok(*v != 0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(mismatch("bool", value)),
            },
            _ => Err(mismatch("bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Int(v) => Ok(v.to_string()),
            Value::UInt(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(v.to_string()),
            Value::Uuid(v) => Ok(v.to_string()),
            Value::DateTime(v) => Ok(v.to_string()),
            Value::DateTimeOffset(v) => Ok(v.to_rfc3339()),
            Value::Json(v) => Ok(v.to_string()),
            Value::Bytes(b) => String::from_utf8(b.clone()).map_err(|_| mismatch("String", value)),
            Value::Null => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for char {
    fn from_value(value: &Value) -> DbResult<Self> {
        let s = String::from_value(value).map_err(|_| mismatch("char", value))?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(mismatch("char", value)),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Decimal(s) => Ok(Decimal(s.clone())),
            Value::Int(v) => Ok(Decimal(v.to_string())),
            Value::UInt(v) => Ok(Decimal(v.to_string())),
            Value::Float(v) => Ok(Decimal(v.to_string())),
            Value::Text(s) if s.trim().parse::<f64>().is_ok() => Ok(Decimal(s.trim().to_string())),
            _ => Err(mismatch("Decimal", value)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Uuid(v) => Ok(*v),
            Value::Text(s) => Uuid::parse_str(s.trim()).map_err(|_| mismatch("Uuid", value)),
            Value::Bytes(b) => Uuid::from_slice(b).map_err(|_| mismatch("Uuid", value)),
            _ => Err(mismatch("Uuid", value)),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::DateTime(v) => Ok(*v),
            Value::DateTimeOffset(v) => Ok(v.naive_utc()),
            Value::Text(s) => {
                let s = s.trim();
                DATETIME_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                    .or_else(|| {
                        NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .ok()
                            .map(|d| d.and_time(NaiveTime::MIN))
                    })
                    .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.naive_utc()))
                    .ok_or_else(|| mismatch("NaiveDateTime", value))
            }
            _ => Err(mismatch("NaiveDateTime", value)),
        }
    }
}

impl FromValue for DateTime<FixedOffset> {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::DateTimeOffset(v) => Ok(*v),
            Value::DateTime(v) => Ok(v.and_utc().fixed_offset()),
            Value::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .or_else(|_| DateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f%:z"))
                .or_else(|_| {
                    NaiveDateTime::from_value(value)
                        .map(|v| v.and_utc().fixed_offset())
                        .map_err(|_| ())
                })
                .map_err(|_| mismatch("DateTime<FixedOffset>", value)),
            _ => Err(mismatch("DateTime<FixedOffset>", value)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> DbResult<Self> {
        DateTime::<FixedOffset>::from_value(value)
            .map(|v| v.with_timezone(&Utc))
            .map_err(|_| mismatch("DateTime<Utc>", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(mismatch("Vec<u8>", value)),
        }
    }
}

impl FromValue for JsonValue {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|_| mismatch("JSON", value)),
            Value::Null => Err(mismatch("JSON", value)),
            other => serde_json::to_value(other).map_err(|_| mismatch("JSON", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> DbResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_table() {
        assert_eq!(<i32 as ToValue>::PARAM_TYPE, Some(ParamType::Int32));
        assert_eq!(<Option<i32> as ToValue>::PARAM_TYPE, Some(ParamType::Int32));
        assert_eq!(<&str as ToValue>::PARAM_TYPE, Some(ParamType::String));
        assert_eq!(<char as ToValue>::PARAM_TYPE, Some(ParamType::StringFixedLength));
        assert_eq!(<Vec<u8> as ToValue>::PARAM_TYPE, Some(ParamType::Binary));
        assert_eq!(<Option<Uuid> as ToValue>::PARAM_TYPE, Some(ParamType::Guid));
        assert_eq!(
            <DateTime<Utc> as ToValue>::PARAM_TYPE,
            Some(ParamType::DateTimeOffset)
        );
        // Outside the table: bound without a tag
        assert_eq!(<JsonValue as ToValue>::PARAM_TYPE, None);
        assert_eq!(<Value as ToValue>::PARAM_TYPE, None);
    }

    #[test]
    fn test_to_value() {
        assert_eq!(42u8.to_value(), Value::Int(42));
        assert_eq!(u64::MAX.to_value(), Value::UInt(u64::MAX));
        assert_eq!("bob".to_value(), Value::Text("bob".to_string()));
        assert_eq!(None::<i64>.to_value(), Value::Null);
        assert_eq!('x'.to_value(), Value::Text("x".to_string()));
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(i32::from_value(&Value::Int(7)).unwrap(), 7);
        assert_eq!(i64::from_value(&Value::Text(" 12 ".to_string())).unwrap(), 12);
        assert_eq!(i64::from_value(&Value::Float(3.0)).unwrap(), 3);
        assert_eq!(u8::from_value(&Value::Bool(true)).unwrap(), 1);
        assert!(i32::from_value(&Value::Float(3.5)).is_err());
        assert!(u8::from_value(&Value::Int(300)).is_err());
        assert!(u32::from_value(&Value::Int(-1)).is_err());
    }

    #[test]
    fn test_null_only_maps_to_option() {
        assert!(i64::from_value(&Value::Null).is_err());
        assert!(String::from_value(&Value::Null).is_err());
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(&Value::Int(5)).unwrap(), Some(5));
    }

    #[test]
    fn test_mapping_error_describes_value() {
        let err = i32::from_value(&Value::Text("abc".to_string())).unwrap_err();
        match err {
            DbError::Mapping {
                column,
                expected,
                found,
            } => {
                assert!(column.is_empty());
                assert_eq!(expected, "i32");
                assert_eq!(found, "text 'abc'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bool_and_string_coercion() {
        assert!(bool::from_value(&Value::Int(2)).unwrap());
        assert!(!bool::from_value(&Value::Text("false".to_string())).unwrap());
        assert!(bool::from_value(&Value::Text("maybe".to_string())).is_err());
        assert_eq!(String::from_value(&Value::Int(9)).unwrap(), "9");
        assert_eq!(char::from_value(&Value::Text("z".to_string())).unwrap(), 'z');
        assert!(char::from_value(&Value::Text("zz".to_string())).is_err());
    }

    #[test]
    fn test_datetime_from_text() {
        let v = Value::Text("2024-03-01 10:20:30".to_string());
        let dt = NaiveDateTime::from_value(&v).unwrap();
        assert_eq!(dt.to_string(), "2024-03-01 10:20:30");

        let v = Value::Text("2024-03-01T10:20:30+02:00".to_string());
        let dt = DateTime::<FixedOffset>::from_value(&v).unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 7200);
        assert_eq!(DateTime::<Utc>::from_value(&v).unwrap().to_rfc3339(), "2024-03-01T08:20:30+00:00");
    }

    #[test]
    fn test_uuid_from_text_and_bytes() {
        let id = Uuid::new_v4();
        assert_eq!(Uuid::from_value(&Value::Text(id.to_string())).unwrap(), id);
        assert_eq!(Uuid::from_value(&Value::Bytes(id.as_bytes().to_vec())).unwrap(), id);
    }

    #[test]
    fn test_value_serializes_bytes_as_base64() {
        let json = serde_json::to_value(Value::Bytes(b"hello world".to_vec())).unwrap();
        assert_eq!(json, JsonValue::String("aGVsbG8gd29ybGQ=".to_string()));
        assert_eq!(serde_json::to_value(Value::Null).unwrap(), JsonValue::Null);
        assert_eq!(serde_json::to_value(Value::Int(3)).unwrap(), serde_json::json!(3));
    }
}
