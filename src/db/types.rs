//! Database-agnostic type mappings.
//!
//! Rows coming back from sqlx are converted into dynamic `Record`s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders extract the value, falling back through
//!    the representations the backend may actually have sent
//!
//! NULL is detected up front from the raw value, so decoders only ever see
//! non-null data. A value no decoder accepts is a mapping error naming the
//! column.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    DateTime,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Date/time before integers: "interval" and "point" contain "int"
    if lower.contains("timestamp")
        || lower.contains("datetime")
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return TypeCategory::DateTime;
    }

    if (lower.contains("int") && !lower.contains("interval") && !lower.contains("point"))
        || lower.contains("serial")
        || lower.contains("tiny")
    {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "string" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(pg_numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

const PG_NUMERIC_NEG: u16 = 0x4000;
const PG_NUMERIC_NAN: u16 = 0xC000;
const PG_NUMERIC_PINF: u16 = 0xD000;
const PG_NUMERIC_NINF: u16 = 0xF000;

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as text.
fn pg_numeric_to_string(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    if buf.len() < 8 {
        return Err("truncated NUMERIC header".into());
    }
    let read = |at: usize| i16::from_be_bytes([buf[at], buf[at + 1]]);
    let ndigits = read(0).max(0) as usize;
    let weight = read(2) as i32;
    let sign = read(4) as u16;
    let dscale = read(6).max(0) as usize;
    if buf.len() < 8 + ndigits * 2 {
        return Err("truncated NUMERIC digits".into());
    }

    match sign {
        PG_NUMERIC_NAN => return Ok("NaN".to_string()),
        PG_NUMERIC_PINF => return Ok("Infinity".to_string()),
        PG_NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digit = |i: i32| -> i16 {
        if i < 0 || i as usize >= ndigits {
            0
        } else {
            read(8 + i as usize * 2)
        }
    };

    let mut out = String::new();
    if sign == PG_NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                out.push_str(&digit(i).to_string());
            } else {
                out.push_str(&format!("{:04}", digit(i)));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut group = 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(weight + group)));
            group += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting database rows to dynamic records.
pub trait RowToRecord {
    fn to_record(&self) -> DbResult<Record>;
}

fn is_null_at<R>(row: &R, idx: usize) -> bool
where
    R: Row,
    usize: ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    T: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    row.try_get::<T, _>(idx).ok()
}

fn undecodable(column: &str, category: TypeCategory, type_name: &str) -> DbError {
    DbError::mapping(column, format!("{:?} value", category), type_name)
}

macro_rules! impl_row_to_record {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowToRecord for $row {
            fn to_record(&self) -> DbResult<Record> {
                let mut record = Record::with_capacity(self.columns().len());
                for (idx, col) in self.columns().iter().enumerate() {
                    let value = if is_null_at(self, idx) {
                        Value::Null
                    } else {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $db);
                        $decoder(self, idx, category)
                            .ok_or_else(|| undecodable(col.name(), category, type_name))?
                    };
                    record.push(col.name(), value);
                }
                Ok(record)
            }
        }
    };
}

impl_row_to_record!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_record!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_record!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

fn parse_json_text(text: String) -> Value {
    match serde_json::from_str::<JsonValue>(&text) {
        Ok(json) => Value::Json(json),
        Err(_) => Value::Text(text),
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<Value> {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(Value::Bytes),
            TypeCategory::Json => get::<_, JsonValue>(row, idx).map(Value::Json),
            TypeCategory::DateTime => decode_datetime(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Option<Value> {
        get::<_, RawDecimal>(row, idx)
            .map(|v| Value::Decimal(v.0))
            .or_else(|| decode_float(row, idx))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<Value> {
        // Signed first, then unsigned (only u64 can leave the i64 range)
        get::<_, i8>(row, idx)
            .map(i64::from)
            .or_else(|| get::<_, i16>(row, idx).map(i64::from))
            .or_else(|| get::<_, i32>(row, idx).map(i64::from))
            .or_else(|| get::<_, i64>(row, idx))
            .or_else(|| get::<_, u8>(row, idx).map(i64::from))
            .or_else(|| get::<_, u16>(row, idx).map(i64::from))
            .or_else(|| get::<_, u32>(row, idx).map(i64::from))
            .map(Value::Int)
            .or_else(|| {
                get::<_, u64>(row, idx).map(|v| match i64::try_from(v) {
                    Ok(v) => Value::Int(v),
                    Err(_) => Value::UInt(v),
                })
            })
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Option<Value> {
        get::<_, bool>(row, idx)
            .map(Value::Bool)
            .or_else(|| get::<_, i8>(row, idx).map(|v| Value::Bool(v != 0)))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Option<Value> {
        get::<_, f64>(row, idx)
            .or_else(|| get::<_, f32>(row, idx).map(f64::from))
            .map(Value::Float)
    }

    fn decode_datetime(row: &MySqlRow, idx: usize) -> Option<Value> {
        get::<_, NaiveDateTime>(row, idx)
            .map(Value::DateTime)
            .or_else(|| {
                get::<_, DateTime<Utc>>(row, idx)
                    .map(|v| Value::DateTimeOffset(v.fixed_offset()))
            })
            .or_else(|| {
                get::<_, NaiveDate>(row, idx)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(Value::DateTime)
            })
            .or_else(|| get::<_, NaiveTime>(row, idx).map(|t| Value::Text(t.to_string())))
            .or_else(|| decode_text(row, idx))
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Option<Value> {
        get::<_, String>(row, idx)
            .map(Value::Text)
            .or_else(|| {
                get::<_, Vec<u8>>(row, idx).map(|bytes| match String::from_utf8(bytes) {
                    Ok(text) => Value::Text(text),
                    Err(e) => Value::Bytes(e.into_bytes()),
                })
            })
            .or_else(|| decode_integer(row, idx))
            .or_else(|| decode_float(row, idx))
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Option<Value> {
        match category {
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|v| Value::Decimal(v.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(Value::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(Value::Bytes),
            TypeCategory::Json => get::<_, JsonValue>(row, idx).map(Value::Json),
            TypeCategory::Uuid => get::<_, uuid::Uuid>(row, idx).map(Value::Uuid),
            TypeCategory::DateTime => decode_datetime(row, idx),
            _ => get::<_, String>(row, idx).map(Value::Text),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<Value> {
        get::<_, i16>(row, idx)
            .map(i64::from)
            .or_else(|| get::<_, i32>(row, idx).map(i64::from))
            .or_else(|| get::<_, i64>(row, idx))
            .map(Value::Int)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Option<Value> {
        get::<_, f64>(row, idx)
            .or_else(|| get::<_, f32>(row, idx).map(f64::from))
            .map(Value::Float)
    }

    fn decode_datetime(row: &PgRow, idx: usize) -> Option<Value> {
        get::<_, NaiveDateTime>(row, idx)
            .map(Value::DateTime)
            .or_else(|| {
                get::<_, DateTime<Utc>>(row, idx)
                    .map(|v| Value::DateTimeOffset(v.fixed_offset()))
            })
            .or_else(|| {
                get::<_, NaiveDate>(row, idx)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(Value::DateTime)
            })
            .or_else(|| get::<_, NaiveTime>(row, idx).map(|t| Value::Text(t.to_string())))
            .or_else(|| get::<_, String>(row, idx).map(Value::Text))
    }
}

mod sqlite {
    use super::*;

    // SQLite values are dynamically typed, so every decoder falls back to
    // whatever storage class the value actually has.
    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Option<Value> {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => get::<_, bool>(row, idx)
                .map(Value::Bool)
                .or_else(|| decode_integer(row, idx)),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx)
                .map(Value::Bytes)
                .or_else(|| decode_text(row, idx)),
            TypeCategory::Json => get::<_, String>(row, idx).map(parse_json_text),
            TypeCategory::DateTime => get::<_, NaiveDateTime>(row, idx)
                .map(Value::DateTime)
                .or_else(|| {
                    get::<_, DateTime<chrono::FixedOffset>>(row, idx).map(Value::DateTimeOffset)
                })
                .or_else(|| decode_text(row, idx)),
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> Option<Value> {
        get::<_, i64>(row, idx)
            .map(Value::Int)
            .or_else(|| get::<_, f64>(row, idx).map(Value::Float))
            .or_else(|| get::<_, String>(row, idx).map(Value::Text))
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> Option<Value> {
        get::<_, f64>(row, idx)
            .map(Value::Float)
            .or_else(|| get::<_, i64>(row, idx).map(|v| Value::Float(v as f64)))
            .or_else(|| get::<_, String>(row, idx).map(Value::Text))
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> Option<Value> {
        get::<_, String>(row, idx)
            .map(Value::Text)
            .or_else(|| get::<_, i64>(row, idx).map(Value::Int))
            .or_else(|| get::<_, f64>(row, idx).map(Value::Float))
            .or_else(|| get::<_, Vec<u8>>(row, idx).map(Value::Bytes))
    }
}
