//! Parameter binding utilities for the sqlx driver.
//!
//! Commands carry named parameters (`@id`, `:name`, ...). sqlx binds by
//! position, so the command text is rewritten into the backend's positional
//! placeholders first and the parameters are bound in order of appearance.
//! The advisory `ParamType` tag picks the wire type where the backend is
//! strict about it (PostgreSQL).

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ParamType, Parameter, Value};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use uuid::Uuid;

/// Positional placeholder syntax of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (MySQL, SQLite)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

impl PlaceholderStyle {
    pub fn for_database(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::PostgreSQL => Self::Dollar,
            DatabaseType::MySQL | DatabaseType::SQLite => Self::Question,
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Longest parameter whose marked name starts `rest` and ends on an
/// identifier boundary.
fn match_parameter<'p>(rest: &str, parameters: &'p [Parameter]) -> Option<&'p Parameter> {
    parameters
        .iter()
        .filter(|p| !p.name.is_empty() && rest.starts_with(p.name.as_str()))
        .filter(|p| {
            rest[p.name.len()..]
                .chars()
                .next()
                .is_none_or(|c| !is_ident_char(c))
        })
        .max_by_key(|p| p.name.len())
}

/// Rewrite named parameter references into positional placeholders.
///
/// References inside quoted literals or identifiers are left alone, as are
/// matches preceded by an identifier character or by the marker's own first
/// character (so `x::int` is not read as a `:int` reference). A name used
/// twice is bound twice. Parameters never referenced are not bound.
pub fn rewrite_named<'p>(
    sql: &str,
    parameters: &'p [Parameter],
    style: PlaceholderStyle,
) -> (String, Vec<&'p Parameter>) {
    let mut out = String::with_capacity(sql.len());
    let mut ordered = Vec::new();
    if parameters.is_empty() {
        out.push_str(sql);
        return (out, ordered);
    }

    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut i = 0;
    while let Some(c) = sql[i..].chars().next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            out.push(c);
            prev = Some(c);
            i += c.len_utf8();
            continue;
        }
        if c == '\'' || c == '"' || c == '`' {
            quote = Some(c);
            out.push(c);
            prev = Some(c);
            i += c.len_utf8();
            continue;
        }

        let boundary = prev.is_none_or(|p| !is_ident_char(p) && p != c);
        if boundary {
            if let Some(param) = match_parameter(&sql[i..], parameters) {
                ordered.push(param);
                match style {
                    PlaceholderStyle::Question => out.push('?'),
                    PlaceholderStyle::Dollar => {
                        out.push('$');
                        out.push_str(&ordered.len().to_string());
                    }
                }
                i += param.name.len();
                prev = param.name.chars().last();
                continue;
            }
        }

        out.push(c);
        prev = Some(c);
        i += c.len_utf8();
    }

    (out, ordered)
}

/// Command text for a stored-procedure call with every parameter passed
/// in binding order.
pub fn procedure_call(name: &str, parameters: &[Parameter]) -> String {
    let args: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
    format!("CALL {}({})", name, args.join(", "))
}

fn unsigned_to_i64(value: u64, param: &Parameter) -> DbResult<i64> {
    i64::try_from(value).map_err(|_| {
        DbError::invalid_input(format!(
            "Parameter {} value {} exceeds the signed 64-bit range",
            param.name, value
        ))
    })
}

fn narrow<T: TryFrom<i64>>(value: i64, param: &Parameter) -> DbResult<T> {
    T::try_from(value).map_err(|_| {
        DbError::invalid_input(format!(
            "Parameter {} value {} does not fit its declared type {}",
            param.name,
            value,
            param
                .param_type
                .map(|t| t.to_string())
                .unwrap_or_default()
        ))
    })
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q Parameter,
) -> DbResult<sqlx::query::Query<'q, MySql, MySqlArguments>> {
    Ok(match &param.value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::UInt(v) => query.bind(*v),
        Value::Float(v) => match param.param_type {
            Some(ParamType::Single) => query.bind(*v as f32),
            _ => query.bind(*v),
        },
        Value::Decimal(v) | Value::Text(v) => query.bind(v.as_str()),
        Value::Uuid(v) => query.bind(v.hyphenated().to_string()),
        Value::DateTime(v) => query.bind(*v),
        Value::DateTimeOffset(v) => query.bind(v.with_timezone(&Utc)),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(Json(v)),
    })
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q Parameter,
) -> DbResult<sqlx::query::Query<'q, Postgres, PgArguments>> {
    Ok(match &param.value {
        Value::Null => bind_postgres_null(query, param.param_type),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => match param.param_type {
            Some(ParamType::SByte | ParamType::Byte | ParamType::Int16) => {
                query.bind(narrow::<i16>(*v, param)?)
            }
            Some(ParamType::Int32 | ParamType::UInt16) => query.bind(narrow::<i32>(*v, param)?),
            _ => query.bind(*v),
        },
        Value::UInt(v) => query.bind(unsigned_to_i64(*v, param)?),
        Value::Float(v) => match param.param_type {
            Some(ParamType::Single) => query.bind(*v as f32),
            _ => query.bind(*v),
        },
        Value::Decimal(v) | Value::Text(v) => query.bind(v.as_str()),
        Value::Uuid(v) => query.bind(*v),
        Value::DateTime(v) => query.bind(*v),
        Value::DateTimeOffset(v) => query.bind(v.with_timezone(&Utc)),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(Json(v)),
    })
}

/// PostgreSQL types NULL parameters, so pick the type from the tag.
fn bind_postgres_null<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param_type: Option<ParamType>,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param_type {
        Some(ParamType::Boolean) => query.bind(None::<bool>),
        Some(ParamType::SByte | ParamType::Byte | ParamType::Int16) => query.bind(None::<i16>),
        Some(ParamType::Int32 | ParamType::UInt16) => query.bind(None::<i32>),
        Some(ParamType::Int64 | ParamType::UInt32 | ParamType::UInt64) => {
            query.bind(None::<i64>)
        }
        Some(ParamType::Single) => query.bind(None::<f32>),
        Some(ParamType::Double) => query.bind(None::<f64>),
        Some(ParamType::Guid) => query.bind(None::<Uuid>),
        Some(ParamType::DateTime) => query.bind(None::<NaiveDateTime>),
        Some(ParamType::DateTimeOffset) => query.bind(None::<DateTime<Utc>>),
        Some(ParamType::Binary) => query.bind(None::<Vec<u8>>),
        _ => query.bind(None::<String>),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q Parameter,
) -> DbResult<sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>> {
    Ok(match &param.value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::UInt(v) => query.bind(unsigned_to_i64(*v, param)?),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) | Value::Text(v) => query.bind(v.as_str()),
        // Stored as text so it reads back as a UUID string
        Value::Uuid(v) => query.bind(v.hyphenated().to_string()),
        Value::DateTime(v) => query.bind(*v),
        Value::DateTimeOffset(v) => query.bind(*v),
        Value::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        Value::Json(v) => query.bind(v.to_string()),
    })
}
