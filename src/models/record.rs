//! Result-row mapping.
//!
//! Rows come back from a driver as `Record`s: ordered column/value pairs
//! with names kept verbatim. `FromRecord` builds a typed row from a record by
//! exact, case-sensitive column to field matching.

use crate::error::DbResult;
use crate::models::value::{FromValue, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A dynamic result row.
///
/// Duplicate column names are kept; lookups by name return the first match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Append a column. Never replaces an existing column of the same name.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.columns.push((name.into(), value));
    }

    /// Value of the first column named `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Value at column position `index`.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Convert the first column named `name` into `T`.
    pub fn get_as<T: FromValue>(&self, name: &str) -> DbResult<T> {
        let value = self.get(name).unwrap_or(&Value::Null);
        T::from_value(value).map_err(|e| e.with_column(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Column names in result order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn into_columns(self) -> Vec<(String, Value)> {
        self.columns
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A statically-typed result row.
///
/// Implemented by `mapped_record!`, which generates the column matching once
/// per type.
pub trait FromRecord: Default {
    /// Field names this type maps, in declaration order.
    const COLUMNS: &'static [&'static str];

    /// Assign `value` to the field named `column`.
    ///
    /// Returns `Ok(false)` when the type has no such field.
    fn set_column(&mut self, column: &str, value: &Value) -> DbResult<bool>;

    /// Build a row from a record: start from `Default`, assign every
    /// matching non-NULL column, skip the rest.
    fn from_record(record: &Record) -> DbResult<Self> {
        let mut item = Self::default();
        for (name, value) in record.iter() {
            if value.is_null() {
                continue;
            }
            item.set_column(name, value)
                .map_err(|e| e.with_column(name))?;
        }
        Ok(item)
    }
}
