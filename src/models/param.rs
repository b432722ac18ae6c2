//! Command parameters.
//!
//! A parameter bag is any `ToParams` value: a struct declared with
//! `mapped_record!`, an ad-hoc `params!` list, or a plain `Vec<Parameter>`.
//! Bag fields carry bare names; the context prefixes them with the driver's
//! parameter marker when binding.

use crate::models::value::{ToValue, Value};
use serde::{Deserialize, Serialize};

/// Abstract parameter type tag.
///
/// Advisory only: drivers may use it to pick a narrower wire type, and a
/// parameter without a tag is still bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    Byte,
    SByte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
    Decimal,
    Boolean,
    String,
    StringFixedLength,
    Guid,
    DateTime,
    DateTimeOffset,
    Binary,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A single named command parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param_type: Option<ParamType>,
}

impl Parameter {
    /// Create a parameter with an explicit value and optional type tag.
    pub fn new(name: impl Into<String>, value: Value, param_type: Option<ParamType>) -> Self {
        Self {
            name: name.into(),
            value,
            param_type,
        }
    }

    /// Create a parameter from a bag field, tagging it from the type table.
    pub fn from_field<T: ToValue + ?Sized>(name: &str, value: &T) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_value(),
            param_type: T::PARAM_TYPE,
        }
    }

    /// Return this parameter renamed with a marker format.
    pub fn with_marker(mut self, marker: &str) -> Self {
        self.name = apply_marker(marker, &self.name);
        self
    }
}

/// Format a parameter name with a marker.
///
/// Formats containing `{0}` (as reported by driver metadata, e.g. `:{0}`)
/// get the name substituted; anything else is used as a prefix (`@`).
pub fn apply_marker(marker: &str, name: &str) -> String {
    if marker.contains("{0}") {
        marker.replace("{0}", name)
    } else {
        format!("{}{}", marker, name)
    }
}

/// A parameter bag.
pub trait ToParams: Sync {
    /// The bag's fields as bare-named parameters, in declaration order.
    fn to_params(&self) -> Vec<Parameter>;
}

impl ToParams for Vec<Parameter> {
    fn to_params(&self) -> Vec<Parameter> {
        self.clone()
    }
}

impl ToParams for [Parameter] {
    fn to_params(&self) -> Vec<Parameter> {
        self.to_vec()
    }
}

impl ToParams for () {
    fn to_params(&self) -> Vec<Parameter> {
        Vec::new()
    }
}
