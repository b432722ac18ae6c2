//! Data models for the data-access context.
//!
//! This module re-exports the value, parameter, record and command types
//! shared by the context and the drivers.

pub mod command;
pub mod connection;
pub mod param;
pub mod record;
pub mod value;

// Re-export commonly used types
pub use command::{Command, CommandKind};
pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType};
pub use param::{ParamType, Parameter, ToParams, apply_marker};
pub use record::{FromRecord, Record};
pub use value::{Decimal, FromValue, ToValue, Value};
