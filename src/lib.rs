//! dbcontext
//!
//! A small data-access layer over one database connection (SQLite,
//! PostgreSQL, MySQL): commands, scalar and row queries with parameter bags,
//! dynamic and typed row mapping, and units of work that ad-hoc commands
//! join automatically while they are active.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, ContextOptions, ScopePolicy};
pub use db::{Context, SqlxContext, UnitOfWork};
pub use error::{DbError, DbResult};
pub use models::{CommandKind, FromRecord, FromValue, Parameter, Record, ToParams, ToValue, Value};
