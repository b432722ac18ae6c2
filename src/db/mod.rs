//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The `Context` and its units of work
//! - The registry of active units of work
//! - Driver traits and the bundled sqlx driver
//! - Parameter binding and type mappings
//! - Declarative macros (dispatch, mapped records, parameter bags)

#[macro_use]
pub mod macros;
pub mod connection;
pub mod context;
pub mod driver;
pub mod params;
pub mod registry;
pub mod types;
pub mod unit_of_work;

pub use connection::{SqlxBackend, SqlxConnection, SqlxTransaction};
pub use context::{Context, SQLITE_PARAMETER_MARKER};
pub use driver::{Connection, ConnectionFactory, TransactionHandle};
pub use registry::{UnitOfWorkMetadata, UnitOfWorkRegistry};
pub use unit_of_work::{UnitOfWork, UnitOfWorkId, UnitOfWorkState};

/// Context over the bundled sqlx driver.
pub type SqlxContext = Context<SqlxConnection>;
