//! The data-access context.
//!
//! A `Context` owns one physical connection and the registry of active
//! units of work opened on it. Every command goes through the context:
//! it binds the parameter bag, attaches the transaction selected by the
//! scope policy (if any unit of work is active) and hands the command to
//! the driver.
//!
//! # Concurrency
//!
//! `Context` is `Send + Sync`; share it with `Arc`. The registry lock is
//! taken only while a command is being built or a unit of work registers or
//! completes. The connection itself is not covered by that lock: drivers
//! serialize access to it themselves.

use crate::config::{ContextOptions, ScopePolicy};
use crate::db::driver::{Connection, ConnectionFactory, TransactionHandle};
use crate::db::registry::{UnitOfWorkMetadata, UnitOfWorkRegistry};
use crate::db::unit_of_work::{CompletionCallback, UnitOfWork, UnitOfWorkId};
use crate::error::{DbError, DbResult};
use crate::models::{
    Command, CommandKind, DatabaseType, FromRecord, FromValue, Record, ToParams,
};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Marker of the distinguished driver family; other drivers report theirs.
pub const SQLITE_PARAMETER_MARKER: &str = "@";

pub struct Context<C: Connection> {
    connection: C,
    registry: Arc<UnitOfWorkRegistry<C::Transaction>>,
    parameter_marker: String,
}

impl<C: Connection> Context<C> {
    /// Wrap an open connection.
    pub fn new(connection: C, options: ContextOptions) -> DbResult<Self> {
        options.validate().map_err(DbError::invalid_input)?;

        let parameter_marker = match options.parameter_marker {
            Some(marker) => marker,
            None => resolve_parameter_marker(&connection)?,
        };

        info!(
            database_type = ?connection.database_type(),
            parameter_marker = %parameter_marker,
            scope_policy = %options.scope_policy,
            "Context opened"
        );

        Ok(Self {
            connection,
            registry: Arc::new(UnitOfWorkRegistry::new(options.scope_policy)),
            parameter_marker,
        })
    }

    /// Create a connection through `factory` and wrap it.
    pub async fn connect<F>(factory: &F, options: ContextOptions) -> DbResult<Self>
    where
        F: ConnectionFactory<Connection = C>,
    {
        let connection = factory.create().await?;
        Self::new(connection, options)
    }

    /// Begin a transaction and register it as a new unit of work.
    pub async fn create_unit_of_work(&self) -> DbResult<UnitOfWork<C::Transaction>> {
        let transaction = self.connection.begin().await?;
        let id = UnitOfWorkId::generate();

        let uow = UnitOfWork::new(
            id.clone(),
            transaction.clone(),
            self.deregistration_callback(),
            self.deregistration_callback(),
        );
        self.registry.register(id, transaction);

        info!(
            unit_of_work_id = %uow.id(),
            transaction_id = %uow.transaction().id(),
            "Unit of work started"
        );
        Ok(uow)
    }

    /// Execute a non-query command and return the affected row count.
    pub async fn execute(
        &self,
        command_text: &str,
        parameters: Option<&dyn ToParams>,
        kind: CommandKind,
    ) -> DbResult<u64> {
        let command = self.create_command(command_text, kind, parameters);
        let rows_affected = self.connection.execute(&command).await?;

        debug!(
            sql = %command.text,
            rows_affected = rows_affected,
            "Executed command"
        );
        Ok(rows_affected)
    }

    /// Return the first column of the first row converted to `T`.
    ///
    /// An empty result or NULL converts only into `Option<_>`.
    pub async fn scalar<T: FromValue>(
        &self,
        command_text: &str,
        parameters: Option<&dyn ToParams>,
        kind: CommandKind,
    ) -> DbResult<T> {
        let command = self.create_command(command_text, kind, parameters);
        let value = self.connection.scalar(&command).await?;

        debug!(sql = %command.text, value_type = value.type_name(), "Executed scalar");
        T::from_value(&value).map_err(|e| e.with_column("scalar"))
    }

    /// Run a query and return every row as a dynamic record.
    pub async fn query(
        &self,
        command_text: &str,
        parameters: Option<&dyn ToParams>,
        kind: CommandKind,
    ) -> DbResult<Vec<Record>> {
        let command = self.create_command(command_text, kind, parameters);
        let rows = self.connection.query(&command).await?;

        debug!(sql = %command.text, row_count = rows.len(), "Executed query");
        Ok(rows)
    }

    /// Run a query and map every row into `T`.
    ///
    /// A mapping failure in any row fails the whole call.
    pub async fn query_as<T: FromRecord>(
        &self,
        command_text: &str,
        parameters: Option<&dyn ToParams>,
        kind: CommandKind,
    ) -> DbResult<Vec<T>> {
        let rows = self.query(command_text, parameters, kind).await?;
        rows.iter().map(T::from_record).collect()
    }

    /// Number of active units of work.
    pub fn active_unit_of_work_count(&self) -> usize {
        self.registry.len()
    }

    /// Active units of work in creation order.
    pub fn active_units_of_work(&self) -> Vec<UnitOfWorkMetadata> {
        self.registry.list_all()
    }

    /// Which active unit of work ad-hoc commands join.
    pub fn scope_policy(&self) -> ScopePolicy {
        self.registry.policy()
    }

    /// The marker prefixed to parameter names.
    pub fn parameter_marker(&self) -> &str {
        &self.parameter_marker
    }

    pub fn database_type(&self) -> Option<DatabaseType> {
        self.connection.database_type()
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Close the physical connection.
    ///
    /// Outstanding units of work are not completed; their transactions end
    /// with the connection.
    pub async fn close(self) -> DbResult<()> {
        let outstanding = self.registry.len();
        info!(
            outstanding_units = outstanding,
            scope_policy = %self.scope_policy(),
            "Closing context"
        );
        self.connection.close().await
    }

    /// Build a command: bind parameters, then join the selected unit of
    /// work's transaction under the registry's read lock.
    pub fn create_command(
        &self,
        command_text: &str,
        kind: CommandKind,
        parameters: Option<&dyn ToParams>,
    ) -> Command<C::Transaction> {
        let mut command = Command::new(command_text, kind);
        if let Some(bag) = parameters {
            command.bind(bag, &self.parameter_marker);
        }
        command.transaction = self.registry.current();
        command
    }

    fn deregistration_callback(&self) -> CompletionCallback {
        let registry: Weak<UnitOfWorkRegistry<C::Transaction>> = Arc::downgrade(&self.registry);
        Box::new(move |id: &UnitOfWorkId| {
            if let Some(registry) = registry.upgrade() {
                registry.deregister(id);
            }
        })
    }
}

impl<C: Connection> std::fmt::Debug for Context<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("database_type", &self.connection.database_type())
            .field("parameter_marker", &self.parameter_marker)
            .field("scope_policy", &self.scope_policy())
            .field("active_units", &self.registry.len())
            .finish()
    }
}

/// Fixed marker for SQLite, driver metadata for everything else.
fn resolve_parameter_marker<C: Connection>(connection: &C) -> DbResult<String> {
    match connection.database_type() {
        Some(DatabaseType::SQLite) => Ok(SQLITE_PARAMETER_MARKER.to_string()),
        _ => connection.parameter_marker_format(),
    }
}
