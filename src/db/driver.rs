//! Driver abstraction.
//!
//! The context talks to a database only through these traits: a factory
//! producing one physical connection, the connection itself (begin
//! transaction, run commands, report its parameter marker), and the
//! transaction handle (commit/rollback). `SqlxConnection` is the bundled
//! implementation; tests plug in their own.

use crate::error::DbResult;
use crate::models::{Command, DatabaseType, Record, Value};
use async_trait::async_trait;

/// Handle to one open transaction.
///
/// Handles are cheap clones that all refer to the same transaction: the unit
/// of work owns one, the registry keeps one to hand out to commands.
#[async_trait]
pub trait TransactionHandle: Clone + Send + Sync + 'static {
    /// Identifier unique among this connection's transactions.
    fn id(&self) -> &str;

    /// Whether the transaction is still open on its connection. Turns false
    /// once it is committed, rolled back, or ended by an enclosing rollback.
    fn is_active(&self) -> bool;

    /// Give the transaction up without awaiting. The connection rolls it
    /// back before it runs its next statement.
    fn abandon(&self);

    /// Commit the transaction.
    async fn commit(&self) -> DbResult<()>;

    /// Roll the transaction back.
    async fn rollback(&self) -> DbResult<()>;
}

/// One physical database connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Transaction: TransactionHandle;

    /// The database family, or `None` for drivers outside the known set.
    fn database_type(&self) -> Option<DatabaseType>;

    /// Parameter marker format from driver metadata, e.g. `:{0}` or `@`.
    fn parameter_marker_format(&self) -> DbResult<String>;

    /// Begin a transaction on this connection.
    async fn begin(&self) -> DbResult<Self::Transaction>;

    /// Execute a non-query command, returning the affected row count.
    async fn execute(&self, command: &Command<Self::Transaction>) -> DbResult<u64>;

    /// First column of the first row; `Value::Null` when there is none.
    async fn scalar(&self, command: &Command<Self::Transaction>) -> DbResult<Value>;

    /// All rows, read eagerly. The cursor is closed before returning.
    async fn query(&self, command: &Command<Self::Transaction>) -> DbResult<Vec<Record>>;

    /// Close the physical connection.
    async fn close(self) -> DbResult<()>;
}

/// Creates physical connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;

    async fn create(&self) -> DbResult<Self::Connection>;
}
