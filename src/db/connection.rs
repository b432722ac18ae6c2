//! sqlx-backed connection.
//!
//! One `SqlxConnection` wraps one physical connection (not a pool). Units of
//! work on the same connection nest: the first transaction is a real
//! `BEGIN`, later ones are savepoints inside it. Nesting is strict:
//!
//! - a command may only run in the innermost open transaction, since that is
//!   where the statement physically lands;
//! - only the innermost transaction can commit;
//! - rolling back a transaction also ends every transaction opened after it,
//!   and their handles report `is_active() == false`.
//!
//! Access to the physical connection is serialized through an async mutex
//! shared with every transaction handle. Abandoned transactions (dropped
//! units of work) are queued synchronously and rolled back under that mutex
//! before the next statement runs.

use crate::db::driver::{Connection, ConnectionFactory, TransactionHandle};
use crate::db::params::{
    PlaceholderStyle, bind_mysql_param, bind_postgres_param, bind_sqlite_param, procedure_call,
    rewrite_named,
};
use crate::db::types::RowToRecord;
use crate::error::{DbError, DbResult};
use crate::models::{
    Command, CommandKind, ConnectionConfig, DatabaseType, Parameter, Record, Value,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection as _, MySqlConnection, PgConnection, SqliteConnection};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Database-specific physical connection (avoids Any driver limitations).
#[derive(Debug)]
pub enum SqlxBackend {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl SqlxBackend {
    /// Get the database type for this connection.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            SqlxBackend::MySql(_) => DatabaseType::MySQL,
            SqlxBackend::Postgres(_) => DatabaseType::PostgreSQL,
            SqlxBackend::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

#[derive(Debug)]
struct OpenTransaction {
    id: String,
    /// `None` for the outermost transaction
    savepoint: Option<String>,
    /// Shared with every handle of this transaction
    ended: Arc<AtomicBool>,
}

/// Transactions given up without awaiting, waiting for their rollback.
type AbandonedQueue = Arc<parking_lot::Mutex<Vec<String>>>;

#[derive(Debug)]
struct ConnectionState {
    backend: Option<SqlxBackend>,
    /// Open transactions, outermost first
    open: Vec<OpenTransaction>,
    next_savepoint: u64,
}

impl ConnectionState {
    fn backend(&mut self) -> DbResult<&mut SqlxBackend> {
        self.backend
            .as_mut()
            .ok_or_else(|| DbError::invalid_state("Connection is closed"))
    }

    fn position(&self, transaction_id: &str) -> Option<usize> {
        self.open.iter().position(|tx| tx.id == transaction_id)
    }

    /// Forget the transaction at `pos` and every one opened after it.
    fn end_from(&mut self, pos: usize) -> usize {
        let ended = self.open.split_off(pos);
        for tx in &ended {
            tx.ended.store(true, Ordering::SeqCst);
        }
        ended.len()
    }

    /// Roll back the transaction at `pos`; newer ones end with it.
    async fn rollback_at(&mut self, pos: usize) -> DbResult<usize> {
        let savepoint = self.open[pos].savepoint.clone();
        let backend = self.backend()?;
        match savepoint {
            None => run_control(backend, "ROLLBACK").await?,
            Some(name) => {
                run_control(backend, &format!("ROLLBACK TO SAVEPOINT {}", name)).await?;
                run_control(backend, &format!("RELEASE SAVEPOINT {}", name)).await?;
            }
        }
        Ok(self.end_from(pos))
    }

    /// Roll back every abandoned transaction still open.
    async fn roll_back_abandoned(&mut self, abandoned: &AbandonedQueue) -> DbResult<()> {
        let pending = std::mem::take(&mut *abandoned.lock());
        for (i, id) in pending.iter().enumerate() {
            let Some(pos) = self.position(id) else {
                continue;
            };
            if let Err(e) = self.rollback_at(pos).await {
                abandoned.lock().extend(pending[i..].iter().cloned());
                return Err(e);
            }
            debug!(transaction_id = %id, "Abandoned transaction rolled back");
        }
        Ok(())
    }
}

pub struct SqlxConnection {
    db_type: DatabaseType,
    state: Arc<Mutex<ConnectionState>>,
    abandoned: AbandonedQueue,
}

impl SqlxConnection {
    /// Open a physical connection.
    pub async fn connect(config: &ConnectionConfig) -> DbResult<Self> {
        info!(
            db_type = %config.db_type,
            connection = %config.masked_connection_string(),
            "Connecting to database"
        );

        let backend = match config.db_type {
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&config.connection_string)?
                    .create_if_missing(true);
                SqlxBackend::SQLite(options.connect().await?)
            }
            DatabaseType::PostgreSQL => {
                SqlxBackend::Postgres(PgConnection::connect(&config.connection_string).await?)
            }
            DatabaseType::MySQL => {
                SqlxBackend::MySql(MySqlConnection::connect(&config.connection_string).await?)
            }
        };

        info!(db_type = %config.db_type, "Connected");
        Ok(Self::from_backend(backend))
    }

    /// Wrap an already open connection.
    pub fn from_backend(backend: SqlxBackend) -> Self {
        Self {
            db_type: backend.db_type(),
            state: Arc::new(Mutex::new(ConnectionState {
                backend: Some(backend),
                open: Vec::new(),
                next_savepoint: 0,
            })),
            abandoned: AbandonedQueue::default(),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Number of transactions (including savepoints) still open.
    pub async fn open_transaction_count(&self) -> usize {
        self.state.lock().await.open.len()
    }

    /// Resolve the final statement text and the parameters in binding order.
    fn prepare<'c>(
        &self,
        command: &'c Command<SqlxTransaction>,
    ) -> DbResult<(String, Vec<&'c Parameter>)> {
        let text = match command.kind {
            CommandKind::Text => command.text.clone(),
            CommandKind::StoredProcedure => {
                if !self.db_type.supports_stored_procedures() {
                    return Err(DbError::invalid_input(format!(
                        "{} does not support stored procedures",
                        self.db_type.display_name()
                    )));
                }
                procedure_call(&command.text, &command.parameters)
            }
        };
        Ok(rewrite_named(
            &text,
            &command.parameters,
            PlaceholderStyle::for_database(self.db_type),
        ))
    }

    /// The command's transaction must belong to this connection and be the
    /// innermost open transaction.
    fn check_transaction(
        &self,
        state: &ConnectionState,
        command: &Command<SqlxTransaction>,
    ) -> DbResult<()> {
        let Some(tx) = &command.transaction else {
            return Ok(());
        };
        if !Arc::ptr_eq(&tx.state, &self.state) {
            return Err(DbError::transaction(
                "Transaction belongs to a different connection",
                tx.id(),
            ));
        }
        let Some(pos) = state.position(tx.id()) else {
            return Err(DbError::transaction(
                "Transaction is no longer active",
                tx.id(),
            ));
        };
        if pos + 1 != state.open.len() {
            return Err(DbError::invalid_state(format!(
                "Transaction {} has {} newer open transaction(s) on this connection; \
                 commands run only in the innermost one",
                tx.id(),
                state.open.len() - pos - 1
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqlxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxConnection")
            .field("db_type", &self.db_type)
            .finish()
    }
}

#[async_trait]
impl Connection for SqlxConnection {
    type Transaction = SqlxTransaction;

    fn database_type(&self) -> Option<DatabaseType> {
        Some(self.db_type)
    }

    fn parameter_marker_format(&self) -> DbResult<String> {
        Ok(match self.db_type {
            DatabaseType::PostgreSQL => ":{0}",
            DatabaseType::MySQL | DatabaseType::SQLite => "@{0}",
        }
        .to_string())
    }

    async fn begin(&self) -> DbResult<SqlxTransaction> {
        let mut state = self.state.lock().await;
        state.roll_back_abandoned(&self.abandoned).await?;

        let savepoint = if state.open.is_empty() {
            None
        } else {
            state.next_savepoint += 1;
            Some(format!("uow_sp_{}", state.next_savepoint))
        };
        let sql = match &savepoint {
            None => "BEGIN".to_string(),
            Some(name) => format!("SAVEPOINT {}", name),
        };
        run_control(state.backend()?, &sql).await?;

        let id = generate_transaction_id();
        debug!(
            transaction_id = %id,
            savepoint = ?savepoint,
            depth = state.open.len() + 1,
            "Transaction started"
        );
        let ended = Arc::new(AtomicBool::new(false));
        state.open.push(OpenTransaction {
            id: id.clone(),
            savepoint,
            ended: ended.clone(),
        });

        Ok(SqlxTransaction {
            id,
            state: self.state.clone(),
            abandoned: self.abandoned.clone(),
            ended,
        })
    }

    async fn execute(&self, command: &Command<SqlxTransaction>) -> DbResult<u64> {
        let mut state = self.state.lock().await;
        state.roll_back_abandoned(&self.abandoned).await?;
        self.check_transaction(&state, command)?;
        let (sql, params) = self.prepare(command)?;

        debug!(
            sql = %sql,
            param_count = params.len(),
            transaction_id = ?command.transaction.as_ref().map(|tx| tx.id()),
            "Executing command"
        );

        impl_db_dispatch!(state.backend()?, {
            MySql(conn) => mysql::execute(conn, &sql, &params).await,
            Postgres(conn) => postgres::execute(conn, &sql, &params).await,
            SQLite(conn) => sqlite::execute(conn, &sql, &params).await,
        })
    }

    async fn scalar(&self, command: &Command<SqlxTransaction>) -> DbResult<Value> {
        let mut state = self.state.lock().await;
        state.roll_back_abandoned(&self.abandoned).await?;
        self.check_transaction(&state, command)?;
        let (sql, params) = self.prepare(command)?;

        debug!(sql = %sql, param_count = params.len(), "Executing scalar");

        let record = impl_db_dispatch!(state.backend()?, {
            MySql(conn) => mysql::fetch_first(conn, &sql, &params).await?,
            Postgres(conn) => postgres::fetch_first(conn, &sql, &params).await?,
            SQLite(conn) => sqlite::fetch_first(conn, &sql, &params).await?,
        });

        Ok(record
            .and_then(|r| r.into_columns().into_iter().next())
            .map(|(_, value)| value)
            .unwrap_or(Value::Null))
    }

    async fn query(&self, command: &Command<SqlxTransaction>) -> DbResult<Vec<Record>> {
        let mut state = self.state.lock().await;
        state.roll_back_abandoned(&self.abandoned).await?;
        self.check_transaction(&state, command)?;
        let (sql, params) = self.prepare(command)?;

        debug!(sql = %sql, param_count = params.len(), "Executing query");

        impl_db_dispatch!(state.backend()?, {
            MySql(conn) => mysql::fetch_all(conn, &sql, &params).await,
            Postgres(conn) => postgres::fetch_all(conn, &sql, &params).await,
            SQLite(conn) => sqlite::fetch_all(conn, &sql, &params).await,
        })
    }

    async fn close(self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        if !state.open.is_empty() {
            warn!(
                open_transactions = state.open.len(),
                "Closing connection with open transactions"
            );
        }
        state.end_from(0);
        self.abandoned.lock().clear();

        let Some(backend) = state.backend.take() else {
            return Ok(());
        };
        impl_db_dispatch!(backend, {
            MySql(conn) => conn.close().await?,
            Postgres(conn) => conn.close().await?,
            SQLite(conn) => conn.close().await?,
        });

        info!(db_type = %self.db_type, "Connection closed");
        Ok(())
    }
}

#[async_trait]
impl ConnectionFactory for ConnectionConfig {
    type Connection = SqlxConnection;

    async fn create(&self) -> DbResult<SqlxConnection> {
        SqlxConnection::connect(self).await
    }
}

/// Handle to a transaction (or savepoint) on a `SqlxConnection`.
#[derive(Clone)]
pub struct SqlxTransaction {
    id: String,
    state: Arc<Mutex<ConnectionState>>,
    abandoned: AbandonedQueue,
    ended: Arc<AtomicBool>,
}

impl std::fmt::Debug for SqlxTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxTransaction").field("id", &self.id).finish()
    }
}

#[async_trait]
impl TransactionHandle for SqlxTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        !self.ended.load(Ordering::SeqCst)
    }

    fn abandon(&self) {
        if self.is_active() {
            self.abandoned.lock().push(self.id.clone());
        }
    }

    /// Only the innermost open transaction can commit.
    async fn commit(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        state.backend()?;
        state.roll_back_abandoned(&self.abandoned).await?;
        let pos = state.position(&self.id).ok_or_else(|| {
            DbError::transaction("Transaction is no longer active", self.id.as_str())
        })?;
        let newer = state.open.len() - pos - 1;
        if newer > 0 {
            return Err(DbError::invalid_state(format!(
                "Transaction {} cannot commit while {} newer transaction(s) are open",
                self.id, newer
            )));
        }

        let sql = match &state.open[pos].savepoint {
            None => "COMMIT".to_string(),
            Some(name) => format!("RELEASE SAVEPOINT {}", name),
        };
        run_control(state.backend()?, &sql).await?;
        state.end_from(pos);

        debug!(transaction_id = %self.id, "Transaction committed");
        Ok(())
    }

    /// Rolling back also ends every transaction opened after this one.
    /// Rolling back a transaction that already ended is a no-op.
    async fn rollback(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        state.backend()?;
        state.roll_back_abandoned(&self.abandoned).await?;
        let Some(pos) = state.position(&self.id) else {
            return Ok(());
        };

        let ended = state.rollback_at(pos).await?;
        if ended > 1 {
            warn!(
                transaction_id = %self.id,
                nested = ended - 1,
                "Rollback ended nested transactions"
            );
        }
        debug!(transaction_id = %self.id, "Transaction rolled back");
        Ok(())
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// Run a transaction-control statement over the text protocol.
async fn run_control(backend: &mut SqlxBackend, sql: &str) -> DbResult<()> {
    use sqlx::Executor;
    impl_db_dispatch!(backend, {
        MySql(conn) => { (&mut *conn).execute(sql).await?; },
        Postgres(conn) => { (&mut *conn).execute(sql).await?; },
        SQLite(conn) => { (&mut *conn).execute(sql).await?; },
    });
    Ok(())
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// Without parameters the raw SQL runs directly, which avoids prepared
// statement issues for statements like CREATE PROCEDURE.

mod mysql {
    use super::*;
    use sqlx::Executor;

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_mysql_param(query, param)?;
            }
            query.execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<Vec<Record>> {
        let rows: Vec<sqlx::mysql::MySqlRow> = if params.is_empty() {
            (&mut *conn).fetch(sql).try_collect().await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_mysql_param(query, param)?;
            }
            query.fetch(&mut *conn).try_collect().await?
        };
        rows.iter().map(RowToRecord::to_record).collect()
    }

    pub async fn fetch_first(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<Option<Record>> {
        let row = if params.is_empty() {
            (&mut *conn).fetch_optional(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_mysql_param(query, param)?;
            }
            query.fetch_optional(&mut *conn).await?
        };
        row.as_ref().map(RowToRecord::to_record).transpose()
    }
}

mod postgres {
    use super::*;
    use sqlx::Executor;

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_postgres_param(query, param)?;
            }
            query.execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(
        conn: &mut PgConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<Vec<Record>> {
        let rows: Vec<sqlx::postgres::PgRow> = if params.is_empty() {
            (&mut *conn).fetch(sql).try_collect().await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_postgres_param(query, param)?;
            }
            query.fetch(&mut *conn).try_collect().await?
        };
        rows.iter().map(RowToRecord::to_record).collect()
    }

    pub async fn fetch_first(
        conn: &mut PgConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<Option<Record>> {
        let row = if params.is_empty() {
            (&mut *conn).fetch_optional(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_postgres_param(query, param)?;
            }
            query.fetch_optional(&mut *conn).await?
        };
        row.as_ref().map(RowToRecord::to_record).transpose()
    }
}

mod sqlite {
    use super::*;
    use sqlx::Executor;

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_sqlite_param(query, param)?;
            }
            query.execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<Vec<Record>> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = if params.is_empty() {
            (&mut *conn).fetch(sql).try_collect().await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_sqlite_param(query, param)?;
            }
            query.fetch(&mut *conn).try_collect().await?
        };
        rows.iter().map(RowToRecord::to_record).collect()
    }

    pub async fn fetch_first(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[&Parameter],
    ) -> DbResult<Option<Record>> {
        let row = if params.is_empty() {
            (&mut *conn).fetch_optional(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params.iter().copied() {
                query = bind_sqlite_param(query, param)?;
            }
            query.fetch_optional(&mut *conn).await?
        };
        row.as_ref().map(RowToRecord::to_record).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory() -> SqlxConnection {
        let config = ConnectionConfig::new("sqlite::memory:").unwrap();
        SqlxConnection::connect(&config).await.unwrap()
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32);
    }

    #[tokio::test]
    async fn test_parameter_marker_formats() {
        let conn = memory().await;
        assert_eq!(conn.database_type(), Some(DatabaseType::SQLite));
        assert_eq!(conn.parameter_marker_format().unwrap(), "@{0}");
    }

    #[tokio::test]
    async fn test_nested_transactions_use_savepoints() {
        let conn = memory().await;
        conn.execute(&Command::new("CREATE TABLE t (v INTEGER)", CommandKind::Text))
            .await
            .unwrap();

        let outer = conn.begin().await.unwrap();
        let inner = conn.begin().await.unwrap();
        assert_eq!(conn.open_transaction_count().await, 2);

        let mut insert = Command::new("INSERT INTO t VALUES (1)", CommandKind::Text);
        insert.transaction = Some(inner.clone());
        conn.execute(&insert).await.unwrap();

        inner.rollback().await.unwrap();
        assert_eq!(conn.open_transaction_count().await, 1);
        outer.commit().await.unwrap();
        assert_eq!(conn.open_transaction_count().await, 0);

        let count = conn
            .scalar(&Command::new("SELECT COUNT(*) FROM t", CommandKind::Text))
            .await
            .unwrap();
        assert_eq!(count, Value::Int(0));
    }

    #[tokio::test]
    async fn test_commands_run_only_in_innermost_transaction() {
        let conn = memory().await;
        let outer = conn.begin().await.unwrap();
        let inner = conn.begin().await.unwrap();

        let mut command = Command::new("SELECT 1", CommandKind::Text);
        command.transaction = Some(outer.clone());
        let err = conn.scalar(&command).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));

        command.transaction = Some(inner.clone());
        assert_eq!(conn.scalar(&command).await.unwrap(), Value::Int(1));

        inner.commit().await.unwrap();
        command.transaction = Some(outer.clone());
        assert_eq!(conn.scalar(&command).await.unwrap(), Value::Int(1));
        outer.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_with_newer_open_transaction_is_rejected() {
        let conn = memory().await;
        let outer = conn.begin().await.unwrap();
        let inner = conn.begin().await.unwrap();

        let err = outer.commit().await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));
        assert!(outer.is_active());
        assert!(inner.is_active());
        assert_eq!(conn.open_transaction_count().await, 2);

        inner.commit().await.unwrap();
        outer.commit().await.unwrap();
        assert!(!outer.is_active());
        assert!(!inner.is_active());
    }

    #[tokio::test]
    async fn test_rollback_ends_newer_transactions() {
        let conn = memory().await;
        let outer = conn.begin().await.unwrap();
        let inner = conn.begin().await.unwrap();

        outer.rollback().await.unwrap();
        assert!(!outer.is_active());
        assert!(!inner.is_active());
        assert_eq!(conn.open_transaction_count().await, 0);

        // Ended handles: commit fails, rollback is a no-op
        assert!(matches!(
            inner.commit().await,
            Err(DbError::Transaction { .. })
        ));
        assert!(inner.rollback().await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_transaction_rolls_back_before_next_statement() {
        let conn = memory().await;
        conn.execute(&Command::new("CREATE TABLE t (v INTEGER)", CommandKind::Text))
            .await
            .unwrap();

        let tx = conn.begin().await.unwrap();
        let mut insert = Command::new("INSERT INTO t VALUES (1)", CommandKind::Text);
        insert.transaction = Some(tx.clone());
        conn.execute(&insert).await.unwrap();

        tx.abandon();
        assert!(tx.is_active());

        // Runs after the abandoned transaction is gone, so it autocommits
        conn.execute(&Command::new("INSERT INTO t VALUES (2)", CommandKind::Text))
            .await
            .unwrap();
        assert!(!tx.is_active());
        assert_eq!(conn.open_transaction_count().await, 0);

        let rows = conn
            .query(&Command::new("SELECT v FROM t", CommandKind::Text))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("v"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_command_with_ended_transaction_fails() {
        let conn = memory().await;
        let tx = conn.begin().await.unwrap();
        tx.commit().await.unwrap();

        let mut command = Command::new("SELECT 1", CommandKind::Text);
        command.transaction = Some(tx.clone());
        let err = conn.execute(&command).await.unwrap_err();
        assert!(matches!(err, DbError::Transaction { .. }));

        // Commit twice fails, rollback after the end is a no-op
        assert!(tx.commit().await.is_err());
        assert!(tx.rollback().await.is_ok());
    }

    #[tokio::test]
    async fn test_transaction_from_other_connection_is_rejected() {
        let a = memory().await;
        let b = memory().await;
        let tx = a.begin().await.unwrap();

        let mut command = Command::new("SELECT 1", CommandKind::Text);
        command.transaction = Some(tx);
        let err = b.query(&command).await.unwrap_err();
        assert!(err.to_string().contains("different connection"));
    }

    #[tokio::test]
    async fn test_stored_procedure_rejected_on_sqlite() {
        let conn = memory().await;
        let command: Command<SqlxTransaction> =
            Command::new("refresh_totals", CommandKind::StoredProcedure);
        let err = conn.execute(&command).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_scalar_on_empty_result_is_null() {
        let conn = memory().await;
        conn.execute(&Command::new("CREATE TABLE t (v INTEGER)", CommandKind::Text))
            .await
            .unwrap();
        let value = conn
            .scalar(&Command::new("SELECT v FROM t", CommandKind::Text))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_handles_fail_after_close() {
        let conn = memory().await;
        let tx = conn.begin().await.unwrap();
        conn.close().await.unwrap();

        assert!(matches!(
            tx.commit().await,
            Err(DbError::InvalidState { .. })
        ));
        assert!(matches!(
            tx.rollback().await,
            Err(DbError::InvalidState { .. })
        ));
    }
}
