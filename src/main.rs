//! dbcontext - Main entry point.
//!
//! Runs SQL statements against one database through a `Context`, optionally
//! inside a single unit of work.

use clap::Parser;
use dbcontext::config::{Action, Config};
use dbcontext::db::{SqlxConnection, SqlxContext};
use dbcontext::{CommandKind, DbResult};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr; stdout carries results
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Run every statement, printing affected counts or rows as JSON lines.
async fn run_statements(context: &SqlxContext, action: &Action) -> DbResult<()> {
    match action {
        Action::Exec { sql } => {
            for statement in sql {
                let rows_affected = context.execute(statement, None, CommandKind::Text).await?;
                println!("{}", rows_affected);
            }
        }
        Action::Query { sql } => {
            for statement in sql {
                let rows = context.query(statement, None, CommandKind::Text).await?;
                for row in &rows {
                    println!("{}", serde_json::to_string(row).unwrap_or_default());
                }
            }
        }
    }
    Ok(())
}

async fn run(config: &Config) -> DbResult<()> {
    let connection_config = config
        .connection_config()
        .map_err(|e| dbcontext::DbError::invalid_input(e.to_string()))?;
    let connection = SqlxConnection::connect(&connection_config).await?;
    let context = SqlxContext::new(connection, config.context_options())?;

    let result = if config.transaction {
        let mut uow = context.create_unit_of_work().await?;
        match run_statements(&context, &config.action).await {
            Ok(()) => uow.save_changes().await,
            Err(e) => {
                // Keep the statement error; the rollback outcome is logged
                let _ = uow.dispose().await;
                Err(e)
            }
        }
    } else {
        run_statements(&context, &config.action).await
    };

    let closed = context.close().await;
    result.and(closed)
}

#[tokio::main]
async fn main() {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!("Starting dbcontext v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&config).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        std::process::exit(1);
    }
}
