//! sqlsession - run one statement through a pooled session.
//!
//! The result is printed to stdout as JSON: an array of row objects for reads,
//! `{"rowsAffected": n}` for mutations.

use serde_json::json;
use sqlsession::config::Config;
use sqlsession::db::PoolRegistry;
use sqlsession::error::{DbError, DbResult};
use sqlsession::models::StatementOutput;
use sqlsession::session::{Session, SessionListeners};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr, stdout carries the result
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

async fn open_session(registry: &PoolRegistry, config: &Config) -> DbResult<Session> {
    let pool_config = config.pool_config()?;
    let listeners = SessionListeners::new()
        .on_start(|sql| info!(sql = %sql, "Statement started"))
        .on_error(|e| warn!(error = %e, "Session error"));

    match config.acquire_timeout_ms {
        None => registry.session(&pool_config, Some(listeners)).await,
        Some(ms) => {
            let handle = registry.get_or_create(&pool_config).await?;
            let conn = registry
                .acquire(handle.identity(), Duration::from_millis(ms))
                .await?;
            Ok(Session::with_listeners(conn, listeners))
        }
    }
}

async fn run(session: &mut Session, config: &Config) -> DbResult<StatementOutput> {
    let params = config.statement_params()?;
    if !config.transaction {
        return session.run(&config.sql, params.as_deref()).await;
    }

    session.begin().await?;
    let result = session.run(&config.sql, params.as_deref()).await;
    let outcome = session.end(result.as_ref().err()).await?;
    info!(outcome = ?outcome, "Transaction finished");
    result
}

async fn execute(registry: &PoolRegistry, config: &Config) -> DbResult<StatementOutput> {
    let mut session = open_session(registry, config).await?;
    let result = run(&mut session, config).await;
    session.close().await?;
    result
}

fn render(output: &StatementOutput) -> serde_json::Value {
    match output {
        StatementOutput::Rows(rows) => json!(rows),
        StatementOutput::Affected(n) => json!({ "rowsAffected": n }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!("Starting sqlsession v{}", env!("CARGO_PKG_VERSION"));

    let registry = PoolRegistry::new();
    let outcome = tokio::select! {
        result = execute(&registry, &config) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing connection pools");
            None
        }
    };

    registry.shutdown().await;

    let Some(result) = outcome else {
        std::process::exit(130);
    };

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&render(&output))?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Statement failed");
            report(&e);
            std::process::exit(1);
        }
    }
}

fn report(err: &DbError) {
    eprintln!("Error: {}", err);
    if let Some(suggestion) = err.suggestion() {
        eprintln!("Hint: {}", suggestion);
    }
}
