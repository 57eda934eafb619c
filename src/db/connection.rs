//! Database connection management using sqlx
//!
//! The pool connects lazily: building it never touches the network, so an
//! unreachable database surfaces on first use (or as an unhealthy ping)
//! rather than at startup.

use crate::error::{NlqError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

pub type DbPool = PgPool;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Initialize the database connection pool. Only the URL is checked here.
pub fn init_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(database_url)
        .map_err(|e| match e {
            sqlx::Error::Configuration(inner) => NlqError::Config(format!("Invalid database URL: {}", inner)),
            other => NlqError::SchemaUnavailable(format!("Failed to create database pool: {}", other)),
        })?;

    info!("Database pool created ({} connections max)", MAX_CONNECTIONS);
    Ok(pool)
}
