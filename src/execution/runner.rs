//! Query runners
//!
//! A runner executes one parameterized statement and returns ordered rows.
//! The PostgreSQL runner executes inside a read-only transaction with a
//! session-level statement timeout, and transports each row as
//! `row_to_json` text so column order and numeric values survive without
//! per-type decoding.

use crate::db::DbPool;
use crate::execution::result::Row;
use crate::synth::candidate::SqlValue;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryScalar;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Per-call limits
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub statement_timeout: Duration,
    /// Rows fetched at most; callers ask for one more than they keep to
    /// detect truncation
    pub row_limit: usize,
}

/// Raw failure from the database side. Messages may contain schema details
/// and must not reach the caller unfiltered.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerError {
    Timeout,
    Database { code: Option<String>, message: String },
    Unavailable(String),
    Decode(String),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Timeout => write!(f, "statement timed out"),
            RunnerError::Database { code, message } => {
                write!(f, "database error {}: {}", code.as_deref().unwrap_or("?"), message)
            }
            RunnerError::Unavailable(msg) => write!(f, "database unavailable: {}", msg),
            RunnerError::Decode(msg) => write!(f, "row decode failed: {}", msg),
        }
    }
}

#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run(&self, sql: &str, params: &[SqlValue], options: RunOptions) -> Result<Vec<Row>, RunnerError>;

    /// Cheap liveness check
    async fn ping(&self) -> Result<(), RunnerError>;
}

pub struct PgQueryRunner {
    pool: DbPool,
}

impl PgQueryRunner {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn classify(e: sqlx::Error) -> RunnerError {
    match e {
        sqlx::Error::Database(db) => RunnerError::Database {
            code: db.code().map(|c| c.to_string()),
            message: db.message().to_string(),
        },
        sqlx::Error::PoolTimedOut => RunnerError::Timeout,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => RunnerError::Decode(e.to_string()),
        other => RunnerError::Unavailable(other.to_string()),
    }
}

fn bind<'q>(
    query: QueryScalar<'q, Postgres, String, PgArguments>,
    value: &SqlValue,
) -> QueryScalar<'q, Postgres, String, PgArguments> {
    match value {
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Integer(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Date(d) => query.bind(*d),
        SqlValue::Timestamp(ts) => query.bind(*ts),
        SqlValue::Bool(b) => query.bind(*b),
    }
}

#[async_trait]
impl QueryRunner for PgQueryRunner {
    async fn run(&self, sql: &str, params: &[SqlValue], options: RunOptions) -> Result<Vec<Row>, RunnerError> {
        let wrapped = format!(
            "SELECT row_to_json(q)::text AS row FROM ({}) AS q LIMIT {}",
            sql, options.row_limit
        );

        let work = async {
            let mut tx = self.pool.begin().await.map_err(classify)?;
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            sqlx::query(&format!(
                "SET LOCAL statement_timeout = {}",
                options.statement_timeout.as_millis()
            ))
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

            let mut query = sqlx::query_scalar::<_, String>(&wrapped);
            for value in params {
                query = bind(query, value);
            }
            let texts = query.fetch_all(&mut *tx).await.map_err(classify)?;
            tx.rollback().await.map_err(classify)?;
            Ok::<_, RunnerError>(texts)
        };

        // Grace period over the server-side timeout covers pool acquisition
        let texts = tokio::time::timeout(options.statement_timeout + Duration::from_secs(5), work)
            .await
            .map_err(|_| RunnerError::Timeout)??;
        debug!("Fetched {} rows", texts.len());

        texts
            .iter()
            .map(|text| serde_json::from_str::<Row>(text).map_err(|e| RunnerError::Decode(e.to_string())))
            .collect()
    }

    async fn ping(&self) -> Result<(), RunnerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(classify)?;
        Ok(())
    }
}
