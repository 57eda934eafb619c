//! Execution
//!
//! Runs validated candidates through a `QueryRunner`, caps the row count and
//! shapes the rows into a `QueryResult`. Database failures are classified
//! and reduced to caller-safe messages; the raw text only goes to the log.

pub mod result;
pub mod runner;

pub use result::{format_answer, format_value, QueryResult, Row};
pub use runner::{PgQueryRunner, QueryRunner, RunOptions, RunnerError};

use crate::error::{NlqError, Result};
use crate::validation::ValidatedCandidate;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Coarse class of an execution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    DataConversion,
    Rejected,
    Unavailable,
}

impl FailureKind {
    /// Classify by SQLSTATE class where one is available.
    pub fn classify(error: &RunnerError) -> Self {
        match error {
            RunnerError::Timeout => FailureKind::Timeout,
            RunnerError::Decode(_) => FailureKind::DataConversion,
            RunnerError::Unavailable(_) => FailureKind::Unavailable,
            RunnerError::Database { code, .. } => match code.as_deref() {
                Some("57014") => FailureKind::Timeout,
                Some(c) if c.starts_with("22") => FailureKind::DataConversion,
                Some(c) if c.starts_with("42") => FailureKind::Rejected,
                Some(c) if c.starts_with("08") || c.starts_with("53") || c.starts_with("57") => {
                    FailureKind::Unavailable
                }
                _ => FailureKind::Rejected,
            },
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "The query took too long to run. Try narrowing the date range.",
            FailureKind::DataConversion => "The query failed because of a data type mismatch.",
            FailureKind::Rejected => "The database could not run the generated query.",
            FailureKind::Unavailable => "The database is currently unavailable. Please try again later.",
        }
    }
}

/// Result of one execution
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub result: QueryResult,
    /// More rows existed than were returned
    pub truncated: bool,
}

pub struct QueryExecutor {
    runner: Arc<dyn QueryRunner>,
    max_rows: usize,
    statement_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(runner: Arc<dyn QueryRunner>, max_rows: usize, statement_timeout: Duration) -> Self {
        Self {
            runner,
            max_rows: max_rows.max(1),
            statement_timeout,
        }
    }

    /// Run a validated candidate with its bound parameters.
    pub async fn execute(&self, candidate: &ValidatedCandidate) -> Result<Execution> {
        let options = RunOptions {
            statement_timeout: self.statement_timeout,
            row_limit: self.max_rows + 1,
        };
        let started = Instant::now();

        let mut rows = self
            .runner
            .run(candidate.sql(), candidate.params(), options)
            .await
            .map_err(|e| {
                let kind = FailureKind::classify(&e);
                warn!("Query execution failed ({:?})", kind);
                debug!("Database error detail: {}", e);
                NlqError::Execution(kind.user_message().to_string())
            })?;

        let truncated = rows.len() > self.max_rows;
        if truncated {
            rows.truncate(self.max_rows);
        }
        info!(
            "Query returned {} rows in {}ms{}",
            rows.len(),
            started.elapsed().as_millis(),
            if truncated { " (truncated)" } else { "" }
        );

        Ok(Execution {
            result: QueryResult::from_rows(rows),
            truncated,
        })
    }

    pub async fn ping(&self) -> Result<()> {
        self.runner.ping().await.map_err(|e| {
            debug!("Health check failed: {}", e);
            NlqError::Execution(FailureKind::classify(&e).user_message().to_string())
        })
    }
}
