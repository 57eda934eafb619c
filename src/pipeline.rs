//! Question pipeline
//!
//! Wires the catalog, matcher, synthesizer and executor together and turns
//! a question into the caller-facing envelope. Every failure ends up in the
//! envelope's `error` field as a sanitized message; nothing here panics or
//! leaks raw database text.

use crate::catalog::{PgMetadataSource, SchemaCatalog};
use crate::config::{AppConfig, PipelineSettings};
use crate::db;
use crate::error::{NlqError, Result};
use crate::execution::{format_answer, PgQueryRunner, QueryExecutor, QueryResult};
use crate::semantic::{extract_terms, EmbeddingBackend, OpenAiEmbedder, SemanticMatcher};
use crate::synth::{LlmBackend, OpenAiCompatClient, Provenance, QuerySynthesizer};
use crate::validation::SqlValidator;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Caller-facing result of one question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerEnvelope {
    /// Executed SQL; empty when no candidate was produced
    pub sql: String,
    pub result: QueryResult,
    pub provenance: Option<Provenance>,
    pub truncated: bool,
    pub error: Option<String>,
    /// Plain-text rendering of `result`
    pub answer: Option<String>,
}

impl AnswerEnvelope {
    fn failure(error: &NlqError, sql: String, provenance: Option<Provenance>) -> Self {
        Self {
            sql,
            result: QueryResult::Empty,
            provenance,
            truncated: false,
            error: Some(error.user_message()),
            answer: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaDump {
    pub version: u64,
    pub schema: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub database: &'static str,
    /// Version of the cached schema snapshot, if one is loaded
    pub schema_version: Option<u64>,
}

pub struct QueryPipeline {
    catalog: Arc<SchemaCatalog>,
    matcher: SemanticMatcher,
    synthesizer: QuerySynthesizer,
    executor: QueryExecutor,
    settings: PipelineSettings,
}

impl QueryPipeline {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        matcher: SemanticMatcher,
        synthesizer: QuerySynthesizer,
        executor: QueryExecutor,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            catalog,
            matcher,
            synthesizer,
            executor,
            settings,
        }
    }

    /// Build the PostgreSQL-backed pipeline described by `config`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let pool = db::init_pool(&config.database_url)?;
        let settings = config.settings.clone();

        let catalog = Arc::new(SchemaCatalog::new(
            Arc::new(PgMetadataSource::new(pool.clone())),
            settings.schema_ttl,
        ));

        let embedder: Option<Arc<dyn EmbeddingBackend>> = match &config.embedding {
            Some(embedding) => Some(Arc::new(OpenAiEmbedder::new(embedding)?) as Arc<dyn EmbeddingBackend>),
            None => None,
        };
        let llm: Option<Arc<dyn LlmBackend>> = match &config.llm {
            Some(llm) => Some(Arc::new(OpenAiCompatClient::new(llm)?) as Arc<dyn LlmBackend>),
            None => None,
        };
        info!(
            "Pipeline configured (llm: {}, embeddings: {})",
            llm.is_some(),
            embedder.is_some()
        );

        let synthesizer = QuerySynthesizer::new(
            llm,
            SqlValidator::new(),
            settings.llm_timeout,
            settings.schema_context_budget,
        );
        let executor = QueryExecutor::new(
            Arc::new(PgQueryRunner::new(pool)),
            settings.max_result_rows,
            settings.statement_timeout,
        );

        Ok(Self::new(
            catalog,
            SemanticMatcher::new(embedder),
            synthesizer,
            executor,
            settings,
        ))
    }

    /// Answer one question. Never fails; errors are reported in the envelope.
    pub async fn answer(&self, question: &str) -> AnswerEnvelope {
        let request_id = Uuid::new_v4();
        let span = info_span!("question", id = %request_id);
        self.answer_inner(question).instrument(span).await
    }

    async fn answer_inner(&self, question: &str) -> AnswerEnvelope {
        let started = Instant::now();
        info!("Question: {}", question);

        let snapshot = match self.catalog.get_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("No schema available: {}", e);
                return AnswerEnvelope::failure(&e, String::new(), None);
            }
        };

        let terms = extract_terms(question);
        debug!("Extracted terms: {:?}", terms);
        let matches = self
            .matcher
            .match_terms(&snapshot, &terms, self.settings.match_top_k, self.settings.match_threshold)
            .await;

        let validated = match self.synthesizer.synthesize(question, &snapshot, &matches).await {
            Ok(validated) => validated,
            Err(e) => {
                warn!("Synthesis failed: {}", e);
                return AnswerEnvelope::failure(&e, String::new(), None);
            }
        };

        let sql = validated.sql().to_string();
        let provenance = validated.provenance();
        let execution = match self.executor.execute(&validated).await {
            Ok(execution) => execution,
            Err(e) => return AnswerEnvelope::failure(&e, sql, Some(provenance)),
        };

        info!(
            "Answered via {} in {}ms",
            provenance,
            started.elapsed().as_millis()
        );
        let answer = format_answer(&execution.result);
        AnswerEnvelope {
            sql,
            result: execution.result,
            provenance: Some(provenance),
            truncated: execution.truncated,
            error: None,
            answer: Some(answer),
        }
    }

    /// Formatted schema text and the qualified column list.
    pub async fn schema_dump(&self) -> Result<SchemaDump> {
        let snapshot = self.catalog.get_snapshot().await?;
        Ok(SchemaDump {
            version: snapshot.version(),
            schema: snapshot.schema_text(),
            columns: snapshot.all_columns(),
        })
    }

    pub async fn health(&self) -> HealthStatus {
        let schema_version = self.catalog.cached().map(|s| s.version());
        match self.executor.ping().await {
            Ok(()) => HealthStatus {
                status: "healthy",
                database: "connected",
                schema_version,
            },
            Err(e) => {
                warn!("Health check failed: {}", e);
                HealthStatus {
                    status: "unhealthy",
                    database: "unavailable",
                    schema_version,
                }
            }
        }
    }
}
