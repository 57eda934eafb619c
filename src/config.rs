//! Application configuration
//!
//! Loaded from the process environment (after `.env`), with defaults matching
//! the deployed bike-share service.

use crate::error::{NlqError, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_LLM_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Tunables for matching, synthesis and execution.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// How long an introspected schema stays fresh
    pub schema_ttl: Duration,
    pub match_top_k: usize,
    pub match_threshold: f64,
    /// Rows returned to the caller before the truncation flag is set
    pub max_result_rows: usize,
    pub statement_timeout: Duration,
    /// Character budget for the schema section of the LLM prompt
    pub schema_context_budget: usize,
    pub llm_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            schema_ttl: Duration::from_secs(600),
            match_top_k: 3,
            match_threshold: 0.3,
            max_result_rows: 1000,
            statement_timeout: Duration::from_secs(15),
            schema_context_budget: 6000,
            llm_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// None disables the LLM path; every question goes to the rule engine
    pub llm: Option<LlmConfig>,
    /// None disables embeddings; the matcher runs keyword scoring only
    pub embedding: Option<EmbeddingConfig>,
    pub settings: PipelineSettings,
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => {
                let host = get("PGHOST").unwrap_or_else(|| "localhost".to_string());
                let user = get("PGUSER").unwrap_or_else(|| "postgres".to_string());
                let password = get("PGPASSWORD").unwrap_or_default();
                let database = get("PGDATABASE").unwrap_or_else(|| "bike_share".to_string());
                let port = get("PGPORT").unwrap_or_else(|| "5432".to_string());
                format!("postgresql://{}:{}@{}:{}/{}", user, password, host, port, database)
            }
        };

        let defaults = PipelineSettings::default();
        let settings = PipelineSettings {
            schema_ttl: Duration::from_secs(parse_or(&get, "SCHEMA_TTL_SECS", defaults.schema_ttl.as_secs())?),
            match_top_k: parse_or(&get, "MATCH_TOP_K", defaults.match_top_k)?,
            match_threshold: parse_or(&get, "MATCH_THRESHOLD", defaults.match_threshold)?,
            max_result_rows: parse_or(&get, "MAX_RESULT_ROWS", defaults.max_result_rows)?,
            statement_timeout: Duration::from_secs(parse_or(
                &get,
                "STATEMENT_TIMEOUT_SECS",
                defaults.statement_timeout.as_secs(),
            )?),
            schema_context_budget: parse_or(&get, "SCHEMA_CONTEXT_BUDGET", defaults.schema_context_budget)?,
            llm_timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", defaults.llm_timeout.as_secs())?),
        };

        if !(0.0..=1.0).contains(&settings.match_threshold) {
            return Err(NlqError::Config(format!(
                "MATCH_THRESHOLD must be within [0, 1], got {}",
                settings.match_threshold
            )));
        }
        if settings.match_top_k == 0 {
            return Err(NlqError::Config("MATCH_TOP_K must be at least 1".to_string()));
        }

        let llm = get("LLM_API_KEY").or_else(|| get("GROQ_API_KEY")).map(|api_key| LlmConfig {
            api_key,
            base_url: get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            timeout: settings.llm_timeout,
        });

        let embedding = get("EMBEDDING_API_KEY").map(|api_key| EmbeddingConfig {
            api_key,
            base_url: get("EMBEDDING_BASE_URL").unwrap_or_else(|| DEFAULT_EMBEDDING_BASE_URL.to_string()),
            model: get("EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        });

        Ok(Self {
            database_url,
            llm,
            embedding,
            settings,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| NlqError::Config(format!("Invalid value for {}: {} ({})", key, raw, e))),
        None => Ok(default),
    }
}
