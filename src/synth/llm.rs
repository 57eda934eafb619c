//! LLM-assisted SQL generation
//!
//! The model only ever produces untrusted text. Literal values come from the
//! question (see `literals`) and are offered as numbered placeholders; the
//! model's SQL may reference any subset of them, and the used placeholders
//! are renumbered densely before binding.

use crate::config::LlmConfig;
use crate::error::{NlqError, Result};
use crate::synth::candidate::{Provenance, SqlCandidate, SqlValue};
use crate::synth::context::SynthesisContext;
use crate::synth::literals::LiteralSlot;
use crate::validation::contains_string_literal;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$(\d+)").unwrap();
    static ref SQL_START: Regex = Regex::new(r"(?i)\bselect\b|\bwith\s+(?:recursive\s+)?\w+\s+as\s*\(").unwrap();
}

const COMMENTARY_PREFIXES: &[&str] = &["note:", "this query", "explanation", "the query", "here is", "this sql"];

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// One prompt in, raw model text out
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible APIs (Groq, OpenAI, ...)
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NlqError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a PostgreSQL expert. Return only a single SQL SELECT statement, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.0,
            "max_tokens": 500
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| NlqError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NlqError::Llm(format!("LLM API returned status {}", status)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NlqError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| NlqError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

pub fn build_prompt(question: &str, context: &SynthesisContext) -> String {
    format!(
        r#"Convert the question into one PostgreSQL SELECT statement.

{}

SEMANTIC MATCHES (question term -> likely column):
{}

VALUES FROM THE QUESTION (reference them only by placeholder):
{}

Rules:
1. Return a single SELECT (or WITH ... SELECT) statement and nothing else.
2. Use only the tables and columns listed above, qualified as table.column.
3. Never write quoted string or date literals. Use the placeholders above for those values.
4. Numeric constants (such as 0 or 60.0) may be written inline.
5. Date windows are half-open: column >= start AND column < end.
6. Trip duration in minutes is EXTRACT(EPOCH FROM (ended_at - started_at)) / 60.0 unless a duration column exists.
7. "Rainy" means precipitation greater than 0.

Question: {}

SQL:"#,
        context.schema,
        context.matches,
        context.slot_text(),
        question
    )
}

/// Strip fences, preamble and trailing commentary from model output,
/// leaving everything from the first SELECT/WITH onwards. Further
/// statements are kept so the validator can reject them.
pub fn clean_sql_output(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```sql").or_else(|| s.strip_prefix("```")) {
        s = rest;
    }
    let s = s.trim().strip_suffix("```").unwrap_or(s).trim();

    let start = SQL_START.find(s).map(|m| m.start()).unwrap_or(0);
    let s = &s[start..];

    let lines: Vec<&str> = s
        .lines()
        .take_while(|line| {
            let lower = line.trim().to_lowercase();
            !lower.starts_with("```") && !COMMENTARY_PREFIXES.iter().any(|p| lower.starts_with(p))
        })
        .collect();

    let sql = lines.join("\n");
    let sql = sql.trim();
    sql.strip_suffix(';').unwrap_or(sql).trim_end().to_string()
}

/// Map the placeholders the model used onto question literals, renumbered
/// `$1..` in order of first appearance.
pub fn bind_slots(sql: &str, slots: &[LiteralSlot]) -> Result<(String, Vec<SqlValue>)> {
    let mut order: Vec<usize> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(sql) {
        let index: usize = caps[1]
            .parse()
            .map_err(|_| NlqError::UnsafeQuery(format!("invalid placeholder ${}", &caps[1])))?;
        if index == 0 || index > slots.len() {
            return Err(NlqError::UnsafeQuery(format!("placeholder ${} has no value", index)));
        }
        if !order.contains(&index) {
            order.push(index);
        }
    }

    let renumber: HashMap<usize, usize> = order.iter().enumerate().map(|(new, old)| (*old, new + 1)).collect();
    let rewritten = PLACEHOLDER.replace_all(sql, |caps: &regex::Captures| {
        let old: usize = caps[1].parse().unwrap_or(0);
        match renumber.get(&old) {
            Some(new) => format!("${}", new),
            None => caps[0].to_string(),
        }
    });
    let params = order.iter().map(|old| slots[old - 1].value.clone()).collect();
    Ok((rewritten.into_owned(), params))
}

/// Prompt the model and turn its answer into a bound (not yet validated)
/// candidate.
pub async fn generate_candidate(
    backend: &dyn LlmBackend,
    question: &str,
    context: &SynthesisContext,
) -> Result<SqlCandidate> {
    let raw = backend.complete(&build_prompt(question, context)).await?;
    let sql = clean_sql_output(&raw);
    if sql.is_empty() {
        return Err(NlqError::Llm("LLM returned no SQL".to_string()));
    }
    if contains_string_literal(&sql) {
        return Err(NlqError::UnsafeQuery("LLM output inlines string literals".to_string()));
    }
    let (sql, params) = bind_slots(&sql, &context.slots)?;
    Ok(SqlCandidate::new(sql, params, Provenance::Llm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn slots() -> Vec<LiteralSlot> {
        let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        vec![
            LiteralSlot {
                value: SqlValue::Timestamp(start),
                description: "start".to_string(),
            },
            LiteralSlot {
                value: SqlValue::Timestamp(end),
                description: "end".to_string(),
            },
            LiteralSlot {
                value: SqlValue::Text("female".to_string()),
                description: "rider gender".to_string(),
            },
        ]
    }

    #[test]
    fn test_clean_strips_fences_and_semicolon() {
        assert_eq!(
            clean_sql_output("```sql\nSELECT COUNT(*) FROM trips;\n```"),
            "SELECT COUNT(*) FROM trips"
        );
    }

    #[test]
    fn test_clean_strips_preamble_and_commentary() {
        let raw = "Here is the query:\nSELECT SUM(trips.trip_distance_km)\nFROM trips\nNote: this sums all distances.";
        assert_eq!(clean_sql_output(raw), "SELECT SUM(trips.trip_distance_km)\nFROM trips");
    }

    #[test]
    fn test_clean_keeps_extra_statements_for_validation() {
        let cleaned = clean_sql_output("SELECT 1 FROM trips; DROP TABLE trips;");
        assert_eq!(cleaned, "SELECT 1 FROM trips; DROP TABLE trips");
    }

    #[test]
    fn test_bind_slots_renumbers_by_first_use() {
        let (sql, params) = bind_slots(
            "SELECT COUNT(*) FROM trips WHERE trips.rider_gender = $3 AND trips.started_at >= $1",
            &slots(),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM trips WHERE trips.rider_gender = $1 AND trips.started_at >= $2"
        );
        assert_eq!(params[0], SqlValue::Text("female".to_string()));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_bind_slots_rejects_unknown_placeholder() {
        assert!(bind_slots("SELECT COUNT(*) FROM trips WHERE trip_id = $7", &slots()).is_err());
        assert!(bind_slots("SELECT COUNT(*) FROM trips WHERE trip_id = $0", &slots()).is_err());
    }

    #[test]
    fn test_prompt_lists_values_by_placeholder() {
        let context = SynthesisContext {
            schema: "DATABASE SCHEMA:".to_string(),
            matches: "No semantic matches found".to_string(),
            slots: slots(),
        };
        let prompt = build_prompt("How far did women ride?", &context);
        assert!(prompt.contains("$3 = 'female' (rider gender)"));
        assert!(prompt.contains("Question: How far did women ride?"));
    }
}
