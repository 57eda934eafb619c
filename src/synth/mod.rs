//! Query Synthesizer
//!
//! Produces a validated SQL candidate for a question. The LLM path runs first
//! when a backend is configured; any LLM error, timeout or validation failure
//! falls back to the rule engine. Both paths pass through the same injected
//! `SqlValidator`.

pub mod builder;
pub mod candidate;
pub mod context;
pub mod literals;
pub mod llm;
pub mod resolve;
pub mod rules;

pub use candidate::{Provenance, SqlCandidate, SqlValue};
pub use context::SynthesisContext;
pub use literals::QuestionLiterals;
pub use llm::{LlmBackend, OpenAiCompatClient};
pub use rules::QueryShape;

use crate::catalog::SchemaSnapshot;
use crate::error::{NlqError, Result};
use crate::semantic::MatchSet;
use crate::validation::{SqlValidator, ValidatedCandidate};
use resolve::SlotResolver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct QuerySynthesizer {
    llm: Option<Arc<dyn LlmBackend>>,
    validator: SqlValidator,
    llm_timeout: Duration,
    schema_budget: usize,
}

impl QuerySynthesizer {
    pub fn new(
        llm: Option<Arc<dyn LlmBackend>>,
        validator: SqlValidator,
        llm_timeout: Duration,
        schema_budget: usize,
    ) -> Self {
        Self {
            llm,
            validator,
            llm_timeout,
            schema_budget,
        }
    }

    /// Generate and validate a candidate, or fail with `Synthesis`.
    pub async fn synthesize(
        &self,
        question: &str,
        snapshot: &SchemaSnapshot,
        matches: &MatchSet,
    ) -> Result<ValidatedCandidate> {
        let literals = QuestionLiterals::extract(question);
        let resolver = SlotResolver::new(snapshot, matches);
        let shape = resolver
            .as_ref()
            .ok()
            .and_then(|r| QueryShape::detect(question, &literals, r, matches));

        if matches.all_empty() && shape.is_none() {
            return Err(NlqError::Synthesis("no schema elements match the question".to_string()));
        }

        if let Some(backend) = &self.llm {
            match self.try_llm(backend.as_ref(), question, snapshot, matches, &literals).await {
                Ok(validated) => {
                    info!("Synthesized SQL via LLM ({} params)", validated.params().len());
                    return Ok(validated);
                }
                Err(reason) => warn!("LLM path failed, falling back to rules: {}", reason),
            }
        }

        let resolver = resolver?;
        let shape = shape.ok_or_else(|| {
            NlqError::Synthesis("the question does not match any supported query pattern".to_string())
        })?;
        debug!("Rule engine matched {:?}", shape);

        let candidate = shape.render(question, &literals, &resolver)?;
        let validated = self.validator.validate(candidate, snapshot).map_err(|e| match e {
            NlqError::UnsafeQuery(msg) => NlqError::Synthesis(format!("rule template rejected: {}", msg)),
            other => other,
        })?;
        info!("Synthesized SQL via rules ({} params)", validated.params().len());
        Ok(validated)
    }

    async fn try_llm(
        &self,
        backend: &dyn LlmBackend,
        question: &str,
        snapshot: &SchemaSnapshot,
        matches: &MatchSet,
        literals: &QuestionLiterals,
    ) -> Result<ValidatedCandidate> {
        let context = SynthesisContext::build(snapshot, matches, literals.slots(), self.schema_budget);
        let candidate = tokio::time::timeout(self.llm_timeout, llm::generate_candidate(backend, question, &context))
            .await
            .map_err(|_| NlqError::Llm(format!("LLM call timed out after {:?}", self.llm_timeout)))??;
        debug!("LLM candidate: {}", candidate.sql);
        self.validator.validate(candidate, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::snapshot::fixtures::bike_share_snapshot;
    use crate::semantic::{extract_terms, SemanticMatcher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedLlm {
        reply: std::result::Result<String, String>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn replying(sql: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(sql.to_string()),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map_err(NlqError::Llm)
        }
    }

    async fn synthesize(llm: Option<Arc<ScriptedLlm>>, question: &str) -> Result<ValidatedCandidate> {
        let snapshot = bike_share_snapshot(1);
        let matches = SemanticMatcher::keyword_only()
            .match_terms(&snapshot, &extract_terms(question), 3, 0.3)
            .await;
        let llm = llm.map(|l| l as Arc<dyn LlmBackend>);
        let synth = QuerySynthesizer::new(llm, SqlValidator::new(), Duration::from_secs(10), 6000);
        synth.synthesize(question, &snapshot, &matches).await
    }

    const SCENARIO_C: &str = "How many kilometres were ridden by women on rainy days in June 2025?";

    #[tokio::test]
    async fn test_rule_path_without_llm() {
        let validated = synthesize(None, SCENARIO_C).await.unwrap();
        assert_eq!(validated.provenance(), Provenance::RuleBased);
        assert!(validated.sql().contains("SUM(trips.trip_distance_km)"));
    }

    #[tokio::test]
    async fn test_llm_candidate_is_validated_and_bound() {
        let llm = ScriptedLlm::replying(
            "```sql\nSELECT SUM(trips.trip_distance_km) FROM trips \
             WHERE trips.rider_gender = $3 AND trips.started_at >= $1 AND trips.started_at < $2;\n```",
        );
        let validated = synthesize(Some(llm.clone()), SCENARIO_C).await.unwrap();

        assert_eq!(validated.provenance(), Provenance::Llm);
        assert!(validated.sql().contains("trips.rider_gender = $1"));
        assert_eq!(validated.params()[0], SqlValue::Text("female".to_string()));
        assert_eq!(validated.params().len(), 3);
        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("'women' -> trips.rider_gender"));
    }

    #[tokio::test]
    async fn test_mutation_falls_back_to_rules() {
        let llm = ScriptedLlm::replying("DROP TABLE trips");
        let validated = synthesize(Some(llm.clone()), SCENARIO_C).await.unwrap();
        assert_eq!(validated.provenance(), Provenance::RuleBased);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inlined_literal_falls_back_to_rules() {
        let llm = ScriptedLlm::replying("SELECT SUM(trip_distance_km) FROM trips WHERE rider_gender = 'female'");
        let validated = synthesize(Some(llm), SCENARIO_C).await.unwrap();
        assert_eq!(validated.provenance(), Provenance::RuleBased);
    }

    #[tokio::test]
    async fn test_unknown_column_falls_back_to_rules() {
        let llm = ScriptedLlm::replying("SELECT SUM(trips.distance) FROM trips");
        let validated = synthesize(Some(llm), SCENARIO_C).await.unwrap();
        assert_eq!(validated.provenance(), Provenance::RuleBased);
    }

    #[tokio::test]
    async fn test_llm_error_falls_back_to_rules() {
        let llm = Arc::new(ScriptedLlm {
            reply: Err("rate limited".to_string()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let validated = synthesize(Some(llm), SCENARIO_C).await.unwrap();
        assert_eq!(validated.provenance(), Provenance::RuleBased);
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_timeout_falls_back_to_rules() {
        let llm = Arc::new(ScriptedLlm {
            reply: Ok("SELECT COUNT(*) FROM trips".to_string()),
            delay: Duration::from_secs(60),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let validated = synthesize(Some(llm), SCENARIO_C).await.unwrap();
        assert_eq!(validated.provenance(), Provenance::RuleBased);
    }

    #[tokio::test]
    async fn test_unmatched_question_fails_without_calling_llm() {
        let llm = ScriptedLlm::replying("SELECT COUNT(*) FROM trips");
        let err = synthesize(Some(llm.clone()), "Tell me a joke").await.unwrap_err();
        assert!(matches!(err, NlqError::Synthesis(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_rule_and_bad_llm_is_synthesis_error() {
        let llm = ScriptedLlm::replying("DELETE FROM trips");
        // "stations" matches the catalog but no rule shape applies
        let err = synthesize(Some(llm), "Describe the stations").await.unwrap_err();
        assert!(matches!(err, NlqError::Synthesis(_)));
    }
}
