//! Semantic Matcher
//!
//! Maps free-text terms from a question onto catalog columns. The primary
//! path scores terms against cached column embeddings; when the embedding
//! backend is missing or fails, a token-overlap keyword scorer takes over
//! with the same top-k / threshold contract. Only `MatchSet::source` tells
//! the two apart.

pub mod embedder;
pub mod labels;
pub mod terms;
pub mod vector_index;

pub use embedder::{Embedding, EmbeddingBackend, OpenAiEmbedder};
pub use labels::{column_label, describe_column, keyword_score, tokenize};
pub use terms::extract_terms;
pub use vector_index::{cosine_similarity, ColumnIndex, ColumnIndexCache};

use crate::catalog::{ColumnDescriptor, SchemaSnapshot};
use crate::error::Result;
use itertools::Itertools;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which scoring path produced a match set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Embedding,
    Keyword,
}

/// A scored association between a user term and a catalog column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticMatch {
    pub term: String,
    pub column: ColumnDescriptor,
    /// Similarity in [0, 1]
    pub score: f64,
}

/// Matches for every requested term, best first, in term order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSet {
    pub source: MatchSource,
    terms: Vec<(String, Vec<SemanticMatch>)>,
}

impl MatchSet {
    pub fn new(source: MatchSource, terms: Vec<(String, Vec<SemanticMatch>)>) -> Self {
        Self { source, terms }
    }

    pub fn empty(source: MatchSource) -> Self {
        Self {
            source,
            terms: Vec::new(),
        }
    }

    /// Matches for one term (empty if the term was not requested or nothing scored)
    pub fn get(&self, term: &str) -> &[SemanticMatch] {
        self.terms
            .iter()
            .find(|(t, _)| t == term)
            .map(|(_, matches)| matches.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SemanticMatch])> {
        self.terms.iter().map(|(t, m)| (t.as_str(), m.as_slice()))
    }

    pub fn all_empty(&self) -> bool {
        self.terms.iter().all(|(_, matches)| matches.is_empty())
    }

    /// Best score any term gave this column
    pub fn score_for(&self, table: &str, column: &str) -> Option<f64> {
        self.terms
            .iter()
            .flat_map(|(_, matches)| matches.iter())
            .filter(|m| m.column.table == table && m.column.name == column)
            .map(|m| m.score)
            .fold(None, |best, s| Some(best.map_or(s, |b: f64| b.max(s))))
    }

    /// Tables of the best match of every term except `excluding`
    pub fn implicated_tables(&self, excluding: &str) -> BTreeSet<&str> {
        self.terms
            .iter()
            .filter(|(t, _)| t != excluding)
            .filter_map(|(_, matches)| matches.first())
            .map(|m| m.column.table.as_str())
            .collect()
    }

    /// Prompt section listing the matches, one line per matched term
    pub fn context_text(&self) -> String {
        let lines: Vec<String> = self
            .terms
            .iter()
            .filter(|(_, matches)| !matches.is_empty())
            .map(|(term, matches)| {
                let targets = matches
                    .iter()
                    .map(|m| format!("{} (score: {:.2})", m.column.qualified_name(), m.score))
                    .join(", ");
                format!("'{}' -> {}", term, targets)
            })
            .collect();

        if lines.is_empty() {
            "No semantic matches found".to_string()
        } else {
            lines.join("\n")
        }
    }
}

pub struct SemanticMatcher {
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    index_cache: ColumnIndexCache,
}

impl SemanticMatcher {
    pub fn new(embedder: Option<Arc<dyn EmbeddingBackend>>) -> Self {
        Self {
            embedder,
            index_cache: ColumnIndexCache::new(),
        }
    }

    /// Keyword scoring only
    pub fn keyword_only() -> Self {
        Self::new(None)
    }

    /// Score every term against the snapshot's columns, keeping the `top_k`
    /// best with score >= `threshold`. Never fails: embedding errors switch
    /// the whole request to keyword scoring.
    pub async fn match_terms(
        &self,
        snapshot: &SchemaSnapshot,
        terms: &[String],
        top_k: usize,
        threshold: f64,
    ) -> MatchSet {
        if terms.is_empty() {
            let source = if self.embedder.is_some() {
                MatchSource::Embedding
            } else {
                MatchSource::Keyword
            };
            return MatchSet::empty(source);
        }

        if let Some(embedder) = &self.embedder {
            match self.embedding_matches(snapshot, embedder.as_ref(), terms, top_k, threshold).await {
                Ok(set) => {
                    debug!("Matched {} terms via embeddings", terms.len());
                    return set;
                }
                Err(e) => warn!("Embedding backend unavailable, using keyword matching: {}", e),
            }
        }

        debug!("Matched {} terms via keyword overlap", terms.len());
        keyword_matches(snapshot, terms, top_k, threshold)
    }

    async fn embedding_matches(
        &self,
        snapshot: &SchemaSnapshot,
        embedder: &dyn EmbeddingBackend,
        terms: &[String],
        top_k: usize,
        threshold: f64,
    ) -> Result<MatchSet> {
        let index = self.index_cache.get_or_build(snapshot, embedder).await?;

        let mut results = Vec::with_capacity(terms.len());
        for term in terms {
            let query = embedder.embed(&tokenize(term).join(" ")).await?;
            let scored = index
                .score_all(&query)?
                .into_iter()
                .map(|(column, score)| (column.clone(), score))
                .collect();
            results.push((term.clone(), rank(term, scored, top_k, threshold)));
        }

        Ok(MatchSet {
            source: MatchSource::Embedding,
            terms: results,
        })
    }
}

fn keyword_matches(snapshot: &SchemaSnapshot, terms: &[String], top_k: usize, threshold: f64) -> MatchSet {
    let results = terms
        .iter()
        .map(|term| {
            let scored = snapshot
                .columns()
                .iter()
                .map(|column| {
                    let label = column_label(&column.name);
                    let qualified = format!("{} {}", column_label(&column.table), label);
                    let score = keyword_score(term, &label).max(keyword_score(term, &qualified));
                    (column.clone(), score)
                })
                .collect();
            (term.clone(), rank(term, scored, top_k, threshold))
        })
        .collect();

    MatchSet {
        source: MatchSource::Keyword,
        terms: results,
    }
}

/// Filter by threshold and order deterministically: score descending, then
/// shorter column name, then `table.column` lexical order.
fn rank(term: &str, scored: Vec<(ColumnDescriptor, f64)>, top_k: usize, threshold: f64) -> Vec<SemanticMatch> {
    let mut kept: Vec<(ColumnDescriptor, f64)> = scored
        .into_iter()
        .map(|(column, score)| (column, score.clamp(0.0, 1.0)))
        .filter(|(_, score)| *score > 0.0 && *score >= threshold)
        .collect();

    kept.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.len().cmp(&b.name.len()))
            .then_with(|| a.qualified_name().cmp(&b.qualified_name()))
    });
    kept.truncate(top_k);

    kept.into_iter()
        .map(|(column, score)| SemanticMatch {
            term: term.to_string(),
            column,
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::snapshot::fixtures::bike_share_snapshot;
    use crate::error::NlqError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// One axis per concept word, plus a small constant so no vector is zero
    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    const AXES: &[&str] = &["distance", "station", "gender", "precipitation"];

    #[async_trait]
    impl EmbeddingBackend for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let lower = text.to_lowercase();
            let mut v: Embedding = AXES.iter().map(|axis| lower.matches(axis).count() as f32).collect();
            v.push(0.01);
            Ok(v)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingBackend for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Err(NlqError::Embedding("model not loaded".to_string()))
        }
    }

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_identical_label_is_top_match() {
        let snapshot = bike_share_snapshot(1);
        let matcher = SemanticMatcher::keyword_only();

        for column in snapshot.columns() {
            let label = column_label(&column.name);
            let set = matcher.match_terms(&snapshot, &[label.clone()], 3, 0.3).await;
            let top = &set.get(&label)[0];
            assert_eq!(top.score, 1.0, "label {}", label);
            assert_eq!(top.column.name, column.name, "label {}", label);
        }
    }

    #[tokio::test]
    async fn test_embedding_path_ranks_by_similarity() {
        let snapshot = bike_share_snapshot(1);
        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let matcher = SemanticMatcher::new(Some(embedder));

        let set = matcher.match_terms(&snapshot, &terms(&["distance"]), 3, 0.3).await;
        assert_eq!(set.source, MatchSource::Embedding);
        let matches = set.get("distance");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].column.qualified_name(), "trips.trip_distance_km");
        assert!(matches[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_embeddings_cached_per_snapshot_version() {
        let snapshot = bike_share_snapshot(1);
        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let matcher = SemanticMatcher::new(Some(embedder.clone()));
        let columns = snapshot.columns().len();

        matcher.match_terms(&snapshot, &terms(&["station"]), 3, 0.3).await;
        matcher.match_terms(&snapshot, &terms(&["gender"]), 3, 0.3).await;
        // columns embedded once, plus one embed per term
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), columns + 2);

        matcher.match_terms(&bike_share_snapshot(2), &terms(&["gender"]), 3, 0.3).await;
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 2 * columns + 3);
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back_deterministically() {
        let snapshot = bike_share_snapshot(1);
        let matcher = SemanticMatcher::new(Some(Arc::new(FailingEmbedder)));
        let question_terms = terms(&["station name", "kilometres", "precipitation"]);

        let first = matcher.match_terms(&snapshot, &question_terms, 3, 0.3).await;
        let second = matcher.match_terms(&snapshot, &question_terms, 3, 0.3).await;

        assert_eq!(first.source, MatchSource::Keyword);
        assert_eq!(first, second);
        assert_eq!(first.get("station name")[0].column.qualified_name(), "stations.station_name");
        assert_eq!(first.get("kilometres")[0].column.qualified_name(), "trips.trip_distance_km");
        assert_eq!(
            first.get("precipitation")[0].column.qualified_name(),
            "daily_weather.precipitation_mm"
        );
    }

    #[tokio::test]
    async fn test_top_k_threshold_and_tie_order() {
        let snapshot = bike_share_snapshot(1);
        let matcher = SemanticMatcher::keyword_only();

        let set = matcher.match_terms(&snapshot, &terms(&["station"]), 2, 0.3).await;
        let matches = set.get("station");
        assert_eq!(matches.len(), 2);
        assert!(matches[0].score >= matches[1].score);
        assert!(matches.iter().all(|m| m.score >= 0.3));

        let none = matcher.match_terms(&snapshot, &terms(&["zebra"]), 3, 0.3).await;
        assert!(none.all_empty());
        assert_eq!(none.context_text(), "No semantic matches found");
    }

    #[tokio::test]
    async fn test_empty_terms_yield_empty_result() {
        let snapshot = bike_share_snapshot(1);
        let matcher = SemanticMatcher::new(Some(Arc::new(FailingEmbedder)));
        let set = matcher.match_terms(&snapshot, &[], 3, 0.3).await;
        assert!(set.all_empty());
        assert_eq!(set.iter().count(), 0);
    }

    #[tokio::test]
    async fn test_context_text_lists_scores() {
        let snapshot = bike_share_snapshot(1);
        let matcher = SemanticMatcher::keyword_only();
        let set = matcher.match_terms(&snapshot, &terms(&["station name"]), 1, 0.3).await;
        assert_eq!(set.context_text(), "'station name' -> stations.station_name (score: 1.00)");
    }
}
