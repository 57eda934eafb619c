//! Column Vector Index
//!
//! In-memory index of column embeddings, built once per schema snapshot
//! version and replaced wholesale when the schema changes.

use crate::catalog::{ColumnDescriptor, SchemaSnapshot};
use crate::error::{NlqError, Result};
use crate::semantic::embedder::{Embedding, EmbeddingBackend};
use crate::semantic::labels::describe_column;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One embedded column
#[derive(Debug, Clone)]
pub struct IndexedColumn {
    pub column: ColumnDescriptor,
    /// Text that was embedded
    pub text: String,
    pub embedding: Embedding,
}

/// Embeddings for every column of one snapshot version
#[derive(Debug)]
pub struct ColumnIndex {
    snapshot_version: u64,
    dimension: usize,
    entries: Vec<IndexedColumn>,
}

impl ColumnIndex {
    /// Embed every column of the snapshot.
    pub async fn build(snapshot: &SchemaSnapshot, embedder: &dyn EmbeddingBackend) -> Result<Self> {
        let mut entries = Vec::with_capacity(snapshot.columns().len());
        let mut dimension = 0;

        for column in snapshot.columns() {
            let text = describe_column(column);
            let embedding = embedder.embed(&text).await?;
            if dimension == 0 {
                dimension = embedding.len();
            } else if embedding.len() != dimension {
                return Err(NlqError::Embedding(format!(
                    "Embedding dimension {} for {} doesn't match index dimension {}",
                    embedding.len(),
                    column.qualified_name(),
                    dimension
                )));
            }
            entries.push(IndexedColumn {
                column: column.clone(),
                text,
                embedding,
            });
        }

        Ok(Self {
            snapshot_version: snapshot.version(),
            dimension,
            entries,
        })
    }

    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cosine similarity of `query` against every column, clamped to [0, 1].
    /// Results are unordered; ranking is the caller's concern.
    pub fn score_all(&self, query: &Embedding) -> Result<Vec<(&ColumnDescriptor, f64)>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(NlqError::Embedding(format!(
                "Query embedding dimension {} doesn't match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        Ok(self
            .entries
            .iter()
            .map(|entry| {
                let score = cosine_similarity(query, &entry.embedding) as f64;
                (&entry.column, score.clamp(0.0, 1.0))
            })
            .collect())
    }
}

/// Caches the column index for the latest snapshot version
#[derive(Default)]
pub struct ColumnIndexCache {
    current: RwLock<Option<Arc<ColumnIndex>>>,
    build_guard: Mutex<()>,
}

impl ColumnIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `snapshot`, embedding its columns if the cached index
    /// belongs to a different version. A failed build leaves the previous
    /// index in place.
    pub async fn get_or_build(
        &self,
        snapshot: &SchemaSnapshot,
        embedder: &dyn EmbeddingBackend,
    ) -> Result<Arc<ColumnIndex>> {
        if let Some(index) = self.cached_for(snapshot.version()) {
            return Ok(index);
        }

        let _guard = self.build_guard.lock().await;
        if let Some(index) = self.cached_for(snapshot.version()) {
            return Ok(index);
        }

        debug!("Embedding {} columns for schema v{}", snapshot.columns().len(), snapshot.version());
        let index = Arc::new(ColumnIndex::build(snapshot, embedder).await?);
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&index));
        info!("Column embeddings cached for schema v{} ({} columns)", index.snapshot_version(), index.len());
        Ok(index)
    }

    fn cached_for(&self, version: u64) -> Option<Arc<ColumnIndex>> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .filter(|index| index.snapshot_version() == version)
            .cloned()
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
