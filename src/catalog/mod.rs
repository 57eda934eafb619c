//! Schema Catalog
//!
//! Introspects and caches table/column/foreign-key metadata. The cached
//! snapshot is an `Arc<SchemaSnapshot>` that is swapped wholesale on refresh,
//! so readers always see either the old or the new complete schema.
//!
//! Refreshes are serialized by an async mutex: callers that find the cache
//! stale queue on the guard and re-check once they acquire it, so a burst of
//! requests after TTL expiry issues exactly one introspection. Waiters reuse
//! the outcome of an attempt that finished while they queued, failed or not.

pub mod snapshot;
pub mod source;

pub use snapshot::{ColumnDescriptor, ColumnRef, DataKind, ForeignKey, ForeignKeyGraph, SchemaSnapshot};
pub use source::{MetadataSource, PgMetadataSource, RawSchema};

use crate::error::{NlqError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Default)]
struct CatalogState {
    snapshot: Option<Arc<SchemaSnapshot>>,
    /// None once invalidated; the snapshot itself is kept as a stale fallback
    refreshed_at: Option<Instant>,
    /// Completed introspection attempts, successful or not
    attempts: u64,
    /// Reason the most recent attempt failed
    last_failure: Option<String>,
}

pub struct SchemaCatalog {
    source: Arc<dyn MetadataSource>,
    ttl: Duration,
    state: RwLock<CatalogState>,
    refresh_guard: Mutex<()>,
    next_version: AtomicU64,
}

impl SchemaCatalog {
    pub fn new(source: Arc<dyn MetadataSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: RwLock::new(CatalogState::default()),
            refresh_guard: Mutex::new(()),
            next_version: AtomicU64::new(1),
        }
    }

    /// Current snapshot, introspecting the database on a cache miss.
    ///
    /// If introspection fails and an earlier snapshot exists, the stale
    /// snapshot is served; otherwise the call fails with `SchemaUnavailable`.
    pub async fn get_snapshot(&self) -> Result<Arc<SchemaSnapshot>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }
        let seen_attempts = self.read_state().attempts;

        let _guard = self.refresh_guard.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }
        // ...or finished an attempt we can share instead of retrying
        let finished_while_waiting = {
            let state = self.read_state();
            (state.attempts != seen_attempts).then(|| state.last_failure.clone())
        };
        match finished_while_waiting {
            Some(Some(reason)) => return self.stale_or_unavailable(reason),
            Some(None) => {
                if let Some(snapshot) = self.cached() {
                    return Ok(snapshot);
                }
            }
            None => {}
        }

        let outcome = self.source.introspect().await.map_err(|e| match e {
            NlqError::SchemaUnavailable(msg) => msg,
            other => other.to_string(),
        });
        {
            let mut state = self.write_state();
            state.attempts += 1;
            state.last_failure = outcome.as_ref().err().cloned();
        }

        match outcome {
            Ok(raw) => {
                let version = self.next_version.fetch_add(1, Ordering::SeqCst);
                let snapshot = Arc::new(SchemaSnapshot::build(version, raw.columns, raw.foreign_keys));
                {
                    let mut state = self.write_state();
                    state.snapshot = Some(Arc::clone(&snapshot));
                    state.refreshed_at = Some(Instant::now());
                }
                info!(
                    "Schema snapshot v{} loaded: {} tables, {} columns, {} foreign keys",
                    version,
                    snapshot.table_names().count(),
                    snapshot.columns().len(),
                    snapshot.foreign_keys().edges().len()
                );
                Ok(snapshot)
            }
            Err(reason) => self.stale_or_unavailable(reason),
        }
    }

    fn stale_or_unavailable(&self, reason: String) -> Result<Arc<SchemaSnapshot>> {
        match self.cached() {
            Some(stale) => {
                warn!(
                    "Schema introspection failed, serving stale snapshot v{}: {}",
                    stale.version(),
                    reason
                );
                Ok(stale)
            }
            None => Err(NlqError::SchemaUnavailable(reason)),
        }
    }

    /// Force the next `get_snapshot` to re-introspect.
    pub fn invalidate(&self) {
        self.write_state().refreshed_at = None;
        info!("Schema cache invalidated");
    }

    /// Last loaded snapshot regardless of freshness
    pub fn cached(&self) -> Option<Arc<SchemaSnapshot>> {
        self.read_state().snapshot.clone()
    }

    fn fresh_snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        let state = self.read_state();
        match (&state.snapshot, state.refreshed_at) {
            (Some(snapshot), Some(at)) if at.elapsed() < self.ttl => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
