//! Metadata sources
//!
//! Where the catalog gets its raw table/column/foreign-key tuples from.

use crate::catalog::snapshot::{ColumnDescriptor, ColumnRef, ForeignKey};
use crate::db::DbPool;
use crate::error::{NlqError, Result};
use async_trait::async_trait;
use sqlx::Row;
use tracing::debug;

/// Raw introspection output, before it is assembled into a snapshot
#[derive(Debug, Clone, Default)]
pub struct RawSchema {
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Enumerate columns and foreign keys. Any failure is reported as
    /// `SchemaUnavailable`.
    async fn introspect(&self) -> Result<RawSchema>;
}

/// Introspects the `public` schema of a PostgreSQL database
pub struct PgMetadataSource {
    pool: DbPool,
    schema: String,
}

impl PgMetadataSource {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            schema: "public".to_string(),
        }
    }

    // information_schema columns are domain types; cast to text so they decode as String
    async fn load_columns(&self) -> Result<Vec<ColumnDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT c.table_name::text AS table_name,
                   c.column_name::text AS column_name,
                   c.data_type::text AS data_type,
                   c.is_nullable::text AS is_nullable
            FROM information_schema.columns c
            JOIN information_schema.tables t
              ON t.table_schema = c.table_schema AND t.table_name = c.table_name
            WHERE c.table_schema = $1
            ORDER BY c.table_name, c.ordinal_position
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NlqError::SchemaUnavailable(format!("Failed to load columns: {}", e)))?;

        rows.into_iter()
            .map(|row| {
                let is_nullable: String = row.try_get("is_nullable").map_err(decode_error)?;
                Ok(ColumnDescriptor {
                    table: row.try_get("table_name").map_err(decode_error)?,
                    name: row.try_get("column_name").map_err(decode_error)?,
                    data_type: row.try_get("data_type").map_err(decode_error)?,
                    nullable: is_nullable == "YES",
                    references: None,
                })
            })
            .collect()
    }

    async fn load_foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let rows = sqlx::query(
            r#"
            SELECT
                tc.table_name::text AS source_table,
                kcu.column_name::text AS source_column,
                ccu.table_name::text AS target_table,
                ccu.column_name::text AS target_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
               AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
               AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = $1
            ORDER BY tc.table_name, kcu.column_name
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NlqError::SchemaUnavailable(format!("Failed to load foreign keys: {}", e)))?;

        rows.into_iter()
            .map(|row| {
                Ok(ForeignKey {
                    from: ColumnRef::new(
                        row.try_get::<String, _>("source_table").map_err(decode_error)?,
                        row.try_get::<String, _>("source_column").map_err(decode_error)?,
                    ),
                    to: ColumnRef::new(
                        row.try_get::<String, _>("target_table").map_err(decode_error)?,
                        row.try_get::<String, _>("target_column").map_err(decode_error)?,
                    ),
                })
            })
            .collect()
    }
}

fn decode_error(e: sqlx::Error) -> NlqError {
    NlqError::SchemaUnavailable(format!("Unexpected metadata row shape: {}", e))
}

#[async_trait]
impl MetadataSource for PgMetadataSource {
    async fn introspect(&self) -> Result<RawSchema> {
        let columns = self.load_columns().await?;
        let foreign_keys = self.load_foreign_keys().await?;
        debug!(
            "Introspected {} columns and {} foreign keys from schema '{}'",
            columns.len(),
            foreign_keys.len(),
            self.schema
        );
        Ok(RawSchema { columns, foreign_keys })
    }
}
