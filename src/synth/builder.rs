//! SELECT builder
//!
//! Assembles template SQL clause by clause. Every value goes through
//! `bind`, which records it and hands back the next `$n` placeholder, so
//! placeholder count and parameter count cannot drift apart.

use crate::synth::candidate::{Provenance, SqlCandidate, SqlValue};

#[derive(Debug, Clone, Default)]
pub struct SelectBuilder {
    projection: Vec<String>,
    from: String,
    joins: Vec<String>,
    filters: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: Option<String>,
    params: Vec<SqlValue>,
}

impl SelectBuilder {
    pub fn new(from: &str) -> Self {
        Self {
            from: from.to_string(),
            ..Default::default()
        }
    }

    /// Record a value and return its placeholder
    pub fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    pub fn select(&mut self, expr: impl Into<String>) -> &mut Self {
        self.projection.push(expr.into());
        self
    }

    /// Inner join; joining the same table twice is a no-op
    pub fn join(&mut self, table: &str, on: impl Into<String>) -> &mut Self {
        let clause = format!("JOIN {} ON {}", table, on.into());
        let prefix = format!("JOIN {} ON", table);
        if !self.joins.iter().any(|j| j.starts_with(&prefix)) && table != self.from {
            self.joins.push(clause);
        }
        self
    }

    pub fn has_join(&self, table: &str) -> bool {
        table == self.from || self.joins.iter().any(|j| j.starts_with(&format!("JOIN {} ON", table)))
    }

    pub fn filter(&mut self, condition: impl Into<String>) -> &mut Self {
        self.filters.push(condition.into());
        self
    }

    pub fn group_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.group_by.push(expr.into());
        self
    }

    pub fn order_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn limit(&mut self, expr: impl Into<String>) -> &mut Self {
        self.limit = Some(expr.into());
        self
    }

    pub fn to_sql(&self) -> String {
        let mut lines = vec![
            format!("SELECT {}", self.projection.join(", ")),
            format!("FROM {}", self.from),
        ];
        lines.extend(self.joins.iter().cloned());
        if !self.filters.is_empty() {
            lines.push(format!("WHERE {}", self.filters.join("\n  AND ")));
        }
        if !self.group_by.is_empty() {
            lines.push(format!("GROUP BY {}", self.group_by.join(", ")));
        }
        if !self.order_by.is_empty() {
            lines.push(format!("ORDER BY {}", self.order_by.join(", ")));
        }
        if let Some(limit) = &self.limit {
            lines.push(format!("LIMIT {}", limit));
        }
        lines.join("\n")
    }

    pub fn build(self, provenance: Provenance) -> SqlCandidate {
        let sql = self.to_sql();
        SqlCandidate::new(sql, self.params, provenance)
    }
}
