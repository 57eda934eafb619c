//! SQL candidates
//!
//! A candidate is generated SQL with `$n` placeholders and the values bound to
//! them. Candidates are untrusted until `SqlValidator` turns them into a
//! `ValidatedCandidate`.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value bound to a placeholder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Bool(bool),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(s) => write!(f, "'{}'", s),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Date(d) => write!(f, "{}", d),
            SqlValue::Timestamp(ts) => write!(f, "{}", ts),
            SqlValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Which generation path produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    #[serde(rename = "llm")]
    Llm,
    #[serde(rename = "rule-based")]
    RuleBased,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Llm => "llm",
            Provenance::RuleBased => "rule-based",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlCandidate {
    pub sql: String,
    /// `params[i]` binds `$(i + 1)`
    pub params: Vec<SqlValue>,
    pub provenance: Provenance,
}

impl SqlCandidate {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>, provenance: Provenance) -> Self {
        Self {
            sql: sql.into(),
            params,
            provenance,
        }
    }
}
