//! Query Result - result shape handed back to the caller
//!
//! Rows keep the column order of the SELECT list. A single row with a single
//! column collapses to a scalar.

use itertools::Itertools;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use serde_json::Value;

/// Maximum rows rendered in the text answer
const DISPLAY_ROWS: usize = 10;

/// One result row: column name -> value, in SELECT order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn into_single_value(self) -> Option<Value> {
        let mut columns = self.columns;
        if columns.len() == 1 {
            columns.pop().map(|(_, v)| v)
        } else {
            None
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct RowVisitor;

impl<'de> Visitor<'de> for RowVisitor {
    type Value = Row;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
        let mut columns = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, value)) = access.next_entry::<String, Value>()? {
            columns.push((name, value));
        }
        Ok(Row { columns })
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RowVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Scalar(Value),
    Rows(Vec<Row>),
    /// Serialized as `null`
    Empty,
}

impl QueryResult {
    /// Shape rows: none -> Empty, one row with one column -> Scalar,
    /// anything else -> Rows.
    pub fn from_rows(mut rows: Vec<Row>) -> Self {
        match rows.len() {
            0 => QueryResult::Empty,
            1 if rows[0].len() == 1 => match rows.pop().and_then(Row::into_single_value) {
                Some(value) => QueryResult::Scalar(value),
                None => QueryResult::Empty,
            },
            _ => QueryResult::Rows(rows),
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            QueryResult::Scalar(_) => 1,
            QueryResult::Rows(rows) => rows.len(),
            QueryResult::Empty => 0,
        }
    }
}

/// Display form of one value; non-integral numbers get two decimals
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => format!("{:.2}", f),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn format_row(row: &Row, separator: &str) -> String {
    row.columns()
        .map(|(name, value)| format!("{}: {}", name, format_value(value)))
        .join(separator)
}

/// Plain-text answer for a result
pub fn format_answer(result: &QueryResult) -> String {
    const NO_DATA: &str = "No data available for your query.";
    match result {
        QueryResult::Empty | QueryResult::Scalar(Value::Null) => NO_DATA.to_string(),
        QueryResult::Scalar(value) => format_value(value),
        QueryResult::Rows(rows) if rows.len() == 1 => format_row(&rows[0], ", "),
        QueryResult::Rows(rows) => {
            let mut lines: Vec<String> = rows.iter().take(DISPLAY_ROWS).map(|r| format_row(r, " | ")).collect();
            if rows.len() > DISPLAY_ROWS {
                lines.push(format!("... and {} more rows", rows.len() - DISPLAY_ROWS));
            }
            lines.join("\n")
        }
    }
}
