//! Schema Snapshot
//!
//! Immutable description of tables, columns and foreign keys as introspected at
//! one point in time. A snapshot is never mutated after construction; the
//! catalog swaps in a whole new one on refresh.

use crate::error::{NlqError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// Reference to a column by table and column name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Coarse classification of a declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Numeric,
    Text,
    Date,
    Timestamp,
    Boolean,
    Other,
}

impl DataKind {
    /// Classify a PostgreSQL `information_schema` data type name.
    pub fn from_sql_type(data_type: &str) -> Self {
        let t = data_type.to_lowercase();
        if t.starts_with("timestamp") {
            DataKind::Timestamp
        } else if t == "date" {
            DataKind::Date
        } else if t == "boolean" || t == "bool" {
            DataKind::Boolean
        } else if t.contains("int")
            || t.contains("numeric")
            || t.contains("decimal")
            || t.contains("double")
            || t == "real"
            || t.starts_with("float")
        {
            DataKind::Numeric
        } else if t.contains("char") || t == "text" || t == "uuid" || t == "name" {
            DataKind::Text
        } else {
            DataKind::Other
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataKind::Date | DataKind::Timestamp)
    }
}

/// One column as seen by introspection. Identity is (table, column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// Target of a foreign key declared on this column
    pub references: Option<ColumnRef>,
}

impl ColumnDescriptor {
    pub fn column_ref(&self) -> ColumnRef {
        ColumnRef::new(&self.table, &self.name)
    }

    pub fn kind(&self) -> DataKind {
        DataKind::from_sql_type(&self.data_type)
    }

    /// `table.column`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }
}

/// Directed foreign key edge `from -> to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from: ColumnRef,
    pub to: ColumnRef,
}

/// Adjacency structure over foreign keys, keyed by table name
#[derive(Debug, Clone, Default)]
pub struct ForeignKeyGraph {
    edges: Vec<ForeignKey>,
    outgoing: HashMap<String, BTreeSet<String>>,
    incoming: HashMap<String, BTreeSet<String>>,
}

impl ForeignKeyGraph {
    pub fn new(edges: Vec<ForeignKey>) -> Self {
        let mut outgoing: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut incoming: HashMap<String, BTreeSet<String>> = HashMap::new();
        for edge in &edges {
            outgoing
                .entry(edge.from.table.clone())
                .or_default()
                .insert(edge.to.table.clone());
            incoming
                .entry(edge.to.table.clone())
                .or_default()
                .insert(edge.from.table.clone());
        }
        Self {
            edges,
            outgoing,
            incoming,
        }
    }

    pub fn edges(&self) -> &[ForeignKey] {
        &self.edges
    }

    /// Tables directly referenced by `table`
    pub fn targets_of(&self, table: &str) -> impl Iterator<Item = &String> {
        self.outgoing.get(table).into_iter().flatten()
    }

    /// Shortest chain of tables linking `from` to `to`, walking edges in
    /// either direction (a join can follow a key from either side).
    pub fn path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            let neighbours = self
                .outgoing
                .get(current)
                .into_iter()
                .flatten()
                .chain(self.incoming.get(current).into_iter().flatten());
            for next in neighbours {
                let next = next.as_str();
                if !visited.insert(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(&prev) = previous.get(cursor) {
                        path.push(prev.to_string());
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }

    pub fn is_connected(&self, a: &str, b: &str) -> bool {
        self.path(a, b).is_some()
    }
}

/// Complete, versioned schema description
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    version: u64,
    columns: Vec<ColumnDescriptor>,
    tables: BTreeMap<String, Vec<ColumnDescriptor>>,
    foreign_keys: ForeignKeyGraph,
}

impl SchemaSnapshot {
    /// Assemble a snapshot. Foreign keys are attached to their source
    /// columns; edges pointing at unknown tables are dropped.
    pub fn build(version: u64, mut columns: Vec<ColumnDescriptor>, foreign_keys: Vec<ForeignKey>) -> Self {
        let known: HashSet<ColumnRef> = columns.iter().map(|c| c.column_ref()).collect();
        let foreign_keys: Vec<ForeignKey> = foreign_keys
            .into_iter()
            .filter(|fk| known.contains(&fk.from) && known.contains(&fk.to))
            .collect();

        let by_source: HashMap<&ColumnRef, &ColumnRef> =
            foreign_keys.iter().map(|fk| (&fk.from, &fk.to)).collect();
        for column in &mut columns {
            if column.references.is_none() {
                column.references = by_source.get(&column.column_ref()).map(|to| (*to).clone());
            }
        }

        let mut tables: BTreeMap<String, Vec<ColumnDescriptor>> = BTreeMap::new();
        for column in &columns {
            tables.entry(column.table.clone()).or_default().push(column.clone());
        }

        Self {
            version,
            columns,
            tables,
            foreign_keys: ForeignKeyGraph::new(foreign_keys),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_columns(&self, table: &str) -> Option<&[ColumnDescriptor]> {
        self.tables.get(table).map(|v| v.as_slice())
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnDescriptor> {
        self.tables.get(table)?.iter().find(|c| c.name == column)
    }

    /// Catalog lookup that fails loudly on misreferences.
    pub fn lookup(&self, table: &str, column: &str) -> Result<&ColumnDescriptor> {
        self.column(table, column).ok_or_else(|| {
            NlqError::Synthesis(format!("Unknown column reference: {}.{}", table, column))
        })
    }

    /// Whether any table carries a column with this name
    pub fn has_column_named(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }

    pub fn foreign_keys(&self) -> &ForeignKeyGraph {
        &self.foreign_keys
    }

    /// `table.column` strings for every column, in snapshot order
    pub fn all_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.qualified_name()).collect()
    }

    /// Human-readable schema listing used for prompts and the schema dump.
    pub fn schema_text(&self) -> String {
        let tables: Vec<&str> = self.tables.keys().map(|t| t.as_str()).collect();
        self.schema_text_for(&tables)
    }

    /// Schema listing restricted to the given tables (foreign keys are
    /// listed when both ends are included).
    pub fn schema_text_for(&self, tables: &[&str]) -> String {
        let mut parts = vec!["DATABASE SCHEMA:".to_string()];

        for table in tables {
            let Some(columns) = self.tables.get(*table) else {
                continue;
            };
            parts.push(String::new());
            parts.push(format!("Table: {}", table));
            parts.push("Columns:".to_string());
            for column in columns {
                let nullable = if column.nullable { "NULL" } else { "NOT NULL" };
                parts.push(format!("  - {} ({}, {})", column.name, column.data_type, nullable));
            }
        }

        let included: HashSet<&str> = tables.iter().copied().collect();
        let relationships: Vec<String> = self
            .foreign_keys
            .edges()
            .iter()
            .filter(|fk| included.contains(fk.from.table.as_str()) && included.contains(fk.to.table.as_str()))
            .map(|fk| format!("  {} references {}", fk.from, fk.to))
            .collect();
        if !relationships.is_empty() {
            parts.push(String::new());
            parts.push("FOREIGN KEY RELATIONSHIPS:".to_string());
            parts.extend(relationships);
        }

        parts.join("\n")
    }
}
