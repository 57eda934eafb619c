//! SQL Validation Gate
//!
//! Every candidate, whichever path produced it, passes through
//! `SqlValidator::validate` before it can reach the executor. The checks are:
//!
//! 1. a lexical scan (string literals, quoted identifiers and comments are
//!    tokenized, not pattern-matched) rejecting mutation keywords, comments,
//!    dollar-quoted strings and statement separators;
//! 2. placeholder numbering: the distinct `$n` used must be exactly
//!    `$1..=$len(params)`;
//! 3. a PostgreSQL parse that must yield exactly one query statement;
//! 4. an AST walk resolving every relation and column against the snapshot.
//!
//! The output, `ValidatedCandidate`, can only be constructed here.

use crate::catalog::SchemaSnapshot;
use crate::error::{NlqError, Result};
use crate::synth::candidate::{Provenance, SqlCandidate, SqlValue};
use sqlparser::ast::{Expr, Ident, ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;
use tracing::debug;

/// Words that may never appear outside literals
const MUTATION_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "grant", "revoke", "exec", "execute",
    "create", "merge", "copy", "call", "into", "vacuum", "lock",
];

/// Functions with side effects or filesystem/network access
const DENIED_FUNCTIONS: &[&str] = &[
    "pg_sleep", "pg_terminate_backend", "pg_cancel_backend", "pg_read_file", "pg_read_binary_file",
    "pg_ls_dir", "lo_import", "lo_export", "set_config", "dblink", "dblink_exec", "nextval", "setval",
];

/// Bare identifiers PostgreSQL treats as niladic functions
const NILADIC: &[&str] = &["current_date", "current_timestamp", "current_time", "localtimestamp", "localtime"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    QuotedIdent,
    StringLiteral,
    Placeholder(usize),
    Semicolon,
}

/// Tokenize just enough SQL to know what lies outside literals.
fn lex(sql: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' => {
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(NlqError::UnsafeQuery("unterminated string literal".to_string())),
                        Some('\\') => i += 2,
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => i += 2,
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                tokens.push(Token::StringLiteral);
            }
            '"' => {
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(NlqError::UnsafeQuery("unterminated quoted identifier".to_string())),
                        Some('"') if chars.get(i + 1) == Some(&'"') => i += 2,
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                tokens.push(Token::QuotedIdent);
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                return Err(NlqError::UnsafeQuery("comments are not allowed".to_string()));
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                return Err(NlqError::UnsafeQuery("comments are not allowed".to_string()));
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                if end == start {
                    return Err(NlqError::UnsafeQuery("dollar-quoted strings are not allowed".to_string()));
                }
                let digits: String = chars[start..end].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| NlqError::UnsafeQuery(format!("invalid placeholder ${}", digits)))?;
                tokens.push(Token::Placeholder(index));
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(Token::Word(word.to_lowercase()));
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    Ok(tokens)
}

/// Whether the SQL inlines any string literal. Unterminated literals count.
pub fn contains_string_literal(sql: &str) -> bool {
    match lex(sql) {
        Ok(tokens) => tokens.contains(&Token::StringLiteral),
        Err(_) => true,
    }
}

/// Distinct placeholder indices used by the SQL, ascending
pub fn placeholder_indices(sql: &str) -> Result<BTreeSet<usize>> {
    Ok(lex(sql)?
        .into_iter()
        .filter_map(|t| match t {
            Token::Placeholder(n) => Some(n),
            _ => None,
        })
        .collect())
}

/// A candidate that passed every check. Only the validator can build one,
/// and the executor accepts nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCandidate(SqlCandidate);

impl ValidatedCandidate {
    pub fn sql(&self) -> &str {
        &self.0.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.0.params
    }

    pub fn provenance(&self) -> Provenance {
        self.0.provenance
    }

    pub fn candidate(&self) -> &SqlCandidate {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlValidator;

impl SqlValidator {
    pub fn new() -> Self {
        Self
    }

    /// Accept a single read-only statement that references only catalog
    /// objects, or fail with `UnsafeQuery`. A single trailing semicolon is
    /// stripped.
    pub fn validate(&self, candidate: SqlCandidate, snapshot: &SchemaSnapshot) -> Result<ValidatedCandidate> {
        let tokens = lex(&candidate.sql)?;

        if let Some(keyword) = tokens.iter().find_map(|t| match t {
            Token::Word(w) if MUTATION_KEYWORDS.contains(&w.as_str()) => Some(w),
            _ => None,
        }) {
            return Err(NlqError::UnsafeQuery(format!("forbidden keyword '{}'", keyword)));
        }

        // A separator is only accepted as the very last character
        let separators = tokens.iter().filter(|t| **t == Token::Semicolon).count();
        let trimmed = candidate.sql.trim();
        let body = match (separators, trimmed.strip_suffix(';')) {
            (0, _) => trimmed,
            (1, Some(body)) => body.trim_end(),
            _ => return Err(NlqError::UnsafeQuery("multiple statements".to_string())),
        };
        let sql = body.to_string();

        check_placeholders(&tokens, candidate.params.len())?;

        let statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql)
            .map_err(|e| NlqError::UnsafeQuery(format!("SQL does not parse: {}", e)))?;
        let statement = match statements.as_slice() {
            [statement @ Statement::Query(_)] => statement,
            [_] => return Err(NlqError::UnsafeQuery("only SELECT statements are allowed".to_string())),
            _ => return Err(NlqError::UnsafeQuery("expected exactly one statement".to_string())),
        };

        let mut references = ReferenceCollector::default();
        let _ = statement.visit(&mut references);
        references.check(snapshot)?;

        debug!("Validated {} candidate ({} params)", candidate.provenance, candidate.params.len());
        Ok(ValidatedCandidate(SqlCandidate { sql, ..candidate }))
    }
}

fn check_placeholders(tokens: &[Token], param_count: usize) -> Result<()> {
    let used: BTreeSet<usize> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Placeholder(n) => Some(*n),
            _ => None,
        })
        .collect();
    let expected: BTreeSet<usize> = (1..=param_count).collect();
    if used != expected {
        return Err(NlqError::UnsafeQuery(format!(
            "placeholders {:?} do not match {} bound parameters",
            used, param_count
        )));
    }
    Ok(())
}

fn normalize(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

/// Collects every name a statement mentions, then resolves them in one pass
/// so that aliases declared anywhere in the statement are known.
#[derive(Default)]
struct ReferenceCollector {
    relations: Vec<Vec<String>>,
    cte_names: HashSet<String>,
    /// alias -> aliased relation (None for derived tables)
    table_aliases: HashMap<String, Option<String>>,
    column_aliases: HashSet<String>,
    identifiers: Vec<Vec<String>>,
    functions: Vec<String>,
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(normalize(&cte.alias.name));
                self.column_aliases.extend(cte.alias.columns.iter().map(normalize));
            }
        }
        if let SetExpr::Select(select) = query.body.as_ref() {
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    self.column_aliases.insert(normalize(alias));
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        match factor {
            TableFactor::Table {
                name,
                alias: Some(alias),
                ..
            } => {
                let target = name.0.last().map(normalize);
                self.table_aliases.insert(normalize(&alias.name), target);
            }
            TableFactor::Derived { alias: Some(alias), .. } => {
                self.table_aliases.insert(normalize(&alias.name), None);
                self.column_aliases.extend(alias.columns.iter().map(normalize));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        self.relations.push(relation.0.iter().map(normalize).collect());
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        match expr {
            Expr::Identifier(ident) => self.identifiers.push(vec![normalize(ident)]),
            Expr::CompoundIdentifier(parts) => self.identifiers.push(parts.iter().map(normalize).collect()),
            Expr::Function(function) => {
                if let Some(name) = function.name.0.last() {
                    self.functions.push(normalize(name));
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

impl ReferenceCollector {
    fn check(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        for function in &self.functions {
            if DENIED_FUNCTIONS.contains(&function.as_str()) {
                return Err(NlqError::UnsafeQuery(format!("function '{}' is not allowed", function)));
            }
        }

        for relation in &self.relations {
            let (schema, table) = match relation.as_slice() {
                [table] => (None, table),
                [schema, table] => (Some(schema.as_str()), table),
                _ => return Err(NlqError::UnsafeQuery(format!("unknown table {}", relation.join(".")))),
            };
            let known = match schema {
                None => snapshot.has_table(table) || self.cte_names.contains(table),
                Some(schema) => schema == "public" && snapshot.has_table(table),
            };
            if !known {
                return Err(NlqError::UnsafeQuery(format!("unknown table {}", relation.join("."))));
            }
        }

        for identifier in &self.identifiers {
            self.check_identifier(identifier, snapshot)?;
        }
        Ok(())
    }

    fn is_loose_name(&self, column: &str, snapshot: &SchemaSnapshot) -> bool {
        snapshot.has_column_named(column) || self.column_aliases.contains(column)
    }

    fn check_identifier(&self, parts: &[String], snapshot: &SchemaSnapshot) -> Result<()> {
        let unknown = || NlqError::UnsafeQuery(format!("unknown column {}", parts.join(".")));

        match parts {
            [column] => {
                if self.is_loose_name(column, snapshot) || NILADIC.contains(&column.as_str()) {
                    Ok(())
                } else {
                    Err(unknown())
                }
            }
            [.., qualifier, column] => {
                let target = match self.table_aliases.get(qualifier) {
                    Some(Some(table)) => Some(table.as_str()),
                    Some(None) => None,
                    None if snapshot.has_table(qualifier) || self.cte_names.contains(qualifier) => {
                        Some(qualifier.as_str())
                    }
                    None => return Err(unknown()),
                };
                let resolved = match target {
                    Some(table) if snapshot.has_table(table) => snapshot.column(table, column).is_some(),
                    _ => self.is_loose_name(column, snapshot),
                };
                if resolved {
                    Ok(())
                } else {
                    Err(unknown())
                }
            }
            [] => Err(unknown()),
        }
    }
}
