//! Synthesis context
//!
//! Schema listing, semantic matches and literal slots handed to the LLM.
//! The schema section is kept under a character budget: first by narrowing
//! to the tables the matches implicate (plus their foreign-key neighbours),
//! then by cutting whole lines.

use crate::catalog::SchemaSnapshot;
use crate::semantic::MatchSet;
use crate::synth::literals::LiteralSlot;
use itertools::Itertools;
use std::collections::BTreeSet;

pub struct SynthesisContext {
    pub schema: String,
    pub matches: String,
    pub slots: Vec<LiteralSlot>,
}

impl SynthesisContext {
    pub fn build(snapshot: &SchemaSnapshot, matches: &MatchSet, slots: Vec<LiteralSlot>, budget: usize) -> Self {
        Self {
            schema: schema_within_budget(snapshot, matches, budget),
            matches: matches.context_text(),
            slots,
        }
    }

    /// `$n = value (description)` lines
    pub fn slot_text(&self) -> String {
        if self.slots.is_empty() {
            return "(none)".to_string();
        }
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| format!("${} = {} ({})", i + 1, slot.value, slot.description))
            .join("\n")
    }
}

fn schema_within_budget(snapshot: &SchemaSnapshot, matches: &MatchSet, budget: usize) -> String {
    let full = snapshot.schema_text();
    if full.len() <= budget {
        return full;
    }

    let mut tables: BTreeSet<&str> = BTreeSet::new();
    for (_, term_matches) in matches.iter() {
        for m in term_matches {
            tables.insert(m.column.table.as_str());
        }
    }
    let neighbours: Vec<&str> = tables
        .iter()
        .flat_map(|t| snapshot.foreign_keys().targets_of(t))
        .map(|t| t.as_str())
        .collect();
    tables.extend(neighbours);

    let narrowed = if tables.is_empty() {
        full
    } else {
        snapshot.schema_text_for(&tables.into_iter().collect::<Vec<_>>())
    };
    if narrowed.len() <= budget {
        return narrowed;
    }

    let marker = "... (schema truncated)";
    let mut out = String::new();
    for line in narrowed.lines() {
        if out.len() + line.len() + 1 + marker.len() > budget {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(marker);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::snapshot::fixtures::bike_share_snapshot;
    use crate::semantic::{MatchSource, SemanticMatch};
    use crate::synth::candidate::SqlValue;

    fn gender_matches(snapshot: &SchemaSnapshot) -> MatchSet {
        MatchSet::new(
            MatchSource::Keyword,
            vec![(
                "women".to_string(),
                vec![SemanticMatch {
                    term: "women".to_string(),
                    column: snapshot.column("trips", "rider_gender").unwrap().clone(),
                    score: 0.6,
                }],
            )],
        )
    }

    #[test]
    fn test_full_schema_within_budget() {
        let snapshot = bike_share_snapshot(1);
        let ctx = SynthesisContext::build(&snapshot, &gender_matches(&snapshot), Vec::new(), 100_000);
        assert_eq!(ctx.schema, snapshot.schema_text());
        assert_eq!(ctx.matches, "'women' -> trips.rider_gender (score: 0.60)");
        assert_eq!(ctx.slot_text(), "(none)");
    }

    #[test]
    fn test_narrows_to_matched_tables() {
        let snapshot = bike_share_snapshot(1);
        let full = snapshot.schema_text().len();
        let ctx = SynthesisContext::build(&snapshot, &gender_matches(&snapshot), Vec::new(), full - 1);

        assert!(ctx.schema.contains("Table: trips"));
        assert!(ctx.schema.contains("Table: stations"));
        assert!(!ctx.schema.contains("Table: daily_weather"));
        assert!(ctx.schema.len() < full);
    }

    #[test]
    fn test_truncates_to_budget() {
        let snapshot = bike_share_snapshot(1);
        let ctx = SynthesisContext::build(&snapshot, &MatchSet::empty(MatchSource::Keyword), Vec::new(), 200);
        assert!(ctx.schema.len() <= 200);
        assert!(ctx.schema.ends_with("... (schema truncated)"));
    }

    #[test]
    fn test_slot_text() {
        let snapshot = bike_share_snapshot(1);
        let slots = vec![LiteralSlot {
            value: SqlValue::Text("female".to_string()),
            description: "rider gender".to_string(),
        }];
        let ctx = SynthesisContext::build(&snapshot, &gender_matches(&snapshot), slots, 100_000);
        assert_eq!(ctx.slot_text(), "$1 = 'female' (rider gender)");
    }
}
