//! Column labels and token scoring
//!
//! Turns identifiers like `trip_distance_km` into readable labels
//! ("trip distance kilometres") and scores free-text terms against them.

use crate::catalog::ColumnDescriptor;
use lazy_static::lazy_static;
use regex::Regex;
use strsim::jaro_winkler;

lazy_static! {
    static ref NON_ALNUM: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// Abbreviations commonly found in column names
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("km", "kilometres"),
    ("kms", "kilometres"),
    ("mm", "millimetres"),
    ("id", "identifier"),
    ("temp", "temperature"),
    ("c", "celsius"),
    ("f", "fahrenheit"),
    ("qty", "quantity"),
    ("num", "number"),
    ("dt", "date"),
    ("ts", "timestamp"),
    ("avg", "average"),
    ("pct", "percent"),
    ("lat", "latitude"),
    ("lon", "longitude"),
    ("lng", "longitude"),
    ("addr", "address"),
    ("desc", "description"),
    ("cnt", "count"),
    ("dur", "duration"),
    ("min", "minutes"),
    ("mins", "minutes"),
    ("sec", "seconds"),
    ("secs", "seconds"),
];

/// Question vocabulary that names a column concept indirectly
const SYNONYMS: &[(&str, &str)] = &[
    ("women", "gender"),
    ("woman", "gender"),
    ("men", "gender"),
    ("man", "gender"),
    ("female", "gender"),
    ("male", "gender"),
    ("rainy", "precipitation"),
    ("rain", "precipitation"),
    ("rainfall", "precipitation"),
    ("docking", "station"),
    ("dock", "station"),
    ("departures", "start"),
    ("departure", "start"),
    ("arrivals", "end"),
    ("arrival", "end"),
    ("journeys", "trips"),
    ("journey", "trip"),
    ("rides", "trips"),
    ("ride", "trip"),
    ("ridden", "distance"),
];

/// Credit given to a match reached through a synonym
const SYNONYM_WEIGHT: f64 = 0.9;

fn synonym(token: &str) -> Option<&'static str> {
    SYNONYMS.iter().find(|(word, _)| *word == token).map(|(_, concept)| *concept)
}

pub fn expand_abbreviation(token: &str) -> &str {
    ABBREVIATIONS
        .iter()
        .find(|(short, _)| *short == token)
        .map(|(_, long)| *long)
        .unwrap_or(token)
}

/// Lowercase alphanumeric tokens with abbreviations expanded
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    NON_ALNUM
        .split(&lower)
        .filter(|t| !t.is_empty())
        .map(|t| expand_abbreviation(t).to_string())
        .collect()
}

/// Readable label for a column name: underscores stripped, abbreviations expanded.
pub fn column_label(column_name: &str) -> String {
    tokenize(column_name).join(" ")
}

/// Descriptive text embedded for a column
pub fn describe_column(column: &ColumnDescriptor) -> String {
    format!(
        "{}: {} ({}) in table {}",
        column.qualified_name(),
        column_label(&column.name),
        column.data_type,
        column_label(&column.table)
    )
}

/// Credit for one term token against one label token
fn token_credit(term_token: &str, label_token: &str) -> f64 {
    if term_token == label_token {
        return 1.0;
    }
    if jaro_winkler(term_token, label_token) >= 0.92 {
        return 0.75;
    }
    let shorter = term_token.len().min(label_token.len());
    if shorter >= 3 && (term_token.contains(label_token) || label_token.contains(term_token)) {
        return 0.5;
    }
    0.0
}

/// Token-overlap score in [0, 1] (Dice coefficient with partial credit for
/// near-identical or substring tokens, and for known synonyms). Identical
/// token sets score 1.0.
pub fn keyword_score(term: &str, label: &str) -> f64 {
    let term_tokens = tokenize(term);
    let label_tokens = tokenize(label);
    if term_tokens.is_empty() || label_tokens.is_empty() {
        return 0.0;
    }

    let credit: f64 = term_tokens
        .iter()
        .map(|t| {
            let best = |token: &str| {
                label_tokens
                    .iter()
                    .map(|l| token_credit(token, l))
                    .fold(0.0, f64::max)
            };
            let direct = best(t.as_str());
            match synonym(t) {
                Some(concept) => direct.max(best(concept) * SYNONYM_WEIGHT),
                None => direct,
            }
        })
        .sum();

    let score = 2.0 * credit / (term_tokens.len() + label_tokens.len()) as f64;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_label_expands_abbreviations() {
        assert_eq!(column_label("trip_distance_km"), "trip distance kilometres");
        assert_eq!(column_label("precipitation_mm"), "precipitation millimetres");
        assert_eq!(column_label("start_station_id"), "start station identifier");
        assert_eq!(column_label("high_temp_c"), "high temperature celsius");
    }

    #[test]
    fn test_identical_label_scores_one() {
        assert_eq!(keyword_score("trip distance kilometres", "trip distance kilometres"), 1.0);
        assert_eq!(keyword_score("Station Name", "station_name"), 1.0);
    }

    #[test]
    fn test_partial_overlap() {
        let distance = keyword_score("kilometres", "trip distance kilometres");
        assert!((distance - 0.5).abs() < 1e-9);

        // spelling variants get partial credit
        let variant = keyword_score("kilometers", "trip distance kilometres");
        assert!(variant > 0.3 && variant < distance);

        assert_eq!(keyword_score("weather", "station name"), 0.0);
    }

    #[test]
    fn test_synonyms_reach_column_concepts() {
        let gender = keyword_score("women", "rider gender");
        assert!((gender - 0.6).abs() < 1e-9);
        assert!(keyword_score("rainy", "precipitation millimetres") > 0.3);
        assert_eq!(keyword_score("women", "station name"), 0.0);
    }

    #[test]
    fn test_describe_column() {
        let column = ColumnDescriptor {
            table: "daily_weather".to_string(),
            name: "precipitation_mm".to_string(),
            data_type: "numeric".to_string(),
            nullable: true,
            references: None,
        };
        assert_eq!(
            describe_column(&column),
            "daily_weather.precipitation_mm: precipitation millimetres (numeric) in table daily weather"
        );
    }
}
