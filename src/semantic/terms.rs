//! Term extraction
//!
//! Pulls the meaningful words and phrases out of a question so they can be
//! matched against the catalog.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\b\w+\b").unwrap();
    static ref PROPER_PHRASE: Regex = Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").unwrap();
}

const STOP_WORDS: &[&str] = &[
    "what", "was", "the", "how", "many", "which", "where", "when", "who", "is", "are", "were",
    "been", "have", "has", "had", "do", "does", "did", "will", "would", "could", "should", "may",
    "might", "must", "can", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of",
    "with", "by", "from", "up", "about", "into", "through", "during", "before", "after", "above",
    "below", "between", "among", "across", "that", "this", "there", "than", "then", "saw", "any",
];

const TIME_PHRASES: &[&str] = &[
    "last month", "this month", "last year", "this year", "last week", "this week", "rainy days",
    "first week", "second week", "third week", "fourth week", "ride time", "trip time",
    "journey time", "docking point",
];

const WEATHER_WORDS: &[&str] = &["rainy", "sunny", "cloudy", "weather", "snowy", "dry"];

const MONTHS: &[&str] = &[
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

/// Extract matchable terms from a question, deduplicated in first-seen order.
pub fn extract_terms(question: &str) -> Vec<String> {
    let lower = question.to_lowercase();
    let words: Vec<&str> = WORD.find_iter(&lower).map(|m| m.as_str()).collect();
    let mut terms: Vec<String> = Vec::new();

    for word in &words {
        if word.len() > 2 && !STOP_WORDS.contains(word) {
            terms.push(word.to_string());
        }
    }

    // Phrases must line up with whole words: "this week" is not in "this weekend"
    let padded = format!(" {} ", words.join(" "));
    for phrase in TIME_PHRASES {
        if padded.contains(&format!(" {} ", phrase)) {
            terms.push(phrase.to_string());
        }
    }

    // Capitalised multi-word names (stations, streets) that are not dates
    for phrase in PROPER_PHRASE.find_iter(question).map(|m| m.as_str()) {
        let first_word = phrase.split_whitespace().next().unwrap_or_default();
        if !MONTHS.contains(&first_word) {
            terms.push(phrase.to_lowercase());
        }
    }

    let has_word = |w: &str| words.iter().any(|t| *t == w);
    if has_word("women") || has_word("woman") || has_word("female") {
        terms.push("women".to_string());
    }
    if has_word("men") || has_word("man") || has_word("male") {
        terms.push("men".to_string());
    }

    for word in WEATHER_WORDS {
        if has_word(*word) {
            terms.push(word.to_string());
        }
    }

    let mut seen = HashSet::new();
    terms.retain(|t| seen.insert(t.clone()));
    terms
}
