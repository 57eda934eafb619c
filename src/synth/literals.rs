//! Question literals
//!
//! Values the generated SQL may filter on are read from the question itself,
//! never from LLM output, and are always bound as parameters.
//!
//! Week phrases follow a fixed convention: the first/second/third/fourth week
//! of a month is days 1-7 / 8-14 / 15-21 / 22-28, the last week is the final
//! seven days. "first N days of <Month>" covers days 1..=N and "last N days"
//! the final N days. All windows are half-open `[start, end)`.

use crate::synth::candidate::SqlValue;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WEEK_OF_MONTH: Regex = Regex::new(
        r"(?i)\b(first|second|third|fourth|last)\s+week\s+(?:of|in)\s+(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{4})\b"
    )
    .unwrap();
    static ref DAYS_OF_MONTH: Regex = Regex::new(
        r"(?i)\b(first|last)\s+(\d{1,2})\s+days?\s+(?:of|in)\s+(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{4})\b"
    )
    .unwrap();
    static ref DAY_OF_MONTH: Regex = Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b"
    )
    .unwrap();
    static ref MONTH_YEAR: Regex = Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{4})\b"
    )
    .unwrap();
    static ref ISO_RANGE: Regex =
        Regex::new(r"(?i)\b(?:from|between)\s+(\d{4}-\d{2}-\d{2})\s+(?:to|and|until)\s+(\d{4}-\d{2}-\d{2})\b").unwrap();
    static ref YEAR_ONLY: Regex = Regex::new(r"(?i)\b(?:in|during)\s+(\d{4})\b").unwrap();
    static ref PLACE_AFTER_PREPOSITION: Regex =
        Regex::new(r"\b(?:at|from|near|to)\s+([A-Z][\w'.&-]*(?:\s+[A-Z][\w'.&-]*)*)").unwrap();
    static ref QUOTED: Regex = Regex::new(r#"["“]([^"”]{2,})["”]"#).unwrap();
    static ref TOP_N: Regex = Regex::new(r"(?i)\b(?:top|first)\s+(\d{1,3})\b|\b(\d{1,3})\s+(?:most|least|busiest|quietest|stations|docking)").unwrap();
}

/// Words that make "first N" a period length rather than a result count
const PERIOD_UNITS: &[&str] = &["day", "days", "week", "weeks", "month", "months", "year", "years"];

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september", "october",
    "november", "december",
];

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, PartialEq)]
pub struct DateWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Phrase the window was read from, e.g. "first week of June 2025"
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    /// Stored value in the rider gender column
    pub fn as_value(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherCondition {
    Rainy,
    Dry,
}

/// A literal offered to the LLM as a numbered placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct LiteralSlot {
    pub value: SqlValue,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionLiterals {
    pub window: Option<DateWindow>,
    pub station: Option<String>,
    pub gender: Option<Gender>,
    pub weather: Option<WeatherCondition>,
    pub top_n: Option<i64>,
}

impl QuestionLiterals {
    pub fn extract(question: &str) -> Self {
        Self {
            window: extract_window(question),
            station: extract_station(question),
            gender: extract_gender(question),
            weather: extract_weather(question),
            top_n: extract_top_n(question),
        }
    }

    /// Placeholder slots, in `$1..` order
    pub fn slots(&self) -> Vec<LiteralSlot> {
        let mut slots = Vec::new();
        if let Some(window) = &self.window {
            slots.push(LiteralSlot {
                value: SqlValue::Timestamp(window.start),
                description: format!("start of {} (inclusive)", window.label),
            });
            slots.push(LiteralSlot {
                value: SqlValue::Timestamp(window.end),
                description: format!("end of {} (exclusive)", window.label),
            });
        }
        if let Some(station) = &self.station {
            slots.push(LiteralSlot {
                value: SqlValue::Text(station.clone()),
                description: "station name".to_string(),
            });
        }
        if let Some(gender) = self.gender {
            slots.push(LiteralSlot {
                value: SqlValue::Text(gender.as_value().to_string()),
                description: "rider gender".to_string(),
            });
        }
        if let Some(n) = self.top_n {
            slots.push(LiteralSlot {
                value: SqlValue::Integer(n),
                description: "number of results".to_string(),
            });
        }
        slots
    }
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn window(start: NaiveDate, end: NaiveDate, label: &str) -> Option<DateWindow> {
    Some(DateWindow {
        start: start.and_hms_opt(0, 0, 0)?,
        end: end.and_hms_opt(0, 0, 0)?,
        label: label.to_string(),
    })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

pub fn extract_window(question: &str) -> Option<DateWindow> {
    if let Some(caps) = ISO_RANGE.captures(question) {
        let start = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        let last = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok()?;
        if last >= start {
            return window(start, last + Duration::days(1), &format!("{} to {}", start, last));
        }
    }

    if let Some(caps) = DAYS_OF_MONTH.captures(question) {
        let days: i64 = caps[2].parse().ok()?;
        let month = month_number(&caps[3])?;
        let year: i32 = caps[4].parse().ok()?;
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next_month = first_of_next_month(first)?;
        let month_days = (next_month - first).num_days();
        if (1..=month_days).contains(&days) {
            let ordinal = caps[1].to_lowercase();
            let (start, end) = if ordinal == "first" {
                (first, first + Duration::days(days))
            } else {
                (next_month - Duration::days(days), next_month)
            };
            let label = format!("{} {} days of {} {}", ordinal, days, capitalize(&caps[3]), year);
            return window(start, end, &label);
        }
    }

    if let Some(caps) = WEEK_OF_MONTH.captures(question) {
        let month = month_number(&caps[2])?;
        let year: i32 = caps[3].parse().ok()?;
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next_month = first_of_next_month(first)?;
        let ordinal = caps[1].to_lowercase();
        let start = match ordinal.as_str() {
            "first" => first,
            "second" => first + Duration::days(7),
            "third" => first + Duration::days(14),
            "fourth" => first + Duration::days(21),
            _ => next_month - Duration::days(7),
        };
        let end = (start + Duration::days(7)).min(next_month);
        let label = format!("{} week of {} {}", ordinal, capitalize(&caps[2]), year);
        return window(start, end, &label);
    }

    if let Some(caps) = DAY_OF_MONTH.captures(question) {
        let month = month_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        return window(date, date + Duration::days(1), &date.format("%B %-d, %Y").to_string());
    }

    if let Some(caps) = MONTH_YEAR.captures(question) {
        let month = month_number(&caps[1])?;
        let year: i32 = caps[2].parse().ok()?;
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        return window(first, first_of_next_month(first)?, &format!("{} {}", capitalize(&caps[1]), year));
    }

    if let Some(caps) = YEAR_ONLY.captures(question) {
        let year: i32 = caps[1].parse().ok()?;
        return window(
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
            &year.to_string(),
        );
    }

    None
}

pub fn extract_station(question: &str) -> Option<String> {
    if let Some(caps) = QUOTED.captures(question) {
        return Some(caps[1].trim().to_string());
    }

    PLACE_AFTER_PREPOSITION
        .captures_iter(question)
        .map(|caps| caps[1].trim_end_matches(['.', ',', '?']).to_string())
        .find(|phrase| {
            let first = phrase.split_whitespace().next().unwrap_or_default();
            month_number(first).is_none()
        })
}

fn has_word(lower: &str, words: &[&str]) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| words.contains(&token))
}

pub fn extract_gender(question: &str) -> Option<Gender> {
    let lower = question.to_lowercase();
    if has_word(&lower, &["women", "woman", "female", "females", "ladies"]) {
        Some(Gender::Female)
    } else if has_word(&lower, &["men", "man", "male", "males"]) {
        Some(Gender::Male)
    } else {
        None
    }
}

pub fn extract_weather(question: &str) -> Option<WeatherCondition> {
    let lower = question.to_lowercase();
    if lower.contains("no rain") || has_word(&lower, &["dry", "sunny"]) {
        Some(WeatherCondition::Dry)
    } else if has_word(&lower, &["rain", "rainy", "raining", "wet", "rained"]) {
        Some(WeatherCondition::Rainy)
    } else {
        None
    }
}

/// Result count from "top 5", "first 3 stations" or "the 3 busiest".
/// "first 10 days" is a period, not a count.
pub fn extract_top_n(question: &str) -> Option<i64> {
    TOP_N.captures_iter(question).find_map(|caps| {
        let digits = match (caps.get(1), caps.get(2)) {
            (Some(leading), _) => {
                let next_word = question[leading.end()..]
                    .split(|c: char| !c.is_alphanumeric())
                    .find(|w| !w.is_empty())
                    .unwrap_or_default()
                    .to_lowercase();
                if PERIOD_UNITS.contains(&next_word.as_str()) {
                    return None;
                }
                leading
            }
            (None, Some(trailing)) => trailing,
            (None, None) => return None,
        };
        digits.as_str().parse().ok().filter(|n: &i64| *n > 0)
    })
}
