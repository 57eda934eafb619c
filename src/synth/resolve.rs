//! Column resolution
//!
//! Finds the concrete catalog column behind each role a query template needs
//! (trip start time, start station, rider gender, ...). Roles are recognised
//! from column labels and data kinds, ranked by semantic evidence from the
//! question, then by foreign-key connectivity to the trip table.

use crate::catalog::{ColumnDescriptor, DataKind, SchemaSnapshot};
use crate::error::{NlqError, Result};
use crate::semantic::{tokenize, MatchSet, SemanticMatch};
use std::cmp::Ordering;

/// Scores this close to a term's best match count as a tie
pub const TIE_EPSILON: f64 = 0.05;

const FACT_TABLE_HINTS: &[&str] = &["trip", "trips", "ride", "rides", "journey", "journeys", "rental", "rentals"];
const STATION_TABLE_HINTS: &[&str] = &["station", "stations", "dock", "docks", "docking"];
const WEATHER_TABLE_HINTS: &[&str] = &["weather"];

/// A role a template column can play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    TripStart,
    TripEnd,
    StartStation,
    EndStation,
    StationName,
    Distance,
    Duration,
    RiderGender,
    Precipitation,
    WeatherDate,
    WeatherCondition,
}

/// Where a slot's column must live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Home {
    FactTable,
    StationTable,
    WeatherTable,
}

impl Slot {
    fn hints(&self) -> &'static [&'static str] {
        match self {
            Slot::TripStart => &["start", "started", "starttime", "departure", "departed", "begin", "pickup"],
            Slot::TripEnd => &["end", "ended", "endtime", "arrival", "arrived", "finish", "dropoff"],
            Slot::StartStation => &["start", "origin", "from", "departure", "pickup"],
            Slot::EndStation => &["end", "destination", "to", "arrival", "dropoff"],
            Slot::StationName => &["name", "title", "label"],
            Slot::Distance => &["distance", "kilometres", "kilometers", "miles", "length"],
            Slot::Duration => &["duration", "minutes", "seconds"],
            Slot::RiderGender => &["gender", "sex"],
            Slot::Precipitation => &["precipitation", "rain", "rainfall", "precip"],
            Slot::WeatherDate => &["date", "day", "observed"],
            Slot::WeatherCondition => &["condition", "conditions", "summary", "description", "events", "weather"],
        }
    }

    fn kind_ok(&self, kind: DataKind) -> bool {
        match self {
            Slot::TripStart | Slot::TripEnd => kind == DataKind::Timestamp,
            Slot::WeatherDate => kind.is_temporal(),
            Slot::StartStation | Slot::EndStation => true,
            Slot::StationName | Slot::RiderGender | Slot::WeatherCondition => kind == DataKind::Text,
            Slot::Distance | Slot::Duration | Slot::Precipitation => kind == DataKind::Numeric,
        }
    }

    fn home(&self) -> Home {
        match self {
            Slot::StationName => Home::StationTable,
            Slot::WeatherDate | Slot::WeatherCondition | Slot::Precipitation => Home::WeatherTable,
            _ => Home::FactTable,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Slot::TripStart => "trip start time",
            Slot::TripEnd => "trip end time",
            Slot::StartStation => "start station",
            Slot::EndStation => "end station",
            Slot::StationName => "station name",
            Slot::Distance => "trip distance",
            Slot::Duration => "trip duration",
            Slot::RiderGender => "rider gender",
            Slot::Precipitation => "precipitation",
            Slot::WeatherDate => "weather date",
            Slot::WeatherCondition => "weather condition",
        }
    }
}

fn table_matches(table: &str, hints: &[&str]) -> bool {
    tokenize(table).iter().any(|t| hints.contains(&t.as_str()))
}

fn label_matches(column: &ColumnDescriptor, hints: &[&str]) -> bool {
    tokenize(&column.name).iter().any(|t| hints.contains(&t.as_str()))
}

/// The best match for `term`, applying the tie-break policy: among matches
/// within `TIE_EPSILON` of the best score, prefer a table with a foreign-key
/// path to the tables implicated by the other terms, then the higher score.
pub fn preferred_match<'m>(matches: &'m MatchSet, term: &str, snapshot: &SchemaSnapshot) -> Option<&'m SemanticMatch> {
    let candidates = matches.get(term);
    let top = candidates.first()?;
    let mut tied: Vec<&SemanticMatch> = candidates
        .iter()
        .filter(|m| top.score - m.score <= TIE_EPSILON)
        .collect();
    if tied.len() == 1 {
        return Some(top);
    }

    let implicated = matches.implicated_tables(term);
    let graph = snapshot.foreign_keys();
    let connected = |m: &SemanticMatch| implicated.iter().any(|t| graph.is_connected(&m.column.table, t));

    // stable sort keeps matcher order for complete ties
    tied.sort_by(|a, b| {
        connected(b)
            .cmp(&connected(a))
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
    });
    tied.first().copied()
}

pub struct SlotResolver<'a> {
    snapshot: &'a SchemaSnapshot,
    matches: &'a MatchSet,
    preferred: Vec<&'a SemanticMatch>,
    fact_table: String,
}

impl<'a> SlotResolver<'a> {
    pub fn new(snapshot: &'a SchemaSnapshot, matches: &'a MatchSet) -> Result<Self> {
        let fact_table = find_fact_table(snapshot)
            .ok_or_else(|| NlqError::Synthesis("no trip table found in the schema".to_string()))?;
        let preferred = matches
            .iter()
            .filter_map(|(term, _)| preferred_match(matches, term, snapshot))
            .collect();
        Ok(Self {
            snapshot,
            matches,
            preferred,
            fact_table,
        })
    }

    pub fn fact_table(&self) -> &str {
        &self.fact_table
    }

    pub fn snapshot(&self) -> &'a SchemaSnapshot {
        self.snapshot
    }

    /// Table holding station names: the target of a trip station key
    pub fn station_table(&self) -> Option<&'a str> {
        let fact = self.snapshot.table_columns(&self.fact_table)?;
        fact.iter()
            .filter_map(|c| c.references.as_ref())
            .map(|target| target.table.as_str())
            .find(|table| table_matches(table, STATION_TABLE_HINTS))
    }

    pub fn weather_table(&self) -> Option<&'a str> {
        self.snapshot
            .table_names()
            .find(|t| table_matches(t, WEATHER_TABLE_HINTS))
            .map(|t| t.as_str())
    }

    fn home_table(&self, home: Home) -> Option<&str> {
        match home {
            Home::FactTable => Some(self.fact_table.as_str()),
            Home::StationTable => self.station_table(),
            Home::WeatherTable => self.weather_table(),
        }
    }

    /// Column playing `slot`, if the schema has one
    pub fn resolve(&self, slot: Slot) -> Option<&'a ColumnDescriptor> {
        let table = self.home_table(slot.home())?;
        let columns = self.snapshot.table_columns(table)?;
        let station_table = self.station_table();

        let mut candidates: Vec<&'a ColumnDescriptor> = columns
            .iter()
            .filter(|c| slot.kind_ok(c.kind()) && label_matches(c, slot.hints()))
            .filter(|c| match slot {
                Slot::StartStation | Slot::EndStation => {
                    let target = c.references.as_ref().map(|r| r.table.as_str());
                    target.is_some() && target == station_table
                }
                _ => true,
            })
            .collect();

        candidates.sort_by(|a, b| self.compare(a, b));
        candidates.first().copied()
    }

    pub fn require(&self, slot: Slot) -> Result<&'a ColumnDescriptor> {
        self.resolve(slot)
            .ok_or_else(|| NlqError::Synthesis(format!("no column found for {}", slot.describe())))
    }

    /// Semantic evidence first, then connectivity to the trip table, then
    /// shorter name, then lexical order.
    fn compare(&self, a: &ColumnDescriptor, b: &ColumnDescriptor) -> Ordering {
        let evidence = |c: &ColumnDescriptor| {
            let preferred = self
                .preferred
                .iter()
                .filter(|m| m.column.table == c.table && m.column.name == c.name)
                .map(|m| m.score)
                .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));
            match preferred {
                Some(score) => (1u8, score),
                None => (0u8, self.matches.score_for(&c.table, &c.name).unwrap_or(0.0)),
            }
        };
        let connected = |c: &ColumnDescriptor| self.snapshot.foreign_keys().is_connected(&c.table, &self.fact_table);

        let (rank_a, score_a) = evidence(a);
        let (rank_b, score_b) = evidence(b);
        rank_b
            .cmp(&rank_a)
            .then_with(|| score_b.partial_cmp(&score_a).unwrap_or(Ordering::Equal))
            .then_with(|| connected(b).cmp(&connected(a)))
            .then_with(|| a.name.len().cmp(&b.name.len()))
            .then_with(|| a.qualified_name().cmp(&b.qualified_name()))
    }
}

/// The trip table: named like one, else the table with the most outgoing
/// foreign keys.
fn find_fact_table(snapshot: &SchemaSnapshot) -> Option<String> {
    if let Some(table) = snapshot.table_names().find(|t| table_matches(t, FACT_TABLE_HINTS)) {
        return Some(table.clone());
    }
    let graph = snapshot.foreign_keys();
    snapshot
        .table_names()
        .map(|t| (t, graph.targets_of(t).count()))
        .filter(|(_, count)| *count > 0)
        .max_by(|(ta, a), (tb, b)| a.cmp(b).then_with(|| tb.cmp(ta)))
        .map(|(t, _)| t.clone())
}
