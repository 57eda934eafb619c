//! Rule-based query shapes
//!
//! The fallback generator recognises a closed set of question shapes. Each
//! shape declares the column slots it needs and renders one parameterized
//! template; adding a shape means adding a variant here.

use crate::catalog::{ColumnDescriptor, DataKind};
use crate::error::{NlqError, Result};
use crate::semantic::{tokenize, MatchSet};
use crate::synth::builder::SelectBuilder;
use crate::synth::candidate::{Provenance, SqlCandidate, SqlValue};
use crate::synth::literals::{QuestionLiterals, WeatherCondition};
use crate::synth::resolve::{Slot, SlotResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    AverageDuration,
    TotalDistance,
    AverageDistance,
    TripCount,
}

impl Measure {
    fn alias(&self) -> &'static str {
        match self {
            Measure::AverageDuration => "average_duration_minutes",
            Measure::TotalDistance => "total_distance",
            Measure::AverageDistance => "average_distance",
            Measure::TripCount => "trip_count",
        }
    }

    fn slots(&self) -> &'static [Slot] {
        match self {
            Measure::AverageDuration => &[Slot::TripStart],
            Measure::TotalDistance | Measure::AverageDistance => &[Slot::Distance],
            Measure::TripCount => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationRole {
    Start,
    End,
}

impl StationRole {
    fn slot(&self) -> Slot {
        match self {
            StationRole::Start => Slot::StartStation,
            StationRole::End => Slot::EndStation,
        }
    }

    fn count_alias(&self) -> &'static str {
        match self {
            StationRole::Start => "departures",
            StationRole::End => "arrivals",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Most,
    Least,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// Stations ranked by trip count ("which station saw the most departures")
    StationRanking { role: StationRole, direction: Direction },
    /// One aggregate over a time window, optionally filtered by station
    TimeWindowAggregate { measure: Measure },
    /// One aggregate filtered by rider demographics and/or daily weather
    DemographicWeatherAggregate { measure: Measure },
}

const STATION_WORDS: &[&str] = &["station", "stations", "dock", "docks", "docking"];
const RANKING_WORDS: &[&str] = &[
    "most", "least", "busiest", "quietest", "fewest", "top", "popular", "highest", "lowest",
];
const LEAST_WORDS: &[&str] = &["least", "quietest", "fewest", "lowest"];
const END_ROLE_WORDS: &[&str] = &["arrival", "arrivals", "ended", "ending", "destination", "destinations", "dropoff", "dropoffs"];
const DISTANCE_WORDS: &[&str] = &["kilometres", "kilometers", "distance", "miles", "far"];
const DURATION_WORDS: &[&str] = &["time", "duration", "long", "minutes"];
const AVERAGE_WORDS: &[&str] = &["average", "mean", "typical"];
const COUNT_WORDS: &[&str] = &["many", "count", "number"];

fn words(question: &str) -> Vec<String> {
    tokenize(question)
}

fn any_word(words: &[String], set: &[&str]) -> bool {
    words.iter().any(|w| set.contains(&w.as_str()))
}

/// Aggregate measure named by the question, falling back to semantic matches
fn detect_measure(words: &[String], resolver: &SlotResolver<'_>, matches: &MatchSet) -> Option<Measure> {
    let average = any_word(words, AVERAGE_WORDS);
    if any_word(words, DISTANCE_WORDS) {
        return Some(if average {
            Measure::AverageDistance
        } else {
            Measure::TotalDistance
        });
    }
    if any_word(words, DURATION_WORDS) && (average || words.windows(2).any(|w| w[0] == "how" && w[1] == "long")) {
        return Some(Measure::AverageDuration);
    }
    if any_word(words, COUNT_WORDS) {
        return Some(Measure::TripCount);
    }

    let distance = resolver.resolve(Slot::Distance)?;
    let matched = matches
        .iter()
        .any(|(_, ms)| ms.first().is_some_and(|m| m.column == *distance));
    matched.then_some(if average {
        Measure::AverageDistance
    } else {
        Measure::TotalDistance
    })
}

fn station_role(question: &str, words: &[String]) -> StationRole {
    let lower = question.to_lowercase();
    if any_word(words, END_ROLE_WORDS)
        || lower.contains("arrived at")
        || lower.contains("finished at")
        || lower.contains("ended at")
    {
        StationRole::End
    } else {
        StationRole::Start
    }
}

impl QueryShape {
    /// Recognise the question's shape, or None if no rule applies.
    pub fn detect(
        question: &str,
        literals: &QuestionLiterals,
        resolver: &SlotResolver<'_>,
        matches: &MatchSet,
    ) -> Option<QueryShape> {
        let words = words(question);
        let asks_which = any_word(&words, &["which", "what"]);
        let ranking = any_word(&words, RANKING_WORDS) || literals.top_n.is_some();

        if any_word(&words, STATION_WORDS) && ranking && (asks_which || literals.top_n.is_some()) {
            let direction = if any_word(&words, LEAST_WORDS) {
                Direction::Least
            } else {
                Direction::Most
            };
            return Some(QueryShape::StationRanking {
                role: station_role(question, &words),
                direction,
            });
        }

        let measure = detect_measure(&words, resolver, matches);
        if literals.gender.is_some() || literals.weather.is_some() {
            return Some(QueryShape::DemographicWeatherAggregate {
                measure: measure.unwrap_or(Measure::TripCount),
            });
        }

        match (measure, &literals.window) {
            (Some(measure), _) => Some(QueryShape::TimeWindowAggregate { measure }),
            (None, Some(_)) => Some(QueryShape::TimeWindowAggregate {
                measure: Measure::TripCount,
            }),
            (None, None) => None,
        }
    }

    /// Column slots this shape needs for the given literals
    pub fn required_slots(&self, literals: &QuestionLiterals) -> Vec<Slot> {
        let mut slots = Vec::new();
        match self {
            QueryShape::StationRanking { role, .. } => {
                slots.push(role.slot());
                slots.push(Slot::StationName);
            }
            QueryShape::TimeWindowAggregate { measure } | QueryShape::DemographicWeatherAggregate { measure } => {
                slots.extend_from_slice(measure.slots());
            }
        }
        if literals.window.is_some() {
            slots.push(Slot::TripStart);
        }
        if literals.gender.is_some() {
            slots.push(Slot::RiderGender);
        }
        if literals.weather.is_some() {
            slots.push(Slot::TripStart);
            slots.push(Slot::WeatherDate);
        }
        if literals.station.is_some() && !matches!(self, QueryShape::StationRanking { .. }) {
            slots.push(Slot::StartStation);
            slots.push(Slot::StationName);
        }
        slots.dedup();
        slots
    }

    /// Fill the template for this shape.
    pub fn render(
        &self,
        question: &str,
        literals: &QuestionLiterals,
        resolver: &SlotResolver<'_>,
    ) -> Result<SqlCandidate> {
        for slot in self.required_slots(literals) {
            resolver.require(slot)?;
        }

        let fact = resolver.fact_table();
        let mut q = SelectBuilder::new(fact);

        match self {
            QueryShape::StationRanking { role, direction } => {
                let key = resolver.require(role.slot())?;
                let name = resolver.require(Slot::StationName)?;
                join_station(&mut q, key, name, resolver)?;

                let name = name.qualified_name();
                q.select(name.clone());
                let order = match direction {
                    Direction::Most => "DESC",
                    Direction::Least => "ASC",
                };
                match literals.top_n {
                    Some(n) => {
                        q.select(format!("COUNT(*) AS {}", role.count_alias()));
                        let limit = q.bind(SqlValue::Integer(n));
                        q.limit(limit);
                    }
                    None => {
                        q.limit("1");
                    }
                }
                q.group_by(name.clone())
                    .order_by(format!("COUNT(*) {}", order))
                    .order_by(name);
            }
            QueryShape::TimeWindowAggregate { measure } | QueryShape::DemographicWeatherAggregate { measure } => {
                let expr = measure_expression(*measure, resolver)?;
                q.select(format!("{} AS {}", expr, measure.alias()));

                if let Some(station) = &literals.station {
                    let role = station_role(question, &words(question));
                    let key = resolver
                        .resolve(role.slot())
                        .map_or_else(|| resolver.require(Slot::StartStation), Ok)?;
                    let name = resolver.require(Slot::StationName)?;
                    join_station(&mut q, key, name, resolver)?;
                    let p = q.bind(SqlValue::Text(station.clone()));
                    q.filter(format!("{} = {}", name.qualified_name(), p));
                }
            }
        }

        apply_common_filters(&mut q, literals, resolver)?;
        Ok(q.build(Provenance::RuleBased))
    }
}

fn join_station(
    q: &mut SelectBuilder,
    key: &ColumnDescriptor,
    name: &ColumnDescriptor,
    resolver: &SlotResolver<'_>,
) -> Result<()> {
    let target = key
        .references
        .as_ref()
        .ok_or_else(|| NlqError::Synthesis(format!("{} is not a foreign key", key.qualified_name())))?;
    // every identifier goes through a catalog lookup
    let target = resolver.snapshot().lookup(&target.table, &target.column)?;
    q.join(
        &name.table,
        format!("{} = {}", key.qualified_name(), target.qualified_name()),
    );
    Ok(())
}

fn measure_expression(measure: Measure, resolver: &SlotResolver<'_>) -> Result<String> {
    Ok(match measure {
        Measure::TripCount => "COUNT(*)".to_string(),
        Measure::TotalDistance => format!("SUM({})", resolver.require(Slot::Distance)?.qualified_name()),
        Measure::AverageDistance => format!("AVG({})", resolver.require(Slot::Distance)?.qualified_name()),
        Measure::AverageDuration => match resolver.resolve(Slot::Duration) {
            Some(duration) => {
                let in_seconds = tokenize(&duration.name).iter().any(|t| t == "seconds");
                if in_seconds {
                    format!("AVG({} / 60.0)", duration.qualified_name())
                } else {
                    format!("AVG({})", duration.qualified_name())
                }
            }
            None => {
                let start = resolver.require(Slot::TripStart)?;
                let end = resolver.require(Slot::TripEnd)?;
                format!(
                    "AVG(EXTRACT(EPOCH FROM ({} - {})) / 60.0)",
                    end.qualified_name(),
                    start.qualified_name()
                )
            }
        },
    })
}

fn apply_common_filters(q: &mut SelectBuilder, literals: &QuestionLiterals, resolver: &SlotResolver<'_>) -> Result<()> {
    if let Some(window) = &literals.window {
        let start = resolver.require(Slot::TripStart)?.qualified_name();
        let from = q.bind(SqlValue::Timestamp(window.start));
        let until = q.bind(SqlValue::Timestamp(window.end));
        q.filter(format!("{} >= {}", start, from));
        q.filter(format!("{} < {}", start, until));
    }

    if let Some(gender) = literals.gender {
        let column = resolver.require(Slot::RiderGender)?.qualified_name();
        let p = q.bind(SqlValue::Text(gender.as_value().to_string()));
        q.filter(format!("{} = {}", column, p));
    }

    if let Some(weather) = literals.weather {
        let trip_start = resolver.require(Slot::TripStart)?;
        let weather_date = resolver.require(Slot::WeatherDate)?;
        let weather_side = match weather_date.kind() {
            DataKind::Date => weather_date.qualified_name(),
            _ => format!("DATE({})", weather_date.qualified_name()),
        };
        q.join(
            &weather_date.table,
            format!("DATE({}) = {}", trip_start.qualified_name(), weather_side),
        );

        match (resolver.resolve(Slot::Precipitation), resolver.resolve(Slot::WeatherCondition)) {
            (Some(precipitation), _) => {
                let op = match weather {
                    WeatherCondition::Rainy => ">",
                    WeatherCondition::Dry => "=",
                };
                q.filter(format!("{} {} 0", precipitation.qualified_name(), op));
            }
            (None, Some(condition)) => {
                let p = q.bind(SqlValue::Text("%rain%".to_string()));
                let op = match weather {
                    WeatherCondition::Rainy => "ILIKE",
                    WeatherCondition::Dry => "NOT ILIKE",
                };
                q.filter(format!("{} {} {}", condition.qualified_name(), op, p));
            }
            (None, None) => {
                return Err(NlqError::Synthesis("no weather measurement column found".to_string()));
            }
        }
    }

    Ok(())
}
