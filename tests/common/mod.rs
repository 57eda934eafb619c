//! Shared fakes for the integration tests: a bike-share schema, a small
//! in-memory trip dataset, and a query runner that evaluates the query
//! shapes the pipeline produces against that dataset.

#![allow(dead_code)]

use async_trait::async_trait;
use bikeshare_nlq::catalog::{ColumnDescriptor, ColumnRef, ForeignKey, MetadataSource, RawSchema, SchemaCatalog};
use bikeshare_nlq::config::PipelineSettings;
use bikeshare_nlq::error::{NlqError, Result};
use bikeshare_nlq::execution::{QueryExecutor, QueryRunner, Row, RunOptions, RunnerError};
use bikeshare_nlq::semantic::SemanticMatcher;
use bikeshare_nlq::synth::{LlmBackend, QuerySynthesizer, SqlValue};
use bikeshare_nlq::validation::SqlValidator;
use bikeshare_nlq::QueryPipeline;
use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

lazy_static! {
    static ref AGGREGATE_ALIAS: Regex = Regex::new(r"\)\s+AS\s+(\w+)").unwrap();
}

fn col(table: &str, name: &str, data_type: &str, nullable: bool) -> ColumnDescriptor {
    ColumnDescriptor {
        table: table.to_string(),
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable,
        references: None,
    }
}

pub fn bike_share_schema() -> RawSchema {
    RawSchema {
        columns: vec![
            col("daily_weather", "weather_date", "date", false),
            col("daily_weather", "high_temp_c", "numeric", true),
            col("daily_weather", "precipitation_mm", "numeric", true),
            col("stations", "station_id", "integer", false),
            col("stations", "station_name", "text", false),
            col("stations", "capacity", "integer", true),
            col("trips", "trip_id", "integer", false),
            col("trips", "started_at", "timestamp without time zone", false),
            col("trips", "ended_at", "timestamp without time zone", false),
            col("trips", "start_station_id", "integer", true),
            col("trips", "end_station_id", "integer", true),
            col("trips", "trip_distance_km", "numeric", true),
            col("trips", "rider_gender", "text", true),
        ],
        foreign_keys: vec![
            ForeignKey {
                from: ColumnRef::new("trips", "start_station_id"),
                to: ColumnRef::new("stations", "station_id"),
            },
            ForeignKey {
                from: ColumnRef::new("trips", "end_station_id"),
                to: ColumnRef::new("stations", "station_id"),
            },
        ],
    }
}

/// Serves a fixed schema and counts introspections
pub struct StaticSource {
    pub schema: Option<RawSchema>,
    pub calls: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            schema: Some(bike_share_schema()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            schema: None,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MetadataSource for StaticSource {
    async fn introspect(&self) -> Result<RawSchema> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.schema
            .clone()
            .ok_or_else(|| NlqError::SchemaUnavailable("connection refused".to_string()))
    }
}

pub struct Station {
    pub id: i64,
    pub name: &'static str,
}

pub struct Trip {
    pub start_station: i64,
    pub end_station: i64,
    pub started_at: NaiveDateTime,
    pub minutes: f64,
    pub km: f64,
    pub gender: &'static str,
}

pub struct BikeShareData {
    pub stations: Vec<Station>,
    pub trips: Vec<Trip>,
    /// date -> precipitation in mm
    pub weather: BTreeMap<NaiveDate, f64>,
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(h, min, 0))
        .unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

impl BikeShareData {
    /// Three stations, a handful of trips around June 2025, and daily
    /// precipitation for the days those trips happened.
    pub fn sample() -> Self {
        let trip = |start_station, end_station, started_at, minutes, km, gender| Trip {
            start_station,
            end_station,
            started_at,
            minutes,
            km,
            gender,
        };
        Self {
            stations: vec![
                Station {
                    id: 1,
                    name: "Congress Avenue",
                },
                Station {
                    id: 2,
                    name: "Lamar Square",
                },
                Station {
                    id: 3,
                    name: "Riverside Drive",
                },
            ],
            trips: vec![
                trip(1, 2, at(2025, 6, 2, 8, 0), 20.0, 2.5, "female"),
                trip(1, 3, at(2025, 6, 3, 9, 0), 30.0, 3.0, "male"),
                trip(1, 2, at(2025, 6, 10, 17, 30), 25.0, 4.3, "female"),
                trip(2, 1, at(2025, 6, 2, 12, 0), 15.0, 1.2, "male"),
                trip(2, 3, at(2025, 6, 20, 7, 45), 40.0, 5.0, "female"),
                trip(3, 1, at(2025, 6, 5, 18, 0), 12.0, 2.0, "female"),
                trip(1, 2, at(2025, 5, 30, 10, 0), 60.0, 8.0, "female"),
                trip(3, 2, at(2025, 7, 1, 0, 0), 10.0, 1.0, "female"),
            ],
            weather: [
                (day(2025, 5, 30), 0.0),
                (day(2025, 6, 2), 5.2),
                (day(2025, 6, 3), 0.0),
                (day(2025, 6, 5), 0.0),
                (day(2025, 6, 10), 1.1),
                (day(2025, 6, 20), 0.0),
                (day(2025, 7, 1), 0.0),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn station_name(&self, id: i64) -> &'static str {
        self.stations
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name)
            .unwrap_or("unknown")
    }

    fn is_station(&self, name: &str) -> bool {
        self.stations.iter().any(|s| s.name == name)
    }
}

/// Evaluates the aggregate shapes the synthesizer emits against
/// `BikeShareData`. Filters are recognised from the SQL text and the bound
/// parameter types, so LLM-written SQL with a different parameter order is
/// evaluated the same way.
pub struct DatasetRunner {
    data: BikeShareData,
    failure: Option<RunnerError>,
    pub executed: Mutex<Vec<(String, Vec<SqlValue>)>>,
}

impl DatasetRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: BikeShareData::sample(),
            failure: None,
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: RunnerError) -> Arc<Self> {
        Arc::new(Self {
            data: BikeShareData::sample(),
            failure: Some(error),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn executed(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.executed.lock().unwrap().clone()
    }

    fn evaluate(&self, sql: &str, params: &[SqlValue], row_limit: usize) -> std::result::Result<Vec<Row>, RunnerError> {
        let mut window: Vec<NaiveDateTime> = params
            .iter()
            .filter_map(|p| match p {
                SqlValue::Timestamp(ts) => Some(*ts),
                _ => None,
            })
            .collect();
        window.sort();
        let station = params.iter().find_map(|p| match p {
            SqlValue::Text(s) if self.data.is_station(s) => Some(s.as_str()),
            _ => None,
        });
        let gender = params.iter().find_map(|p| match p {
            SqlValue::Text(s) if s == "female" || s == "male" => Some(s.as_str()),
            _ => None,
        });
        let by_end_station = sql.contains("end_station_id = stations.station_id");
        let rainy = sql.contains("precipitation_mm > 0");
        let dry = sql.contains("precipitation_mm = 0");

        let trips: Vec<&Trip> = self
            .data
            .trips
            .iter()
            .filter(|t| match window.as_slice() {
                [start, end] => t.started_at >= *start && t.started_at < *end,
                _ => true,
            })
            .filter(|t| {
                let id = if by_end_station { t.end_station } else { t.start_station };
                station.map_or(true, |s| self.data.station_name(id) == s)
            })
            .filter(|t| gender.map_or(true, |g| t.gender == g))
            .filter(|t| {
                let precipitation = self.data.weather.get(&t.started_at.date());
                match (rainy, dry) {
                    (true, _) => precipitation.is_some_and(|p| *p > 0.0),
                    (_, true) => precipitation.is_some_and(|p| *p == 0.0),
                    _ => true,
                }
            })
            .collect();

        if sql.contains("GROUP BY stations.station_name") {
            let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
            for trip in &trips {
                let id = if by_end_station { trip.end_station } else { trip.start_station };
                *counts.entry(self.data.station_name(id)).or_default() += 1;
            }
            let mut ranked: Vec<(&str, i64)> = counts.into_iter().collect();
            if sql.contains("COUNT(*) ASC") {
                ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)));
            } else {
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
            }
            let limit = if sql.trim_end().ends_with("LIMIT 1") {
                1
            } else {
                params
                    .iter()
                    .find_map(|p| match p {
                        SqlValue::Integer(n) => Some(*n as usize),
                        _ => None,
                    })
                    .unwrap_or(ranked.len())
            };
            let count_alias = AGGREGATE_ALIAS.captures(sql).map(|c| c[1].to_string());
            return Ok(ranked
                .into_iter()
                .take(limit.min(row_limit))
                .map(|(name, count)| {
                    let mut columns = vec![("station_name".to_string(), json!(name))];
                    if let Some(alias) = &count_alias {
                        columns.push((alias.clone(), json!(count)));
                    }
                    Row::new(columns)
                })
                .collect());
        }

        let alias = AGGREGATE_ALIAS
            .captures(sql)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "value".to_string());
        let value = if sql.contains("AVG(EXTRACT(EPOCH") {
            if trips.is_empty() {
                json!(null)
            } else {
                json!(trips.iter().map(|t| t.minutes).sum::<f64>() / trips.len() as f64)
            }
        } else if sql.contains("SUM(trips.trip_distance_km)") {
            json!(trips.iter().map(|t| t.km).sum::<f64>())
        } else if sql.contains("AVG(trips.trip_distance_km)") {
            json!(trips.iter().map(|t| t.km).sum::<f64>() / trips.len().max(1) as f64)
        } else if sql.contains("COUNT(*)") {
            json!(trips.len())
        } else {
            return Err(RunnerError::Database {
                code: Some("42601".to_string()),
                message: format!("unsupported statement in test dataset: {}", sql),
            });
        };
        Ok(vec![Row::new(vec![(alias, value)])])
    }
}

#[async_trait]
impl QueryRunner for DatasetRunner {
    async fn run(
        &self,
        sql: &str,
        params: &[SqlValue],
        options: RunOptions,
    ) -> std::result::Result<Vec<Row>, RunnerError> {
        self.executed
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.evaluate(sql, params, options.row_limit)
    }

    async fn ping(&self) -> std::result::Result<(), RunnerError> {
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Returns a fixed reply to every prompt
pub struct ScriptedLlm {
    pub reply: String,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

pub struct Harness {
    pub pipeline: QueryPipeline,
    pub source: Arc<StaticSource>,
    pub runner: Arc<DatasetRunner>,
}

pub fn harness_with(
    source: Arc<StaticSource>,
    runner: Arc<DatasetRunner>,
    llm: Option<Arc<dyn LlmBackend>>,
    matcher: SemanticMatcher,
    settings: PipelineSettings,
) -> Harness {
    let catalog = Arc::new(SchemaCatalog::new(source.clone(), settings.schema_ttl));
    let synthesizer = QuerySynthesizer::new(
        llm,
        SqlValidator::new(),
        settings.llm_timeout,
        settings.schema_context_budget,
    );
    let executor = QueryExecutor::new(runner.clone(), settings.max_result_rows, settings.statement_timeout);
    Harness {
        pipeline: QueryPipeline::new(catalog, matcher, synthesizer, executor, settings),
        source,
        runner,
    }
}

/// Rule engine only, keyword matching, default settings
pub fn harness() -> Harness {
    harness_with(
        StaticSource::new(),
        DatasetRunner::new(),
        None,
        SemanticMatcher::keyword_only(),
        PipelineSettings::default(),
    )
}

pub fn harness_with_llm(llm: Arc<dyn LlmBackend>) -> Harness {
    harness_with(
        StaticSource::new(),
        DatasetRunner::new(),
        Some(llm),
        SemanticMatcher::keyword_only(),
        PipelineSettings {
            llm_timeout: Duration::from_secs(5),
            ..PipelineSettings::default()
        },
    )
}

pub fn june(d: u32) -> SqlValue {
    SqlValue::Timestamp(at(2025, 6, d, 0, 0))
}

pub fn july_first() -> SqlValue {
    SqlValue::Timestamp(at(2025, 7, 1, 0, 0))
}
