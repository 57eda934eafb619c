//! Natural-language questions over bike-share trip data, answered with
//! validated, parameterized PostgreSQL queries.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod pipeline;
pub mod semantic;
pub mod synth;
pub mod validation;

pub use config::{AppConfig, PipelineSettings};
pub use error::{NlqError, Result};
pub use pipeline::{AnswerEnvelope, QueryPipeline};
