//! Rules-based match prediction engine.
//!
//! Users build weighted [`formula::Formula`]s over match metrics. The
//! [`evaluator`] turns a formula plus one match's metric snapshot into a
//! [`prediction::Prediction`]; the [`backtest`] runner replays a formula over
//! completed matches to measure accuracy and simulated profit.

pub mod backtest;
pub mod condition;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod metric;
pub mod model;
pub mod prediction;
pub mod repository;
pub mod service;
pub mod store;
pub mod synthetic;

pub use backtest::{BacktestRunner, BacktestStep, BacktestSummary, HistoricalMatch, run_backtest};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use evaluator::evaluate;
pub use formula::{Formula, FormulaTerm, TermOperator};
pub use metric::{MetricDefinition, MetricRegistry};
pub use model::{Match, MatchMetricSnapshot, MatchResult, Side};
pub use prediction::{Prediction, PredictionResult};
