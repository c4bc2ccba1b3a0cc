//! Error types for the formula engine.

use thiserror::Error;

/// Every failure the engine and its storage adapters can report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A metric with this id is already registered
    #[error("duplicate metric: {0}")]
    DuplicateMetric(String),

    /// No metric with this id is registered
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    /// Metric definition has min > max
    #[error("invalid range for metric {id}: min {min} > max {max}")]
    InvalidRange { id: String, min: f64, max: f64 },

    /// Value does not fit the metric's data type or range
    #[error("invalid value {value} for metric {id}: {reason}")]
    InvalidMetricValue {
        id: String,
        value: f64,
        reason: String,
    },

    /// Condition shape does not match its operator/type
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// Snapshot has no value for a metric the formula needs
    #[error("missing metric {metric_id} in snapshot for match {match_id}")]
    MissingMetric { match_id: String, metric_id: String },

    /// A divide term evaluated to an effectively zero divisor
    #[error("division by zero in term for metric {0}")]
    DivisionByZero(String),

    /// Running score overflowed to infinity or NaN
    #[error("formula score is not finite after term for metric {0}")]
    NonFiniteScore(String),

    /// Term weight is NaN or infinite
    #[error("term for metric {metric_id} has non-finite weight {weight}")]
    InvalidWeight { metric_id: String, weight: f64 },

    /// Formula has no terms
    #[error("formula {0} has no terms")]
    EmptyFormula(String),

    /// Formula prior confidence outside [0, 1]
    #[error("formula {id} confidence {confidence} is outside [0, 1]")]
    InvalidConfidence { id: String, confidence: f64 },

    /// Engine configuration out of bounds
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    /// Snapshot provider has nothing for this match
    #[error("snapshot unavailable for match {0}")]
    SnapshotUnavailable(String),

    /// Snapshot was taken after the match started
    #[error("snapshot for match {0} was taken after kickoff")]
    SnapshotAfterKickoff(String),

    /// Match arrived out of chronological order
    #[error("match {match_id} kicks off before previously processed match {previous}")]
    OutOfOrder { match_id: String, previous: String },

    /// Backtest finished without a single scored game
    #[error("backtest set is empty")]
    EmptyBacktestSet,

    /// Repository has no formula with this id
    #[error("formula not found: {0}")]
    FormulaNotFound(String),

    /// Storage adapter failure
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Whether the error stems from the shape of caller input rather than
    /// data availability.
    pub fn is_client_error(&self) -> bool {
        match self {
            EngineError::DuplicateMetric(_)
            | EngineError::UnknownMetric(_)
            | EngineError::InvalidRange { .. }
            | EngineError::InvalidMetricValue { .. }
            | EngineError::InvalidCondition(_)
            | EngineError::DivisionByZero(_)
            | EngineError::NonFiniteScore(_)
            | EngineError::InvalidWeight { .. }
            | EngineError::EmptyFormula(_)
            | EngineError::InvalidConfidence { .. }
            | EngineError::InvalidConfig(_)
            | EngineError::FormulaNotFound(_)
            | EngineError::OutOfOrder { .. } => true,
            EngineError::MissingMetric { .. }
            | EngineError::SnapshotUnavailable(_)
            | EngineError::SnapshotAfterKickoff(_)
            | EngineError::EmptyBacktestSet
            | EngineError::Storage(_) => false,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_errors_are_client_errors() {
        assert!(EngineError::EmptyFormula("f".to_string()).is_client_error());
        assert!(EngineError::InvalidCondition("bad".to_string()).is_client_error());
        assert!(!EngineError::SnapshotUnavailable("m".to_string()).is_client_error());
        assert!(!EngineError::EmptyBacktestSet.is_client_error());
    }

    #[test]
    fn display_names_the_metric() {
        let err = EngineError::MissingMetric {
            match_id: "m1".to_string(),
            metric_id: "possession".to_string(),
        };
        assert!(err.to_string().contains("possession"));
        assert!(err.to_string().contains("m1"));
    }
}
