use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Home,
    Away,
    Draw,
}

impl Winner {
    pub fn is(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Winner::Home, Side::Home) | (Winner::Away, Side::Away)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Completed,
    Postponed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub home_score: u32,
    pub away_score: u32,
}

impl MatchResult {
    pub fn new(home_score: u32, away_score: u32) -> Self {
        Self {
            home_score,
            away_score,
        }
    }

    pub fn winner(&self) -> Winner {
        if self.home_score > self.away_score {
            Winner::Home
        } else if self.home_score < self.away_score {
            Winner::Away
        } else {
            Winner::Draw
        }
    }

    /// Home score minus away score.
    pub fn margin(&self) -> f64 {
        self.home_score as f64 - self.away_score as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub season: u16,
    pub round: u16,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub venue: String,
    pub kickoff: DateTime<Utc>,
    pub status: MatchStatus,
    #[serde(default)]
    pub result: Option<MatchResult>,
}

impl Match {
    /// Completed with a recorded result.
    pub fn completed_result(&self) -> Option<MatchResult> {
        if self.status != MatchStatus::Completed {
            return None;
        }
        self.result
    }
}

/// Metric values known for one match at prediction time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMetricSnapshot {
    pub match_id: String,
    /// When the values were computed. Must not be after kickoff for backtests.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    pub values: HashMap<String, f64>,
}

impl MatchMetricSnapshot {
    pub fn new(match_id: &str) -> Self {
        Self {
            match_id: match_id.to_string(),
            as_of: None,
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, metric_id: &str, value: f64) -> Self {
        self.values.insert(metric_id.to_string(), value);
        self
    }

    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn get(&self, metric_id: &str) -> Result<f64> {
        self.values
            .get(metric_id)
            .copied()
            .ok_or_else(|| EngineError::MissingMetric {
                match_id: self.match_id.clone(),
                metric_id: metric_id.to_string(),
            })
    }

    /// Fails when the snapshot was computed after `kickoff`.
    pub fn ensure_pre_match(&self, kickoff: DateTime<Utc>) -> Result<()> {
        match self.as_of {
            Some(as_of) if as_of > kickoff => {
                Err(EngineError::SnapshotAfterKickoff(self.match_id.clone()))
            }
            _ => Ok(()),
        }
    }
}
