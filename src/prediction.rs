use serde::{Deserialize, Serialize};

use crate::model::{MatchResult, Side};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probability {
    pub home: f64,
    pub away: f64,
}

impl Probability {
    pub fn from_home(home: f64) -> Self {
        let home = home.clamp(0.0, 1.0);
        Self {
            home,
            away: 1.0 - home,
        }
    }

    pub fn of(&self, side: Side) -> f64 {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }

    pub fn favourite(&self) -> Side {
        if self.home >= 0.5 { Side::Home } else { Side::Away }
    }
}

/// One term's share of the final score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionMetric {
    pub metric_id: String,
    pub metric_name: String,
    /// Effective value after any condition modifier.
    pub value: f64,
    pub weight: f64,
    /// Score after this term minus score before it.
    pub contribution: f64,
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub correct: bool,
    /// Final margin from the predicted winner's point of view.
    pub actual_margin: f64,
    pub margin_error: f64,
    pub confidence_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub formula_id: String,
    pub match_id: String,
    pub predicted_winner: Side,
    /// Expected points margin in favour of `predicted_winner`.
    pub predicted_margin: f64,
    pub confidence: f64,
    pub probability: Probability,
    /// Raw formula score before normalisation.
    pub score: f64,
    pub metrics: Vec<PredictionMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PredictionResult>,
}

impl Prediction {
    /// Grades the prediction against the final score.
    ///
    /// A draw is never a correct call since only home/away can be predicted.
    pub fn settle(&self, result: &MatchResult) -> PredictionResult {
        let correct = result.winner().is(self.predicted_winner);
        let actual_margin = match self.predicted_winner {
            Side::Home => result.margin(),
            Side::Away => -result.margin(),
        };
        let y = if correct { 1.0 } else { 0.0 };
        PredictionResult {
            correct,
            actual_margin,
            margin_error: (self.predicted_margin - actual_margin).abs(),
            confidence_accuracy: 1.0 - (self.confidence - y).abs(),
        }
    }

    pub fn with_result(mut self, result: &MatchResult) -> Self {
        self.result = Some(self.settle(result));
        self
    }

    pub fn skipped_terms(&self) -> usize {
        self.metrics.iter().filter(|m| m.skipped).count()
    }
}
