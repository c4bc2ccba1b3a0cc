//! Replays a formula over completed matches and accumulates accuracy and
//! simulated profit.
//!
//! Matches must be fed in kickoff order. Each one is scored with the pure
//! evaluator; a match that cannot be evaluated (missing metric, leaked
//! snapshot, ...) is counted as skipped instead of aborting the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::evaluator;
use crate::formula::Formula;
use crate::metric::MetricRegistry;
use crate::model::{MatchMetricSnapshot, MatchResult, Winner};
use crate::prediction::Prediction;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub total_games: usize,
    pub skipped_games: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    pub avg_confidence: f64,
    pub profit_loss: f64,
    pub roi: f64,
    #[serde(default)]
    pub avg_margin_error: f64,
    #[serde(default)]
    pub brier_score: f64,
    #[serde(default)]
    pub max_drawdown: f64,
}

/// A completed match with the metric snapshot as it stood before kickoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalMatch {
    pub match_id: String,
    pub kickoff: DateTime<Utc>,
    pub snapshot: MatchMetricSnapshot,
    pub result: MatchResult,
}

/// Outcome of feeding one match to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum BacktestStep {
    /// Settled prediction (its `result` is filled in).
    Scored(Prediction),
    Skipped(EngineError),
}

#[derive(Debug, Clone, Default)]
struct Tally {
    total: usize,
    skipped: usize,
    correct: usize,
    confidence_sum: f64,
    margin_error_sum: f64,
    brier_sum: f64,
    profit_loss: f64,
    peak: f64,
    max_drawdown: f64,
}

pub struct BacktestRunner<'a> {
    formula: &'a Formula,
    registry: &'a MetricRegistry,
    cfg: EngineConfig,
    tally: Tally,
    last: Option<(DateTime<Utc>, String)>,
}

impl<'a> BacktestRunner<'a> {
    pub fn new(
        formula: &'a Formula,
        registry: &'a MetricRegistry,
        cfg: EngineConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        formula.validate_against(registry)?;
        Ok(Self {
            formula,
            registry,
            cfg,
            tally: Tally::default(),
            last: None,
        })
    }

    /// Scores one match. Evaluation failures become [`BacktestStep::Skipped`];
    /// only an ordering violation is returned as an error.
    pub fn record(&mut self, m: &HistoricalMatch) -> Result<BacktestStep> {
        if let Some((prev_kickoff, prev_id)) = &self.last
            && m.kickoff < *prev_kickoff
        {
            return Err(EngineError::OutOfOrder {
                match_id: m.match_id.clone(),
                previous: prev_id.clone(),
            });
        }
        self.last = Some((m.kickoff, m.match_id.clone()));

        let prediction = m
            .snapshot
            .ensure_pre_match(m.kickoff)
            .and_then(|_| evaluator::evaluate(self.formula, self.registry, &m.snapshot, &self.cfg));
        let prediction = match prediction {
            Ok(p) => p,
            Err(err) => {
                self.skip(&m.match_id, &err);
                return Ok(BacktestStep::Skipped(err));
            }
        };

        let prediction = prediction.with_result(&m.result);
        self.tally_prediction(&prediction, &m.result);
        Ok(BacktestStep::Scored(prediction))
    }

    /// Counts a match that never reached the evaluator.
    pub fn skip(&mut self, match_id: &str, reason: &EngineError) {
        debug!(formula = %self.formula.id, match_id, %reason, "backtest match skipped");
        self.tally.skipped += 1;
    }

    fn tally_prediction(&mut self, p: &Prediction, result: &MatchResult) {
        let Some(settled) = p.result else {
            return;
        };
        let t = &mut self.tally;
        t.total += 1;
        if settled.correct {
            t.correct += 1;
        }
        t.confidence_sum += p.confidence;
        t.margin_error_sum += settled.margin_error;

        let home_won = if result.winner() == Winner::Home { 1.0 } else { 0.0 };
        t.brier_sum += (p.probability.home - home_won).powi(2);

        // Fair decimal odds from the model's own probability for its pick.
        let stake = self.cfg.stake_unit;
        let p_pick = p.probability.of(p.predicted_winner).max(1e-12);
        let payoff = if settled.correct {
            stake * (1.0 / p_pick - 1.0)
        } else {
            -stake
        };
        t.profit_loss += payoff;
        t.peak = t.peak.max(t.profit_loss);
        t.max_drawdown = t.max_drawdown.max(t.peak - t.profit_loss);
    }

    pub fn scored(&self) -> usize {
        self.tally.total
    }

    pub fn skipped(&self) -> usize {
        self.tally.skipped
    }

    /// Summary of everything recorded so far. Safe to call mid-run.
    pub fn summary(&self) -> Result<BacktestSummary> {
        let t = &self.tally;
        if t.total == 0 {
            return Err(EngineError::EmptyBacktestSet);
        }
        let n = t.total as f64;
        Ok(BacktestSummary {
            total_games: t.total,
            skipped_games: t.skipped,
            correct_predictions: t.correct,
            accuracy: t.correct as f64 / n,
            avg_confidence: t.confidence_sum / n,
            profit_loss: t.profit_loss,
            roi: t.profit_loss / (n * self.cfg.stake_unit),
            avg_margin_error: t.margin_error_sum / n,
            brier_score: t.brier_sum / n,
            max_drawdown: t.max_drawdown,
        })
    }

    pub fn finish(self) -> Result<BacktestSummary> {
        let summary = self.summary();
        match &summary {
            Ok(s) => info!(
                formula = %self.formula.id,
                games = s.total_games,
                skipped = s.skipped_games,
                accuracy = s.accuracy,
                roi = s.roi,
                "backtest complete"
            ),
            Err(_) => info!(
                formula = %self.formula.id,
                skipped = self.tally.skipped,
                "backtest produced no scored games"
            ),
        }
        summary
    }
}

/// Runs a full backtest over `matches`, sorted by kickoff then id.
pub fn run_backtest(
    formula: &Formula,
    registry: &MetricRegistry,
    matches: &[HistoricalMatch],
    cfg: &EngineConfig,
) -> Result<BacktestSummary> {
    let mut ordered = matches.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| a.kickoff.cmp(&b.kickoff).then(a.match_id.cmp(&b.match_id)));

    let mut runner = BacktestRunner::new(formula, registry, *cfg)?;
    for m in ordered {
        runner.record(m)?;
    }
    runner.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaTerm;
    use crate::metric::{MetricCategory, MetricDataType, MetricDefinition};
    use chrono::{Duration, TimeZone};

    fn registry() -> MetricRegistry {
        MetricRegistry::from_definitions([MetricDefinition::new(
            "edge",
            "Edge",
            MetricCategory::Form,
            MetricDataType::Number,
        )])
        .unwrap()
    }

    fn formula() -> Formula {
        Formula::new("f1", "u1", "Edge", vec![FormulaTerm::add("edge", 1.0)], 0.5).unwrap()
    }

    fn game(idx: i64, edge: Option<f64>, home: u32, away: u32) -> HistoricalMatch {
        let kickoff = Utc.with_ymd_and_hms(2024, 3, 7, 8, 0, 0).unwrap() + Duration::days(7 * idx);
        let id = format!("m{idx}");
        let mut snapshot = MatchMetricSnapshot::new(&id).with_as_of(kickoff - Duration::hours(6));
        if let Some(v) = edge {
            snapshot = snapshot.with_value("edge", v);
        }
        HistoricalMatch {
            match_id: id,
            kickoff,
            snapshot,
            result: MatchResult::new(home, away),
        }
    }

    #[test]
    fn two_right_one_wrong() {
        let games = vec![
            game(0, Some(1.0), 90, 70),
            game(1, Some(1.0), 80, 60),
            game(2, Some(1.0), 50, 70),
        ];
        let s = run_backtest(&formula(), &registry(), &games, &EngineConfig::default()).unwrap();
        assert_eq!(s.total_games, 3);
        assert_eq!(s.correct_predictions, 2);
        assert!((s.accuracy - 0.667).abs() < 1e-3);
        assert_eq!(s.skipped_games, 0);

        let p = evaluator::sigmoid(1.0);
        let expected_pl = 2.0 * (1.0 / p - 1.0) - 1.0;
        assert!((s.profit_loss - expected_pl).abs() < 1e-12);
        assert!((s.roi - expected_pl / 3.0).abs() < 1e-12);
        assert!((s.max_drawdown - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_set_is_an_error() {
        assert_eq!(
            run_backtest(&formula(), &registry(), &[], &EngineConfig::default()),
            Err(EngineError::EmptyBacktestSet)
        );
    }

    #[test]
    fn failing_matches_are_skipped_not_fatal() {
        let games = vec![
            game(0, Some(1.0), 90, 70),
            game(1, None, 80, 60),
            game(2, Some(-1.0), 50, 70),
        ];
        let s = run_backtest(&formula(), &registry(), &games, &EngineConfig::default()).unwrap();
        assert_eq!(s.total_games, 2);
        assert_eq!(s.skipped_games, 1);
        assert_eq!(s.correct_predictions, 2);
    }

    #[test]
    fn overflowing_score_is_skipped_and_summary_stays_finite() {
        let games = vec![game(0, Some(f64::MAX), 90, 70), game(1, Some(1.0), 90, 70)];
        let s = run_backtest(&formula(), &registry(), &games, &EngineConfig::default()).unwrap();
        assert_eq!(s.total_games, 1);
        assert_eq!(s.skipped_games, 1);
        for v in [s.accuracy, s.avg_confidence, s.avg_margin_error, s.brier_score, s.roi] {
            assert!(v.is_finite());
        }
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(serde_json::from_str::<BacktestSummary>(&json).unwrap().total_games, 1);
    }

    #[test]
    fn leaked_snapshot_is_skipped() {
        let mut leaked = game(0, Some(1.0), 90, 70);
        leaked.snapshot.as_of = Some(leaked.kickoff + Duration::hours(3));
        let games = vec![leaked, game(1, Some(1.0), 90, 70)];
        let s = run_backtest(&formula(), &registry(), &games, &EngineConfig::default()).unwrap();
        assert_eq!(s.total_games, 1);
        assert_eq!(s.skipped_games, 1);
    }

    #[test]
    fn batch_runner_sorts_by_kickoff() {
        let ordered = vec![
            game(0, Some(2.0), 90, 70),
            game(1, Some(-0.5), 90, 70),
            game(2, Some(0.3), 60, 70),
        ];
        let mut shuffled = ordered.clone();
        shuffled.reverse();
        let cfg = EngineConfig::default();
        let a = run_backtest(&formula(), &registry(), &ordered, &cfg).unwrap();
        let b = run_backtest(&formula(), &registry(), &shuffled, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn streaming_runner_rejects_out_of_order() {
        let f = formula();
        let reg = registry();
        let mut runner = BacktestRunner::new(&f, &reg, EngineConfig::default()).unwrap();
        runner.record(&game(3, Some(1.0), 1, 0)).unwrap();
        assert!(matches!(
            runner.record(&game(1, Some(1.0), 1, 0)),
            Err(EngineError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn prefix_summary_survives_early_stop() {
        let f = formula();
        let reg = registry();
        let mut runner = BacktestRunner::new(&f, &reg, EngineConfig::default()).unwrap();
        assert_eq!(runner.summary(), Err(EngineError::EmptyBacktestSet));

        let step = runner.record(&game(0, Some(1.0), 90, 70)).unwrap();
        let BacktestStep::Scored(p) = step else {
            panic!("expected a scored step");
        };
        assert!(p.result.is_some_and(|r| r.correct));

        let prefix = runner.summary().unwrap();
        assert_eq!(prefix.total_games, 1);
        assert_eq!(prefix.accuracy, 1.0);

        runner.record(&game(1, Some(1.0), 10, 70)).unwrap();
        let full = runner.finish().unwrap();
        assert_eq!(full.total_games, 2);
        assert_eq!(prefix.total_games, 1);
    }

    #[test]
    fn rerun_is_bit_identical() {
        let games = (0..12)
            .map(|i| game(i, Some((i as f64 * 0.37).sin()), 60 + i as u32, 70))
            .collect::<Vec<_>>();
        let cfg = EngineConfig::default();
        let a = run_backtest(&formula(), &registry(), &games, &cfg).unwrap();
        let b = run_backtest(&formula(), &registry(), &games, &cfg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.profit_loss.to_bits(), b.profit_loss.to_bits());
    }

    #[test]
    fn unknown_metric_fails_before_the_run() {
        let f = Formula::new("f2", "u1", "Bad", vec![FormulaTerm::add("nope", 1.0)], 0.5).unwrap();
        assert!(matches!(
            run_backtest(&f, &registry(), &[game(0, Some(1.0), 1, 0)], &EngineConfig::default()),
            Err(EngineError::UnknownMetric(_))
        ));
    }
}
