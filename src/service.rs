//! Use cases that glue the repository, the snapshot provider and the pure
//! engine together. All I/O happens here, before or after the engine runs.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::backtest::{BacktestRunner, BacktestSummary, HistoricalMatch};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::evaluator;
use crate::formula::Formula;
use crate::metric::MetricRegistry;
use crate::prediction::Prediction;
use crate::repository::{FormulaRepository, MatchFilter, SnapshotProvider};

/// Completed matches paired with their snapshots, plus the ones whose
/// snapshot could not be fetched.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub matches: Vec<HistoricalMatch>,
    pub unavailable: Vec<(String, EngineError)>,
}

/// Predicts one match with a stored formula and persists the prediction.
pub fn predict_match<R, S>(
    repo: &R,
    snapshots: &S,
    registry: &MetricRegistry,
    formula_id: &str,
    match_id: &str,
    cfg: &EngineConfig,
) -> Result<Prediction>
where
    R: FormulaRepository,
    S: SnapshotProvider,
{
    cfg.validate()?;
    let formula = repo.load_formula(formula_id)?;
    let snapshot = snapshots.snapshot(match_id)?;
    let prediction = evaluator::evaluate(&formula, registry, &snapshot, cfg)?;
    repo.save_prediction(&prediction)?;
    debug!(formula_id, match_id, winner = ?prediction.predicted_winner, "prediction saved");
    Ok(prediction)
}

/// Loads completed matches in kickoff order with their pre-match snapshots.
pub fn load_history<R, S>(repo: &R, snapshots: &S, filter: &MatchFilter) -> Result<History>
where
    R: FormulaRepository,
    S: SnapshotProvider,
{
    let mut history = History::default();
    for m in repo.list_completed_matches(filter)? {
        let Some(result) = m.completed_result() else {
            continue;
        };
        match snapshots.snapshot(&m.id) {
            Ok(snapshot) => history.matches.push(HistoricalMatch {
                match_id: m.id,
                kickoff: m.kickoff,
                snapshot,
                result,
            }),
            Err(err @ EngineError::SnapshotUnavailable(_)) => {
                history.unavailable.push((m.id, err));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(history)
}

/// Replays `formula` over an already loaded history.
pub fn backtest_history(
    formula: &Formula,
    registry: &MetricRegistry,
    history: &History,
    cfg: &EngineConfig,
) -> Result<BacktestSummary> {
    let mut runner = BacktestRunner::new(formula, registry, *cfg)?;
    for (match_id, err) in &history.unavailable {
        runner.skip(match_id, err);
    }
    for m in &history.matches {
        runner.record(m)?;
    }
    runner.finish()
}

/// Backtests a stored formula and caches the summary on it.
pub fn backtest_formula<R, S>(
    repo: &R,
    snapshots: &S,
    registry: &MetricRegistry,
    formula_id: &str,
    filter: &MatchFilter,
    cfg: &EngineConfig,
) -> Result<BacktestSummary>
where
    R: FormulaRepository,
    S: SnapshotProvider,
{
    let formula = repo.load_formula(formula_id)?;
    let history = load_history(repo, snapshots, filter)?;
    let summary = backtest_history(&formula, registry, &history, cfg)?;
    repo.save_backtest_summary(formula_id, &summary)?;
    Ok(summary)
}

/// Backtests several formulas over the same history in parallel.
///
/// Each formula gets its own result; one failing formula does not affect
/// the others. Summaries that succeed are saved.
pub fn backtest_many<R, S>(
    repo: &R,
    snapshots: &S,
    registry: &MetricRegistry,
    formula_ids: &[String],
    filter: &MatchFilter,
    cfg: &EngineConfig,
) -> Result<Vec<(String, Result<BacktestSummary>)>>
where
    R: FormulaRepository + Sync,
    S: SnapshotProvider,
{
    let history = load_history(repo, snapshots, filter)?;
    let results = formula_ids
        .par_iter()
        .map(|id| {
            let outcome = repo
                .load_formula(id)
                .and_then(|formula| backtest_history(&formula, registry, &history, cfg))
                .and_then(|summary| {
                    repo.save_backtest_summary(id, &summary)?;
                    Ok(summary)
                });
            if let Err(err) = &outcome {
                warn!(formula_id = %id, %err, "backtest failed");
            }
            (id.clone(), outcome)
        })
        .collect::<Vec<_>>();
    Ok(results)
}
