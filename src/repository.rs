//! Capability traits for the I/O boundary, plus an in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::backtest::BacktestSummary;
use crate::error::{EngineError, Result};
use crate::formula::Formula;
use crate::model::{Match, MatchMetricSnapshot, MatchStatus};
use crate::prediction::Prediction;

/// Supplies pre-match metric values.
pub trait SnapshotProvider {
    fn snapshot(&self, match_id: &str) -> Result<MatchMetricSnapshot>;
}

/// Storage for formulas, predictions and backtest results.
pub trait FormulaRepository {
    fn load_formula(&self, id: &str) -> Result<Formula>;
    /// Every formula owned by `user_id`, ordered by name then id.
    fn list_formulas(&self, user_id: &str) -> Result<Vec<Formula>>;
    /// Public and template formulas from any user, ordered by name then id.
    fn list_shared_formulas(&self) -> Result<Vec<Formula>>;
    fn save_backtest_summary(&self, formula_id: &str, summary: &BacktestSummary) -> Result<()>;
    fn save_prediction(&self, prediction: &Prediction) -> Result<()>;
    /// Completed matches with results, ordered by kickoff then id.
    fn list_completed_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFilter {
    #[serde(default)]
    pub season: Option<u16>,
    #[serde(default)]
    pub from_round: Option<u16>,
    #[serde(default)]
    pub to_round: Option<u16>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl MatchFilter {
    pub fn season(season: u16) -> Self {
        Self {
            season: Some(season),
            ..Self::default()
        }
    }

    pub fn accepts(&self, m: &Match) -> bool {
        if m.completed_result().is_none() {
            return false;
        }
        if let Some(season) = self.season
            && m.season != season
        {
            return false;
        }
        if let Some(from) = self.from_round
            && m.round < from
        {
            return false;
        }
        if let Some(to) = self.to_round
            && m.round > to
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    formulas: HashMap<String, Formula>,
    matches: HashMap<String, Match>,
    snapshots: HashMap<String, MatchMetricSnapshot>,
    predictions: Vec<Prediction>,
    summaries: Vec<(String, BacktestSummary)>,
}

/// Process-local store used by tests, benches and the synthetic demo.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_formula(&self, formula: Formula) {
        self.lock().formulas.insert(formula.id.clone(), formula);
    }

    pub fn insert_match(&self, m: Match) {
        self.lock().matches.insert(m.id.clone(), m);
    }

    pub fn insert_snapshot(&self, snapshot: MatchMetricSnapshot) {
        self.lock()
            .snapshots
            .insert(snapshot.match_id.clone(), snapshot);
    }

    pub fn predictions(&self) -> Vec<Prediction> {
        self.lock().predictions.clone()
    }

    /// Every summary saved so far, oldest first.
    pub fn summaries(&self) -> Vec<(String, BacktestSummary)> {
        self.lock().summaries.clone()
    }

    fn collect_formulas(&self, keep: impl Fn(&Formula) -> bool) -> Vec<Formula> {
        let mut out = self
            .lock()
            .formulas
            .values()
            .filter(|f| keep(f))
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotProvider for MemoryStore {
    fn snapshot(&self, match_id: &str) -> Result<MatchMetricSnapshot> {
        self.lock()
            .snapshots
            .get(match_id)
            .cloned()
            .ok_or_else(|| EngineError::SnapshotUnavailable(match_id.to_string()))
    }
}

impl FormulaRepository for MemoryStore {
    fn load_formula(&self, id: &str) -> Result<Formula> {
        self.lock()
            .formulas
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::FormulaNotFound(id.to_string()))
    }

    fn list_formulas(&self, user_id: &str) -> Result<Vec<Formula>> {
        Ok(self.collect_formulas(|f| f.user_id == user_id))
    }

    fn list_shared_formulas(&self) -> Result<Vec<Formula>> {
        Ok(self.collect_formulas(|f| f.is_public || f.is_template))
    }

    fn save_backtest_summary(&self, formula_id: &str, summary: &BacktestSummary) -> Result<()> {
        let mut inner = self.lock();
        let Some(formula) = inner.formulas.get_mut(formula_id) else {
            return Err(EngineError::FormulaNotFound(formula_id.to_string()));
        };
        formula.backtest_results = Some(*summary);
        inner.summaries.push((formula_id.to_string(), *summary));
        Ok(())
    }

    fn save_prediction(&self, prediction: &Prediction) -> Result<()> {
        self.lock().predictions.push(prediction.clone());
        Ok(())
    }

    fn list_completed_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>> {
        let inner = self.lock();
        let mut out = inner
            .matches
            .values()
            .filter(|m| m.status == MatchStatus::Completed && filter.accepts(m))
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.kickoff.cmp(&b.kickoff).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
