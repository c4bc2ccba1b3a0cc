use crate::condition::TermAction;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::formula::{Formula, FormulaTerm, TermOperator};
use crate::metric::MetricRegistry;
use crate::model::MatchMetricSnapshot;
use crate::prediction::{Prediction, PredictionMetric, Probability};

/// Accumulator carried through the term fold.
#[derive(Debug, Clone, Default)]
struct Fold {
    score: f64,
    contributions: Vec<PredictionMetric>,
}

/// Evaluates `formula` against one match's metric snapshot.
///
/// Pure: identical inputs give a bit-identical [`Prediction`]. The returned
/// value carries no id or timestamp; the persistence layer assigns those.
pub fn evaluate(
    formula: &Formula,
    registry: &MetricRegistry,
    snapshot: &MatchMetricSnapshot,
    cfg: &EngineConfig,
) -> Result<Prediction> {
    formula.validate()?;

    let init = Fold {
        score: 0.0,
        contributions: Vec::with_capacity(formula.terms.len()),
    };
    let fold = formula
        .terms
        .iter()
        .try_fold(init, |acc, term| apply_term(acc, term, registry, snapshot))?;

    let probability = Probability::from_home(sigmoid(cfg.sigmoid_steepness * fold.score));
    let predicted_winner = probability.favourite();
    let predicted_margin = fold.score.abs() * cfg.margin_scale;
    if !predicted_margin.is_finite() {
        return Err(EngineError::NonFiniteScore(
            formula.terms.last().map(|t| t.metric_id.clone()).unwrap_or_default(),
        ));
    }
    let confidence = blend_confidence(&probability, formula.confidence, cfg.confidence_blend);

    Ok(Prediction {
        formula_id: formula.id.clone(),
        match_id: snapshot.match_id.clone(),
        predicted_winner,
        predicted_margin,
        confidence,
        probability,
        score: fold.score,
        metrics: fold.contributions,
        result: None,
    })
}

fn apply_term(
    mut acc: Fold,
    term: &FormulaTerm,
    registry: &MetricRegistry,
    snapshot: &MatchMetricSnapshot,
) -> Result<Fold> {
    let def = registry.lookup(&term.metric_id)?;
    let raw = snapshot.get(&term.metric_id)?;
    def.validate_value(raw)?;

    let action = match &term.condition {
        Some(cond) => cond.evaluate(raw)?,
        None => TermAction::Include,
    };

    let value = match action {
        TermAction::Exclude => {
            acc.contributions.push(PredictionMetric {
                metric_id: term.metric_id.clone(),
                metric_name: def.name.clone(),
                value: raw,
                weight: term.weight,
                contribution: 0.0,
                skipped: true,
            });
            return Ok(acc);
        }
        TermAction::Include => raw,
        TermAction::Modify { delta } => raw + delta,
    };

    let before = acc.score;
    acc.score = combine(before, term, value)?;
    acc.contributions.push(PredictionMetric {
        metric_id: term.metric_id.clone(),
        metric_name: def.name.clone(),
        value,
        weight: term.weight,
        contribution: acc.score - before,
        skipped: false,
    });
    Ok(acc)
}

fn combine(score: f64, term: &FormulaTerm, value: f64) -> Result<f64> {
    let weighted = term.weight * value;
    let next = match term.operator {
        TermOperator::Add => score + weighted,
        TermOperator::Subtract => score - weighted,
        // Multiplying a zero score would pin the formula at zero forever.
        TermOperator::Multiply if score == 0.0 => weighted,
        TermOperator::Multiply => score * weighted,
        TermOperator::Divide => {
            if weighted.abs() < f64::EPSILON {
                return Err(EngineError::DivisionByZero(term.metric_id.clone()));
            }
            score / weighted
        }
    };
    if !next.is_finite() {
        return Err(EngineError::NonFiniteScore(term.metric_id.clone()));
    }
    Ok(next)
}

/// Logistic squash; 0 maps to 0.5.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn blend_confidence(probability: &Probability, prior: f64, blend: f64) -> f64 {
    let single = probability.home.max(probability.away).clamp(0.0, 1.0);
    let blend = blend.clamp(0.0, 1.0);
    (blend * single + (1.0 - blend) * prior).clamp(0.0, 1.0)
}
