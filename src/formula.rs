use serde::{Deserialize, Serialize};

use crate::backtest::BacktestSummary;
use crate::condition::Condition;
use crate::error::{EngineError, Result};
use crate::metric::MetricRegistry;

/// How a term's weighted value folds into the running score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaTerm {
    pub metric_id: String,
    pub weight: f64,
    pub operator: TermOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl FormulaTerm {
    pub fn new(metric_id: &str, weight: f64, operator: TermOperator) -> Self {
        Self {
            metric_id: metric_id.to_string(),
            weight,
            operator,
            condition: None,
        }
    }

    pub fn add(metric_id: &str, weight: f64) -> Self {
        Self::new(metric_id, weight, TermOperator::Add)
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formula {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered terms. Order matters for multiply/divide chains.
    #[serde(rename = "metrics")]
    pub terms: Vec<FormulaTerm>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_template: bool,
    /// Prior confidence in [0, 1].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest_results: Option<BacktestSummary>,
}

impl Formula {
    pub fn new(
        id: &str,
        user_id: &str,
        name: &str,
        terms: Vec<FormulaTerm>,
        confidence: f64,
    ) -> Result<Self> {
        let formula = Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: None,
            terms,
            is_public: false,
            is_template: false,
            confidence,
            backtest_results: None,
        };
        formula.validate()?;
        Ok(formula)
    }

    /// Structural checks that need no metric catalog.
    pub fn validate(&self) -> Result<()> {
        if self.terms.is_empty() {
            return Err(EngineError::EmptyFormula(self.id.clone()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(EngineError::InvalidConfidence {
                id: self.id.clone(),
                confidence: self.confidence,
            });
        }
        for term in &self.terms {
            if !term.weight.is_finite() {
                return Err(EngineError::InvalidWeight {
                    metric_id: term.metric_id.clone(),
                    weight: term.weight,
                });
            }
            if let Some(cond) = &term.condition {
                cond.validate()?;
            }
        }
        Ok(())
    }

    /// [`Formula::validate`] plus a check that every term names a known metric.
    pub fn validate_against(&self, registry: &MetricRegistry) -> Result<()> {
        self.validate()?;
        for term in &self.terms {
            registry.lookup(&term.metric_id)?;
        }
        Ok(())
    }

    /// Metric ids in term order, without duplicates.
    pub fn metric_ids(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            if !out.contains(&term.metric_id.as_str()) {
                out.push(&term.metric_id);
            }
        }
        out
    }
}
