use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Threshold,
    Range,
    Comparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "between")]
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Scalar(f64),
    Pair([f64; 2]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionAction {
    Include,
    Exclude,
    Modify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub operator: ComparisonOperator,
    pub value: ConditionValue,
    pub action: ConditionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<f64>,
}

/// What a condition tells the evaluator to do with a term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TermAction {
    /// Use the raw value.
    Include,
    /// Contribute nothing; the term is reported as skipped.
    Exclude,
    /// Add `delta` to the raw value before weighting.
    Modify { delta: f64 },
}

impl Condition {
    pub fn threshold(operator: ComparisonOperator, value: f64, action: ConditionAction) -> Self {
        Self {
            kind: ConditionKind::Threshold,
            operator,
            value: ConditionValue::Scalar(value),
            action,
            modifier: None,
        }
    }

    pub fn between(low: f64, high: f64, action: ConditionAction) -> Self {
        Self {
            kind: ConditionKind::Range,
            operator: ComparisonOperator::Between,
            value: ConditionValue::Pair([low, high]),
            action,
            modifier: None,
        }
    }

    pub fn with_modifier(mut self, modifier: f64) -> Self {
        self.modifier = Some(modifier);
        self
    }

    /// Checks that operator, type and value agree with each other.
    pub fn validate(&self) -> Result<()> {
        let ranged = self.kind == ConditionKind::Range
            || self.operator == ComparisonOperator::Between;
        match (ranged, self.value) {
            (true, ConditionValue::Pair([low, high])) => {
                if !(low.is_finite() && high.is_finite()) {
                    return Err(EngineError::InvalidCondition(
                        "range bounds must be finite".to_string(),
                    ));
                }
                if low > high {
                    return Err(EngineError::InvalidCondition(format!(
                        "range low {low} is above high {high}"
                    )));
                }
            }
            (true, ConditionValue::Scalar(_)) => {
                return Err(EngineError::InvalidCondition(
                    "between/range needs a [low, high] pair".to_string(),
                ));
            }
            (false, ConditionValue::Pair(_)) => {
                return Err(EngineError::InvalidCondition(format!(
                    "operator {:?} takes a single value, not a pair",
                    self.operator
                )));
            }
            (false, ConditionValue::Scalar(v)) => {
                if !v.is_finite() {
                    return Err(EngineError::InvalidCondition(
                        "comparison value must be finite".to_string(),
                    ));
                }
            }
        }
        if self.kind == ConditionKind::Range && self.operator != ComparisonOperator::Between {
            return Err(EngineError::InvalidCondition(format!(
                "range condition cannot use operator {:?}",
                self.operator
            )));
        }
        if self.action == ConditionAction::Modify {
            match self.modifier {
                Some(m) if m.is_finite() => {}
                _ => {
                    return Err(EngineError::InvalidCondition(
                        "modify action requires a finite modifier".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Runs the boolean test against `value`.
    pub fn test(&self, value: f64) -> Result<bool> {
        self.validate()?;
        let passed = match (self.operator, self.value) {
            (ComparisonOperator::Between, ConditionValue::Pair([low, high])) => {
                low <= value && value <= high
            }
            (ComparisonOperator::Gt, ConditionValue::Scalar(x)) => value > x,
            (ComparisonOperator::Lt, ConditionValue::Scalar(x)) => value < x,
            (ComparisonOperator::Ge, ConditionValue::Scalar(x)) => value >= x,
            (ComparisonOperator::Le, ConditionValue::Scalar(x)) => value <= x,
            (ComparisonOperator::Eq, ConditionValue::Scalar(x)) => value == x,
            (ComparisonOperator::Ne, ConditionValue::Scalar(x)) => value != x,
            _ => {
                return Err(EngineError::InvalidCondition(format!(
                    "operator {:?} does not match value {:?}",
                    self.operator, self.value
                )));
            }
        };
        Ok(passed)
    }

    /// Maps the test outcome to a term action.
    ///
    /// The action applies only when the test passes; a failing test always
    /// lets the raw value through.
    pub fn evaluate(&self, value: f64) -> Result<TermAction> {
        if !self.test(value)? {
            return Ok(TermAction::Include);
        }
        let action = match self.action {
            ConditionAction::Include => TermAction::Include,
            ConditionAction::Exclude => TermAction::Exclude,
            ConditionAction::Modify => TermAction::Modify {
                delta: self.modifier.unwrap_or(0.0),
            },
        };
        Ok(action)
    }
}
