use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Knobs consumed by the evaluator and the backtest runner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Multiplier applied to the raw score before the logistic squash.
    pub sigmoid_steepness: f64,
    /// Points of predicted margin per unit of raw score.
    pub margin_scale: f64,
    /// Weight of the single-match probability against the formula prior
    /// when deriving confidence (1.0 ignores the prior).
    pub confidence_blend: f64,
    /// Stake placed on every backtested prediction.
    pub stake_unit: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sigmoid_steepness: 1.0,
            margin_scale: 6.0,
            confidence_blend: 0.5,
            stake_unit: 1.0,
        }
    }
}

impl EngineConfig {
    /// Reads overrides from the environment (and `.env.local` / `.env` when
    /// present). Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        let d = Self::default();
        Self {
            sigmoid_steepness: env_f64("FORMULA_SIGMOID_STEEPNESS").unwrap_or(d.sigmoid_steepness),
            margin_scale: env_f64("FORMULA_MARGIN_SCALE").unwrap_or(d.margin_scale),
            confidence_blend: env_f64("FORMULA_CONFIDENCE_BLEND").unwrap_or(d.confidence_blend),
            stake_unit: env_f64("FORMULA_STAKE_UNIT").unwrap_or(d.stake_unit),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sigmoid_steepness.is_finite() || self.sigmoid_steepness <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "sigmoid_steepness must be > 0, got {}",
                self.sigmoid_steepness
            )));
        }
        if !self.margin_scale.is_finite() || self.margin_scale < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "margin_scale must be >= 0, got {}",
                self.margin_scale
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_blend) {
            return Err(EngineError::InvalidConfig(format!(
                "confidence_blend must be within [0, 1], got {}",
                self.confidence_blend
            )));
        }
        if !self.stake_unit.is_finite() || self.stake_unit <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "stake_unit must be > 0, got {}",
                self.stake_unit
            )));
        }
        Ok(())
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn blend_outside_unit_interval_is_rejected() {
        let cfg = EngineConfig {
            confidence_blend: 1.5,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn zero_stake_is_rejected() {
        let cfg = EngineConfig {
            stake_unit: 0.0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_and_falls_back() {
        const KEYS: [&str; 4] = [
            "FORMULA_SIGMOID_STEEPNESS",
            "FORMULA_MARGIN_SCALE",
            "FORMULA_CONFIDENCE_BLEND",
            "FORMULA_STAKE_UNIT",
        ];
        // SAFETY: no other test reads or writes the FORMULA_* variables.
        unsafe {
            std::env::set_var("FORMULA_SIGMOID_STEEPNESS", "2.5");
            std::env::set_var("FORMULA_MARGIN_SCALE", "lots");
            std::env::set_var("FORMULA_CONFIDENCE_BLEND", " 0.8 ");
            std::env::set_var("FORMULA_STAKE_UNIT", "inf");
        }
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.sigmoid_steepness, 2.5);
        assert_eq!(cfg.margin_scale, 6.0);
        assert_eq!(cfg.confidence_blend, 0.8);
        assert_eq!(cfg.stake_unit, 1.0);

        unsafe {
            for key in KEYS {
                std::env::remove_var(key);
            }
        }
        assert_eq!(EngineConfig::from_env(), EngineConfig::default());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"marginScale": 10.0}"#).unwrap();
        assert_eq!(cfg.margin_scale, 10.0);
        assert_eq!(cfg.sigmoid_steepness, 1.0);
    }
}
