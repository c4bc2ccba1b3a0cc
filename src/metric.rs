use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Offense,
    Defense,
    Form,
    HeadToHead,
    Venue,
    Weather,
    Historical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDataType {
    Number,
    /// 0..=100
    Percentage,
    /// 0.0 or 1.0
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: MetricCategory,
    pub data_type: MetricDataType,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
}

impl MetricDefinition {
    pub fn new(id: &str, name: &str, category: MetricCategory, data_type: MetricDataType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            category,
            data_type,
            unit: None,
            min_value: None,
            max_value: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    /// Checks a raw value against the data type and the declared bounds.
    pub fn validate_value(&self, value: f64) -> Result<()> {
        let fail = |reason: &str| EngineError::InvalidMetricValue {
            id: self.id.clone(),
            value,
            reason: reason.to_string(),
        };

        if !value.is_finite() {
            return Err(fail("value is not finite"));
        }
        match self.data_type {
            MetricDataType::Number => {}
            MetricDataType::Percentage => {
                if !(0.0..=100.0).contains(&value) {
                    return Err(fail("percentage outside 0..=100"));
                }
            }
            MetricDataType::Boolean => {
                if value != 0.0 && value != 1.0 {
                    return Err(fail("boolean metric must be 0 or 1"));
                }
            }
        }
        if let Some(min) = self.min_value
            && value < min
        {
            return Err(fail("below minValue"));
        }
        if let Some(max) = self.max_value
            && value > max
        {
            return Err(fail("above maxValue"));
        }
        Ok(())
    }
}

/// Catalog of metric definitions keyed by id.
///
/// Filled once at startup; there is no deregistration.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    defs: HashMap<String, MetricDefinition>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions<I>(defs: I) -> Result<Self>
    where
        I: IntoIterator<Item = MetricDefinition>,
    {
        let mut registry = Self::new();
        for def in defs {
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// Registry preloaded with [`default_catalog`].
    pub fn with_default_catalog() -> Self {
        let mut registry = Self::new();
        for def in default_catalog() {
            registry.defs.insert(def.id.clone(), def.clone());
        }
        registry
    }

    pub fn register(&mut self, def: MetricDefinition) -> Result<()> {
        if self.defs.contains_key(&def.id) {
            return Err(EngineError::DuplicateMetric(def.id));
        }
        if let (Some(min), Some(max)) = (def.min_value, def.max_value)
            && min > max
        {
            return Err(EngineError::InvalidRange {
                id: def.id,
                min,
                max,
            });
        }
        self.defs.insert(def.id.clone(), def);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<&MetricDefinition> {
        self.defs
            .get(id)
            .ok_or_else(|| EngineError::UnknownMetric(id.to_string()))
    }

    pub fn validate_value(&self, id: &str, value: f64) -> Result<()> {
        self.lookup(id)?.validate_value(value)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Sorted ids, for stable listings.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids = self.defs.keys().map(String::as_str).collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }
}

/// Loads a JSON array of [`MetricDefinition`] from disk.
pub fn load_registry(path: &Path) -> AnyResult<MetricRegistry> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read metric catalog {}", path.display()))?;
    let defs: Vec<MetricDefinition> =
        serde_json::from_str(&raw).context("parse metric catalog")?;
    MetricRegistry::from_definitions(defs).context("register metric catalog")
}

static DEFAULT_CATALOG: Lazy<Vec<MetricDefinition>> = Lazy::new(|| {
    use MetricCategory::*;
    use MetricDataType::*;
    vec![
        MetricDefinition::new("possession", "Possession share", Offense, Percentage)
            .with_unit("%"),
        MetricDefinition::new("disposal_diff", "Disposal differential", Offense, Number),
        MetricDefinition::new("inside50_diff", "Inside 50 differential", Offense, Number),
        MetricDefinition::new("scoring_shot_diff", "Scoring shot differential", Offense, Number),
        MetricDefinition::new("clearance_diff", "Clearance differential", Defense, Number),
        MetricDefinition::new("tackle_diff", "Tackle differential", Defense, Number),
        MetricDefinition::new("points_against_avg", "Points conceded per game", Defense, Number)
            .with_unit("points")
            .with_range(Some(0.0), None),
        MetricDefinition::new("last5_win_rate", "Win rate over last five", Form, Percentage)
            .with_unit("%"),
        MetricDefinition::new("ladder_gap", "Ladder position gap", Form, Number)
            .with_range(Some(-17.0), Some(17.0)),
        MetricDefinition::new("h2h_win_rate", "Head-to-head win rate", HeadToHead, Percentage)
            .with_unit("%"),
        MetricDefinition::new("home_ground", "Playing at home ground", Venue, Boolean),
        MetricDefinition::new("venue_win_rate", "Win rate at venue", Venue, Percentage)
            .with_unit("%"),
        MetricDefinition::new("travel_km", "Away team travel", Venue, Number)
            .with_unit("km")
            .with_range(Some(0.0), None),
        MetricDefinition::new("rain_mm", "Forecast rainfall", Weather, Number)
            .with_unit("mm")
            .with_range(Some(0.0), None),
        MetricDefinition::new("wind_kmh", "Forecast wind speed", Weather, Number)
            .with_unit("km/h")
            .with_range(Some(0.0), None),
        MetricDefinition::new("elo_diff", "Elo rating differential", Historical, Number),
    ]
});

/// Built-in AFL metric catalog.
pub fn default_catalog() -> &'static [MetricDefinition] {
    &DEFAULT_CATALOG
}
