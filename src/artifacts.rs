//! On-disk model artifacts.
//!
//! Both artifacts are JSON documents produced by the offline training job:
//!
//! - the forecast set maps `depth`, `ph` and `tds` to an additive model made
//!   of a piecewise-linear trend plus Fourier seasonalities;
//! - the classifier is a tree ensemble over
//!   `forecast_depth, forecast_ph, forecast_tds` whose leaves carry class
//!   distributions, averaged across trees at prediction time.
//!
//! Anything structurally off in an artifact is reported as
//! [`PipelineError::ModelContract`] when it is loaded.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::forecast::{ForecastModel, ForecastModelSet};
use crate::models::{Signal, FORECAST_COLUMNS};
use crate::risk::{RiskClassifier, RiskModel};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changepoint {
    pub at: NaiveDateTime,
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub offset: f64,
    pub slope: f64,
    #[serde(default)]
    pub changepoints: Vec<Changepoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seasonality {
    #[serde(default)]
    pub name: String,
    pub period_days: f64,
    // [cos, sin] per harmonic, starting at 1
    pub fourier: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSeasonalModel {
    pub epoch: NaiveDateTime,
    pub trend: Trend,
    #[serde(default)]
    pub seasonalities: Vec<Seasonality>,
}

impl TrendSeasonalModel {
    fn check(&self, signal: Signal) -> Result<()> {
        let contract = |message: String| {
            Err(PipelineError::ModelContract(format!(
                "{signal} forecaster: {message}"
            )))
        };

        if !self.trend.offset.is_finite() || !self.trend.slope.is_finite() {
            return contract("trend offset and slope must be finite".to_string());
        }

        for pair in self.trend.changepoints.windows(2) {
            if pair[1].at < pair[0].at {
                return contract(format!(
                    "changepoint {} comes after {}",
                    pair[0].at, pair[1].at
                ));
            }
        }

        for seasonality in &self.seasonalities {
            if !(seasonality.period_days.is_finite() && seasonality.period_days > 0.0) {
                return contract(format!(
                    "seasonality {:?} has period {}",
                    seasonality.name, seasonality.period_days
                ));
            }
        }

        Ok(())
    }

    pub fn days_since_epoch(&self, ds: NaiveDateTime) -> f64 {
        (ds - self.epoch).num_milliseconds() as f64 / MILLIS_PER_DAY
    }

    /// Continuous piecewise-linear trend at `t` days since the epoch.
    pub fn trend_at(&self, t: f64) -> f64 {
        let mut slope = self.trend.slope;
        let mut offset = self.trend.offset;

        for changepoint in &self.trend.changepoints {
            let start = self.days_since_epoch(changepoint.at);
            if t < start {
                break;
            }
            slope += changepoint.delta;
            offset -= start * changepoint.delta;
        }

        offset + slope * t
    }

    pub fn seasonal_at(&self, t: f64) -> f64 {
        self.seasonalities
            .iter()
            .map(|seasonality| {
                seasonality
                    .fourier
                    .iter()
                    .enumerate()
                    .map(|(index, [cos, sin])| {
                        let angle = TAU * (index + 1) as f64 * t / seasonality.period_days;
                        cos * angle.cos() + sin * angle.sin()
                    })
                    .sum::<f64>()
            })
            .sum()
    }
}

impl ForecastModel for TrendSeasonalModel {
    fn predict(&self, ds: NaiveDateTime) -> std::result::Result<f64, String> {
        let t = self.days_since_epoch(ds);
        Ok(self.trend_at(t) + self.seasonal_at(t))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Rows with `row[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        distribution: Vec<f64>,
    },
}

impl TreeNode {
    fn leaf_for(&self, row: &[f64; 3]) -> std::result::Result<&[f64], String> {
        let mut node = self;
        loop {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row
                        .get(*feature)
                        .ok_or_else(|| format!("split on unknown feature {feature}"))?;
                    node = if value <= threshold {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                }
                TreeNode::Leaf { distribution } => return Ok(distribution.as_slice()),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub feature_names: Vec<String>,
    pub classes: Vec<String>,
    pub trees: Vec<TreeNode>,
}

impl TreeEnsemble {
    fn check(&self) -> Result<()> {
        if self.feature_names != FORECAST_COLUMNS {
            return Err(PipelineError::ModelContract(format!(
                "classifier expects features {:?}, pipeline supplies {:?}",
                self.feature_names, FORECAST_COLUMNS
            )));
        }
        if self.classes.is_empty() {
            return Err(PipelineError::ModelContract(
                "classifier has no classes".to_string(),
            ));
        }
        if self.trees.is_empty() {
            return Err(PipelineError::ModelContract(
                "classifier has no trees".to_string(),
            ));
        }

        for (index, tree) in self.trees.iter().enumerate() {
            let mut pending = vec![tree];
            while let Some(node) = pending.pop() {
                match node {
                    TreeNode::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= FORECAST_COLUMNS.len() || threshold.is_nan() {
                            return Err(PipelineError::ModelContract(format!(
                                "tree {index}: invalid split on feature {feature} at {threshold}"
                            )));
                        }
                        pending.push(left);
                        pending.push(right);
                    }
                    TreeNode::Leaf { distribution } => {
                        let valid = distribution.len() == self.classes.len()
                            && distribution.iter().all(|p| p.is_finite() && *p >= 0.0)
                            && distribution.iter().sum::<f64>() > 0.0;
                        if !valid {
                            return Err(PipelineError::ModelContract(format!(
                                "tree {index}: leaf distribution {distribution:?} does not fit {} \
                                 classes",
                                self.classes.len()
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn predict_row(&self, row: &[f64; 3]) -> std::result::Result<&str, String> {
        let mut mean = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let leaf = tree.leaf_for(row)?;
            let total: f64 = leaf.iter().sum();
            for (slot, weight) in mean.iter_mut().zip(leaf) {
                *slot += weight / total;
            }
        }

        let mut best = 0;
        for (index, probability) in mean.iter().enumerate() {
            if *probability > mean[best] {
                best = index;
            }
        }

        self.classes
            .get(best)
            .map(String::as_str)
            .ok_or_else(|| "classifier has no classes".to_string())
    }
}

impl RiskModel for TreeEnsemble {
    fn predict(&self, rows: &[[f64; 3]]) -> std::result::Result<Vec<String>, String> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                if row.iter().any(|value| !value.is_finite()) {
                    return Err(format!("row {}: input contains non-finite values", index + 1));
                }
                self.predict_row(row).map(str::to_string)
            })
            .collect()
    }
}

pub fn forecast_models_from_reader<R: Read>(source: R) -> Result<ForecastModelSet> {
    let mut entries: BTreeMap<String, serde_json::Value> = serde_json::from_reader(source)
        .map_err(|e| PipelineError::ModelContract(format!("forecast artifact: {e}")))?;

    let missing: Vec<&str> = Signal::ALL
        .iter()
        .map(|signal| signal.name())
        .filter(|name| !entries.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::ModelContract(format!(
            "forecast artifact lacks models for {}",
            missing.join(", ")
        )));
    }

    let mut take = |signal: Signal| -> Result<Box<dyn ForecastModel>> {
        let value = entries
            .remove(signal.name())
            .ok_or_else(|| PipelineError::UnknownSignal(signal.name().to_string()))?;
        let model: TrendSeasonalModel = serde_json::from_value(value)
            .map_err(|e| PipelineError::ModelContract(format!("{signal} forecaster: {e}")))?;
        model.check(signal)?;
        Ok(Box::new(model))
    };

    let depth = take(Signal::Depth)?;
    let ph = take(Signal::Ph)?;
    let tds = take(Signal::Tds)?;

    for extra in entries.keys() {
        warn!(key = %extra, "ignoring unrecognised entry in forecast artifact");
    }

    Ok(ForecastModelSet::new(depth, ph, tds))
}

pub fn classifier_from_reader<R: Read>(source: R) -> Result<RiskClassifier> {
    let ensemble: TreeEnsemble = serde_json::from_reader(source)
        .map_err(|e| PipelineError::ModelContract(format!("classifier artifact: {e}")))?;
    ensemble.check()?;
    info!(
        trees = ensemble.trees.len(),
        classes = ensemble.classes.len(),
        "risk classifier ready"
    );
    Ok(RiskClassifier::new(Box::new(ensemble)))
}

pub fn load_forecast_models(path: &Path) -> Result<ForecastModelSet> {
    let file = File::open(path)?;
    let models = forecast_models_from_reader(BufReader::new(file))?;
    info!(path = %path.display(), "forecast models loaded");
    Ok(models)
}

pub fn load_classifier(path: &Path) -> Result<RiskClassifier> {
    let file = File::open(path)?;
    classifier_from_reader(BufReader::new(file))
}

#[cfg(test)]
pub(crate) const SAMPLE_FORECASTS: &str = r#"{
    "depth": {
        "epoch": "2024-01-01T00:00:00",
        "trend": {
            "offset": 10.0,
            "slope": 0.5,
            "changepoints": [{ "at": "2024-01-11T00:00:00", "delta": -1.0 }]
        },
        "seasonalities": [{ "name": "weekly", "period_days": 7.0, "fourier": [[2.0, 0.0]] }]
    },
    "ph": {
        "epoch": "2024-01-01T00:00:00",
        "trend": { "offset": 7.0, "slope": -0.25 }
    },
    "tds": {
        "epoch": "2024-01-01T00:00:00",
        "trend": { "offset": 300.0, "slope": 1.234 }
    }
}"#;

#[cfg(test)]
pub(crate) const SAMPLE_CLASSIFIER: &str = r#"{
    "feature_names": ["forecast_depth", "forecast_ph", "forecast_tds"],
    "classes": ["Rendah", "Tinggi"],
    "trees": [
        {
            "node": "split", "feature": 0, "threshold": 10.0,
            "left": { "node": "leaf", "distribution": [4.0, 0.0] },
            "right": { "node": "leaf", "distribution": [0.0, 4.0] }
        },
        {
            "node": "split", "feature": 2, "threshold": 500.0,
            "left": { "node": "leaf", "distribution": [1.0, 1.0] },
            "right": { "node": "leaf", "distribution": [0.0, 3.0] }
        }
    ]
}"#;
