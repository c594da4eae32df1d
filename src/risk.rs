use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::RiskLabel;

/// A pre-trained classifier over (depth, ph, tds) rows.
pub trait RiskModel: Send + Sync {
    fn predict(&self, rows: &[[f64; 3]]) -> std::result::Result<Vec<String>, String>;
}

pub struct RiskClassifier {
    model: Box<dyn RiskModel>,
}

impl RiskClassifier {
    pub fn new(model: Box<dyn RiskModel>) -> Self {
        Self { model }
    }

    pub fn classify(&self, depth: f64, ph: f64, tds: f64) -> Result<RiskLabel> {
        let mut labels = self.classify_batch(&[[depth, ph, tds]])?;
        labels
            .pop()
            .ok_or_else(|| PipelineError::ModelContract("classifier returned no label".to_string()))
    }

    /// Classifies rows in order. Values are passed through unchecked.
    pub fn classify_batch(&self, rows: &[[f64; 3]]) -> Result<Vec<RiskLabel>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let labels = self
            .model
            .predict(rows)
            .map_err(PipelineError::Classification)?;

        if labels.len() != rows.len() {
            return Err(PipelineError::ModelContract(format!(
                "classifier returned {} labels for {} rows",
                labels.len(),
                rows.len()
            )));
        }

        debug!(rows = rows.len(), "rows classified");
        Ok(labels.into_iter().map(RiskLabel).collect())
    }
}

impl std::fmt::Debug for RiskClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskClassifier").finish_non_exhaustive()
    }
}

/// Labels by depth band alone; enough to tell rows apart in tests.
#[cfg(test)]
pub(crate) struct DepthBands;

#[cfg(test)]
impl RiskModel for DepthBands {
    fn predict(&self, rows: &[[f64; 3]]) -> std::result::Result<Vec<String>, String> {
        Ok(rows
            .iter()
            .map(|row| match row[0] {
                depth if depth >= 15.0 => "Tinggi",
                depth if depth >= 5.0 => "Sedang",
                _ => "Rendah",
            })
            .map(str::to_string)
            .collect())
    }
}
