//! Per-signal forecasting and the post-forecast clamping rules.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{ForecastedRecord, Signal, ValidatedTable, MAX_DEPTH};

/// A pre-trained point forecaster for one signal.
pub trait ForecastModel: Send + Sync {
    fn predict(&self, ds: NaiveDateTime) -> std::result::Result<f64, String>;
}

impl<F> ForecastModel for F
where
    F: Fn(NaiveDateTime) -> std::result::Result<f64, String> + Send + Sync,
{
    fn predict(&self, ds: NaiveDateTime) -> std::result::Result<f64, String> {
        self(ds)
    }
}

/// One forecaster per signal, loaded once and only read afterwards.
pub struct ForecastModelSet {
    depth: Box<dyn ForecastModel>,
    ph: Box<dyn ForecastModel>,
    tds: Box<dyn ForecastModel>,
}

impl ForecastModelSet {
    pub fn new(
        depth: Box<dyn ForecastModel>,
        ph: Box<dyn ForecastModel>,
        tds: Box<dyn ForecastModel>,
    ) -> Self {
        Self { depth, ph, tds }
    }

    pub fn model(&self, signal: Signal) -> &dyn ForecastModel {
        match signal {
            Signal::Depth => self.depth.as_ref(),
            Signal::Ph => self.ph.as_ref(),
            Signal::Tds => self.tds.as_ref(),
        }
    }

    /// Forecast a signal addressed by name.
    pub fn forecast(&self, signal_name: &str, ds: NaiveDateTime) -> Result<f64> {
        let signal: Signal = signal_name.parse()?;
        self.forecast_signal(signal, ds)
    }

    /// Raw, unclamped prediction. Non-finite output counts as a model failure.
    pub fn forecast_signal(&self, signal: Signal, ds: NaiveDateTime) -> Result<f64> {
        let value = self
            .model(signal)
            .predict(ds)
            .map_err(|message| PipelineError::ForecastModel {
                signal: signal.name(),
                message,
            })?;

        if !value.is_finite() {
            return Err(PipelineError::ForecastModel {
                signal: signal.name(),
                message: format!("non-finite prediction {value} at {ds}"),
            });
        }

        Ok(value)
    }
}

impl std::fmt::Debug for ForecastModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastModelSet").finish_non_exhaustive()
    }
}

/// Rounds the exact stored value to two decimals, ties to even.
pub fn round2(value: f64) -> f64 {
    // Past 2^52 an f64 has no fractional digits left.
    if !value.is_finite() || value.abs() >= 4_503_599_627_370_496.0 {
        return value;
    }
    format!("{value:.2}").parse().unwrap_or(value)
}

pub fn clamp_depth(value: f64) -> f64 {
    round2(value.min(MAX_DEPTH))
}

pub fn clamp_ph(value: f64) -> f64 {
    round2(value.max(0.0))
}

pub fn clamp_tds(value: f64) -> f64 {
    round2(value)
}

pub fn clamp(signal: Signal, value: f64) -> f64 {
    match signal {
        Signal::Depth => clamp_depth(value),
        Signal::Ph => clamp_ph(value),
        Signal::Tds => clamp_tds(value),
    }
}

pub fn forecast_row(models: &ForecastModelSet, ds: NaiveDateTime) -> Result<ForecastedRecord> {
    let [depth, ph, tds] = Signal::ALL;
    Ok(ForecastedRecord {
        forecast_depth: clamp(depth, models.forecast_signal(depth, ds)?),
        forecast_ph: clamp(ph, models.forecast_signal(ph, ds)?),
        forecast_tds: clamp(tds, models.forecast_signal(tds, ds)?),
    })
}

/// Forecasts every row in input order; stops at the first failure.
pub fn forecast_all(
    models: &ForecastModelSet,
    table: &ValidatedTable,
) -> Result<Vec<ForecastedRecord>> {
    table
        .records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let forecast = forecast_row(models, record.ds)?;
            debug!(row = index + 1, ds = %record.ds, ?forecast, "row forecast");
            Ok(forecast)
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn stub_model<F>(predict: F) -> Box<dyn ForecastModel>
where
    F: Fn(NaiveDateTime) -> std::result::Result<f64, String> + Send + Sync + 'static,
{
    Box::new(predict)
}
