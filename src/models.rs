use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

use crate::error::PipelineError;

pub const REQUIRED_COLUMNS: [&str; 4] = ["ds", "depth", "ph", "tds"];
pub const FORECAST_COLUMNS: [&str; 3] = ["forecast_depth", "forecast_ph", "forecast_tds"];
pub const RISK_COLUMN: &str = "Prediksi_Risiko";

pub const MAX_DEPTH: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Depth,
    Ph,
    Tds,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Depth, Signal::Ph, Signal::Tds];

    pub fn name(self) -> &'static str {
        match self {
            Signal::Depth => "depth",
            Signal::Ph => "ph",
            Signal::Tds => "tds",
        }
    }
}

impl FromStr for Signal {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "depth" => Ok(Signal::Depth),
            "ph" => Ok(Signal::Ph),
            "tds" => Ok(Signal::Tds),
            other => Err(PipelineError::UnknownSignal(other.to_string())),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed view of one input row. The signal readings are `None` when the
/// cell is not numeric; only `ds` feeds the forecasters.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub ds: NaiveDateTime,
    pub depth: Option<f64>,
    pub ph: Option<f64>,
    pub tds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// An input table whose required columns are present and whose `ds` column
/// has been parsed. `rows` holds the original cells with `ds` normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub records: Vec<RawRecord>,
}

impl ValidatedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastedRecord {
    pub forecast_depth: f64,
    pub forecast_ph: f64,
    pub forecast_tds: f64,
}

impl ForecastedRecord {
    pub fn features(&self) -> [f64; 3] {
        [self.forecast_depth, self.forecast_ph, self.forecast_tds]
    }
}

/// Label produced by the classifier, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RiskLabel(pub String);

impl RiskLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledRow {
    pub cells: Vec<String>,
    pub record: RawRecord,
    pub forecast: ForecastedRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTable {
    pub headers: Vec<String>,
    pub rows: Vec<AssembledRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub cells: Vec<String>,
    pub record: RawRecord,
    pub forecast: ForecastedRecord,
    pub label: RiskLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub headers: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub forecast: ForecastedRecord,
    pub label: RiskLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelSummary {
    pub label: RiskLabel,
    pub count: usize,
}
