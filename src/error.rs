//! Error taxonomy for the forecast-then-classify pipeline.

use std::collections::BTreeSet;

use thiserror::Error;

/// Every way one invocation of the pipeline can fail.
///
/// Any of these aborts the whole invocation; no partial table is returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input table lacks one or more required columns
    #[error("required columns missing: {}", join_names(.0))]
    MissingColumns(BTreeSet<String>),

    /// A `ds` cell could not be parsed as a timestamp
    #[error("row {row}: cannot parse ds value {value:?} as a timestamp")]
    DateParse { row: usize, value: String },

    /// A signal name outside depth, ph and tds was requested
    #[error("unknown signal {0:?}, expected one of depth, ph, tds")]
    UnknownSignal(String),

    /// The forecasting model for a signal failed
    #[error("forecast model for {signal} failed: {message}")]
    ForecastModel {
        signal: &'static str,
        message: String,
    },

    /// The risk classifier failed
    #[error("risk classification failed: {0}")]
    Classification(String),

    /// Forecast output and input table disagree on row count
    #[error("forecast produced {actual} rows for an input of {expected} rows")]
    LengthMismatch { expected: usize, actual: usize },

    /// A model artifact does not honour the interface the pipeline expects
    #[error("model contract violated: {0}")]
    ModelContract(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

fn join_names(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_lists_names_in_order() {
        let missing: BTreeSet<String> = ["tds", "ds"].iter().map(|s| s.to_string()).collect();
        let error = PipelineError::MissingColumns(missing);
        assert_eq!(error.to_string(), "required columns missing: ds, tds");
    }

    #[test]
    fn io_errors_convert() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = PipelineError::from(io_error);
        assert!(matches!(error, PipelineError::Io(_)));
        assert!(error.to_string().contains("no such file"));
    }

    #[test]
    fn forecast_errors_name_the_signal() {
        let error = PipelineError::ForecastModel {
            signal: "ph",
            message: "diverged".to_string(),
        };
        assert_eq!(error.to_string(), "forecast model for ph failed: diverged");
    }
}
