use tracing::{info, info_span};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::forecast::{self, ForecastModelSet};
use crate::models::{
    AssembledRow, AssembledTable, ForecastedRecord, InputTable, ResultRecord, ResultRow,
    ResultTable, RiskLabel, ValidatedTable, FORECAST_COLUMNS, RISK_COLUMN,
};
use crate::risk::RiskClassifier;
use crate::table;

/// The two loaded models, built once and only read afterwards.
#[derive(Debug)]
pub struct PipelineContext {
    forecasters: ForecastModelSet,
    classifier: RiskClassifier,
}

impl PipelineContext {
    pub fn new(forecasters: ForecastModelSet, classifier: RiskClassifier) -> Self {
        Self {
            forecasters,
            classifier,
        }
    }

    /// Table mode: validate, forecast each row, assemble, classify.
    pub fn run_table(&self, input: InputTable) -> Result<ResultTable> {
        let span = info_span!("pipeline", flow = "table", invocation = %Uuid::new_v4());
        let _guard = span.enter();

        let validated = table::validate(input)?;
        info!(rows = validated.len(), "input accepted, forecasting");

        let forecasts = forecast::forecast_all(&self.forecasters, &validated)?;
        let assembled = assemble(validated, forecasts)?;

        let features: Vec<[f64; 3]> = assembled
            .rows
            .iter()
            .map(|row| row.forecast.features())
            .collect();
        let labels = self.classifier.classify_batch(&features)?;
        let result = attach_labels(assembled, labels)?;

        info!(rows = result.len(), "forecast and classification complete");
        Ok(result)
    }

    /// Manual mode: the values are classified as given, with no forecasting.
    pub fn run_manual(&self, depth: f64, ph: f64, tds: f64) -> Result<ResultRecord> {
        let span = info_span!("pipeline", flow = "manual", invocation = %Uuid::new_v4());
        let _guard = span.enter();

        let label = self.classifier.classify(depth, ph, tds)?;
        info!(label = label.as_str(), "manual entry classified");

        Ok(ResultRecord {
            forecast: ForecastedRecord {
                forecast_depth: depth,
                forecast_ph: ph,
                forecast_tds: tds,
            },
            label,
        })
    }
}

/// Joins row `i` of the table with forecast `i`.
pub fn assemble(table: ValidatedTable, forecasts: Vec<ForecastedRecord>) -> Result<AssembledTable> {
    if table.len() != forecasts.len() {
        return Err(PipelineError::LengthMismatch {
            expected: table.len(),
            actual: forecasts.len(),
        });
    }

    let mut headers = table.headers;
    headers.extend(FORECAST_COLUMNS.iter().map(|name| name.to_string()));

    let rows = table
        .rows
        .into_iter()
        .zip(table.records)
        .zip(forecasts)
        .map(|((cells, record), forecast)| AssembledRow {
            cells,
            record,
            forecast,
        })
        .collect();

    Ok(AssembledTable { headers, rows })
}

pub fn attach_labels(table: AssembledTable, labels: Vec<RiskLabel>) -> Result<ResultTable> {
    if table.rows.len() != labels.len() {
        return Err(PipelineError::LengthMismatch {
            expected: table.rows.len(),
            actual: labels.len(),
        });
    }

    let mut headers = table.headers;
    headers.push(RISK_COLUMN.to_string());

    let rows = table
        .rows
        .into_iter()
        .zip(labels)
        .map(|(row, label)| ResultRow {
            cells: row.cells,
            record: row.record,
            forecast: row.forecast,
            label,
        })
        .collect();

    Ok(ResultTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::stub_model;
    use crate::risk::{DepthBands, RiskModel};
    use crate::table::{read_csv, result_table_to_csv};
    use chrono::Datelike;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    struct Echo {
        seen: Arc<Mutex<Vec<[f64; 3]>>>,
    }

    impl RiskModel for Echo {
        fn predict(&self, rows: &[[f64; 3]]) -> std::result::Result<Vec<String>, String> {
            self.seen.lock().unwrap().extend_from_slice(rows);
            Ok(rows
                .iter()
                .map(|row| format!("{}|{}|{}", row[0], row[1], row[2]))
                .collect())
        }
    }

    fn scenario_context(seen: Arc<Mutex<Vec<[f64; 3]>>>) -> PipelineContext {
        PipelineContext::new(
            ForecastModelSet::new(
                stub_model(|_| Ok(25.3)),
                stub_model(|_| Ok(-1.2)),
                stub_model(|_| Ok(310.7)),
            ),
            RiskClassifier::new(Box::new(Echo { seen })),
        )
    }

    fn day_context() -> PipelineContext {
        PipelineContext::new(
            ForecastModelSet::new(
                stub_model(|ds| Ok(ds.day() as f64 * 0.75)),
                stub_model(|ds| Ok(7.0 - ds.day() as f64 * 0.5)),
                stub_model(|ds| Ok(ds.day() as f64 * 33.333)),
            ),
            RiskClassifier::new(Box::new(DepthBands)),
        )
    }

    fn input(csv_text: &str) -> InputTable {
        read_csv(csv_text.as_bytes()).unwrap()
    }

    fn validated(csv_text: &str) -> ValidatedTable {
        table::validate(input(csv_text)).unwrap()
    }

    #[test]
    fn reference_scenario_end_to_end() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let context = scenario_context(seen.clone());

        let result = context
            .run_table(input("ds,depth,ph,tds\n2024-01-01,5.0,7.0,300.0\n"))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![[20.0, 0.0, 310.7]]);
        let csv_text = String::from_utf8(result_table_to_csv(&result).unwrap()).unwrap();
        assert_eq!(
            csv_text,
            "ds,depth,ph,tds,forecast_depth,forecast_ph,forecast_tds,Prediksi_Risiko\n\
             2024-01-01,5.0,7.0,300.0,20.0,0.0,310.7,20|0|310.7\n"
        );
    }

    #[test]
    fn output_rows_follow_input_rows() {
        let result = day_context()
            .run_table(input(
                "site,ds,depth,ph,tds\n\
                 C,2024-05-25,1,7,1\nA,2024-05-02,1,7,1\nB,2024-05-10,1,7,1\n",
            ))
            .unwrap();

        assert_eq!(result.len(), 3);
        let sites: Vec<&str> = result.rows.iter().map(|row| row.cells[0].as_str()).collect();
        assert_eq!(sites, vec!["C", "A", "B"]);

        let depths: Vec<f64> = result.rows.iter().map(|row| row.forecast.forecast_depth).collect();
        assert_eq!(depths, vec![18.75, 1.5, 7.5]);

        let labels: Vec<&str> = result.rows.iter().map(|row| row.label.as_str()).collect();
        assert_eq!(labels, vec!["Tinggi", "Rendah", "Sedang"]);

        // pH is floored once the linear stub crosses zero.
        assert_eq!(result.rows[0].forecast.forecast_ph, 0.0);
        assert_eq!(result.rows[1].forecast.forecast_ph, 6.0);
        // 25 * 33.333 is stored just below 833.325.
        assert_eq!(result.rows[0].forecast.forecast_tds, 833.32);
    }

    #[test]
    fn forecast_columns_are_appended_after_originals() {
        let result = day_context()
            .run_table(input("tds,note,ds,ph,depth\n1,x,2024-01-01,7,1\n"))
            .unwrap();
        assert_eq!(
            result.headers,
            vec![
                "tds",
                "note",
                "ds",
                "ph",
                "depth",
                "forecast_depth",
                "forecast_ph",
                "forecast_tds",
                "Prediksi_Risiko"
            ]
        );
    }

    #[test]
    fn missing_columns_stop_before_any_model_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let context = PipelineContext::new(
            ForecastModelSet::new(
                stub_model(|_| Err("must not be called".to_string())),
                stub_model(|_| Err("must not be called".to_string())),
                stub_model(|_| Err("must not be called".to_string())),
            ),
            RiskClassifier::new(Box::new(Echo { seen: seen.clone() })),
        );

        let result = context.run_table(input("ds,depth\n2024-01-01,5\n"));
        assert!(matches!(result, Err(PipelineError::MissingColumns(_))));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn any_failing_row_fails_the_whole_table() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let context = PipelineContext::new(
            ForecastModelSet::new(
                stub_model(|_| Ok(1.0)),
                stub_model(|_| Ok(7.0)),
                stub_model(|ds| {
                    if ds.day() == 3 {
                        Err("diverged".to_string())
                    } else {
                        Ok(100.0)
                    }
                }),
            ),
            RiskClassifier::new(Box::new(Echo { seen: seen.clone() })),
        );

        let result = context.run_table(input(
            "ds,depth,ph,tds\n2024-01-01,1,7,1\n2024-01-02,1,7,1\n2024-01-03,1,7,1\n",
        ));
        assert!(matches!(
            result,
            Err(PipelineError::ForecastModel { signal: "tds", .. })
        ));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn header_only_table_yields_empty_result() {
        let result = day_context().run_table(input("ds,depth,ph,tds\n")).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.headers.len(), 8);
    }

    #[test]
    fn reruns_are_byte_identical() {
        let csv_text = "ds,depth,ph,tds,site\n2024-02-01,3,7,100,A\n2024-02-09 12:00,4,6,200,B\n";
        let context = day_context();
        let first = result_table_to_csv(&context.run_table(input(csv_text)).unwrap()).unwrap();
        let second = result_table_to_csv(&context.run_table(input(csv_text)).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn manual_mode_matches_table_mode_classification() {
        let context = day_context();
        let table_result = context
            .run_table(input("ds,depth,ph,tds\n2024-05-10,1,7,1\n"))
            .unwrap();
        let row = &table_result.rows[0];

        let manual = context
            .run_manual(
                row.forecast.forecast_depth,
                row.forecast.forecast_ph,
                row.forecast.forecast_tds,
            )
            .unwrap();
        assert_eq!(manual.label, row.label);
        assert_eq!(manual.forecast, row.forecast);
    }

    #[test]
    fn manual_mode_skips_forecasting() {
        let context = PipelineContext::new(
            ForecastModelSet::new(
                stub_model(|_| Err("must not be called".to_string())),
                stub_model(|_| Err("must not be called".to_string())),
                stub_model(|_| Err("must not be called".to_string())),
            ),
            RiskClassifier::new(Box::new(DepthBands)),
        );
        let record = context.run_manual(12.0, 6.5, 4000.0).unwrap();
        assert_eq!(record.label, RiskLabel("Sedang".to_string()));
        assert_eq!(record.forecast.forecast_tds, 4000.0);
    }

    #[test]
    fn assemble_rejects_short_forecasts() {
        let table = validated("ds,depth,ph,tds\n2024-01-01,1,7,1\n2024-01-02,1,7,1\n");
        let forecasts = vec![ForecastedRecord {
            forecast_depth: 1.0,
            forecast_ph: 7.0,
            forecast_tds: 1.0,
        }];
        match assemble(table, forecasts) {
            Err(PipelineError::LengthMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (2, 1));
            }
            other => panic!("expected LengthMismatch, got {other:?}"),
        }
    }

    #[test]
    fn assemble_rejects_long_forecasts() {
        let table = validated("ds,depth,ph,tds\n2024-01-01,1,7,1\n");
        let forecast = ForecastedRecord {
            forecast_depth: 1.0,
            forecast_ph: 7.0,
            forecast_tds: 1.0,
        };
        assert!(matches!(
            assemble(table, vec![forecast; 3]),
            Err(PipelineError::LengthMismatch {
                expected: 1,
                actual: 3
            })
        ));
    }

    #[test]
    fn context_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipelineContext>();
    }
}
