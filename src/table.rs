use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::models::{
    InputTable, RawRecord, ResultRecord, ResultRow, ResultTable, ValidatedTable,
    FORECAST_COLUMNS, REQUIRED_COLUMNS, RISK_COLUMN,
};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

// Slash dates are month first.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

pub fn read_csv<R: io::Read>(source: R) -> Result<InputTable> {
    let mut reader = csv::Reader::from_reader(source);
    let headers = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(InputTable { headers, rows })
}

pub fn read_csv_path(path: &Path) -> Result<InputTable> {
    let file = File::open(path)?;
    read_csv(file)
}

/// Checks that `ds`, `depth`, `ph` and `tds` are all present and parses
/// every `ds` cell. Extra columns pass through untouched.
pub fn validate(table: InputTable) -> Result<ValidatedTable> {
    let positions =
        REQUIRED_COLUMNS.map(|name| table.headers.iter().position(|header| header == name));

    let [ds, depth, ph, tds] = match positions {
        [Some(ds), Some(depth), Some(ph), Some(tds)] => [ds, depth, ph, tds],
        _ => {
            let missing: BTreeSet<String> = REQUIRED_COLUMNS
                .iter()
                .zip(positions)
                .filter(|(_, position)| position.is_none())
                .map(|(name, _)| name.to_string())
                .collect();
            warn!(?missing, "input table rejected");
            return Err(PipelineError::MissingColumns(missing));
        }
    };

    let mut records = Vec::with_capacity(table.rows.len());
    let mut non_numeric = 0usize;

    for (index, row) in table.rows.iter().enumerate() {
        let raw_ds = &row[ds];
        let timestamp = parse_timestamp(raw_ds).ok_or_else(|| PipelineError::DateParse {
            row: index + 1,
            value: raw_ds.clone(),
        })?;

        let readings = [depth, ph, tds].map(|column| parse_reading(&row[column]));
        non_numeric += readings.iter().filter(|reading| reading.is_none()).count();

        records.push(RawRecord {
            ds: timestamp,
            depth: readings[0],
            ph: readings[1],
            tds: readings[2],
        });
    }

    if non_numeric > 0 {
        warn!(cells = non_numeric, "non-numeric readings carried through as text");
    }

    let date_only = records.iter().all(|record| is_midnight(&record.ds));
    let mut rows = table.rows;
    for (row, record) in rows.iter_mut().zip(&records) {
        row[ds] = format_timestamp(&record.ds, date_only);
    }

    debug!(rows = records.len(), columns = table.headers.len(), "input table validated");

    Ok(ValidatedTable {
        headers: table.headers,
        rows,
        records,
    })
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(value) {
        return Some(with_offset.naive_utc());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn parse_reading(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok()
}

fn is_midnight(timestamp: &NaiveDateTime) -> bool {
    timestamp.num_seconds_from_midnight() == 0 && timestamp.nanosecond() == 0
}

fn format_timestamp(timestamp: &NaiveDateTime, date_only: bool) -> String {
    if date_only {
        timestamp.format("%Y-%m-%d").to_string()
    } else {
        timestamp.format("%Y-%m-%d %H:%M:%S%.f").to_string()
    }
}

/// Shortest round-trip text for a forecast, always with a fractional digit.
pub fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

pub fn output_cells(row: &ResultRow) -> Vec<String> {
    let mut cells = row.cells.clone();
    cells.extend(row.forecast.features().map(format_value));
    cells.push(row.label.to_string());
    cells
}

/// Writes a result table as UTF-8 CSV with a header row and no index column.
pub fn write_result_table<W: io::Write>(table: &ResultTable, sink: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(output_cells(row))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_result_record<W: io::Write>(record: &ResultRecord, sink: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(sink);
    let mut headers: Vec<&str> = FORECAST_COLUMNS.to_vec();
    headers.push(RISK_COLUMN);
    writer.write_record(headers)?;

    let mut cells: Vec<String> = record.forecast.features().map(format_value).to_vec();
    cells.push(record.label.to_string());
    writer.write_record(cells)?;
    writer.flush()?;
    Ok(())
}

pub fn result_table_to_csv(table: &ResultTable) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_result_table(table, &mut buffer)?;
    Ok(buffer)
}
