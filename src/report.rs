use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{LabelSummary, ResultTable, RiskLabel};
use crate::table;

pub fn summarize_labels(result: &ResultTable) -> Vec<LabelSummary> {
    let mut counts: HashMap<&RiskLabel, usize> = HashMap::new();
    for row in &result.rows {
        *counts.entry(&row.label).or_insert(0) += 1;
    }

    let mut summaries: Vec<LabelSummary> = counts
        .into_iter()
        .map(|(label, count)| LabelSummary {
            label: label.clone(),
            count,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    summaries
}

pub fn build_report(source: Option<&str>, result: &ResultTable) -> String {
    let summaries = summarize_labels(result);

    let mut output = String::new();
    let source_label = source.unwrap_or("uploaded table");

    let _ = writeln!(output, "# Forecast & Risk Classification Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} rows)",
        source_label,
        result.len()
    );

    let first = result.rows.iter().map(|row| row.record.ds).min();
    let last = result.rows.iter().map(|row| row.record.ds).max();
    if let (Some(first), Some(last)) = (first, last) {
        let _ = writeln!(output, "Forecast dates span {} to {}", first, last);
        let _ = writeln!(
            output,
            "Observed means: depth {}, ph {}, tds {}",
            mean_text(result.rows.iter().map(|row| row.record.depth)),
            mean_text(result.rows.iter().map(|row| row.record.ph)),
            mean_text(result.rows.iter().map(|row| row.record.tds)),
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No rows were classified.");
    } else {
        for summary in summaries.iter() {
            let share = summary.count as f64 / result.len() as f64 * 100.0;
            let _ = writeln!(
                output,
                "- {}: {} rows ({:.1}%)",
                summary.label, summary.count, share
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Results");

    if result.is_empty() {
        let _ = writeln!(output, "No rows in the uploaded table.");
        return output;
    }

    let _ = writeln!(output, "| {} |", escape_row(&result.headers).join(" | "));
    let _ = writeln!(
        output,
        "|{}",
        result.headers.iter().map(|_| " --- |").collect::<String>()
    );
    for row in &result.rows {
        let _ = writeln!(
            output,
            "| {} |",
            escape_row(&table::output_cells(row)).join(" | ")
        );
    }

    output
}

// Non-numeric readings are skipped.
fn mean_text(readings: impl Iterator<Item = Option<f64>>) -> String {
    let (sum, count) = readings
        .flatten()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        "n/a".to_string()
    } else {
        format!("{:.2}", sum / count as f64)
    }
}

fn escape_row(cells: &[String]) -> Vec<String> {
    cells.iter().map(|cell| cell.replace('|', "\\|")).collect()
}
