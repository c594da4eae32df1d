use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod artifacts;
mod error;
mod forecast;
mod models;
mod pipeline;
mod report;
mod risk;
mod table;

use models::Signal;
use pipeline::PipelineContext;

#[derive(Parser)]
#[command(name = "wasteguard-forecast")]
#[command(about = "Forecast depth, pH and TDS readings and classify their risk", long_about = None)]
struct Cli {
    /// Forecast model set (JSON with depth, ph and tds models)
    #[arg(
        long,
        global = true,
        env = "WASTEGUARD_FORECAST_MODELS",
        default_value = "models/forecast_models.json"
    )]
    forecast_models: PathBuf,

    /// Risk classifier (JSON tree ensemble)
    #[arg(
        long,
        global = true,
        env = "WASTEGUARD_CLASSIFIER",
        default_value = "models/risk_classifier.json"
    )]
    classifier: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast every row of a CSV and classify the forecasts
    Forecast {
        /// Input CSV with at least ds, depth, ph and tds columns
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "hasil_forecast_klasifikasi.csv")]
        out: PathBuf,
        /// Also write a markdown summary here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Classify manually entered values without forecasting
    Classify {
        #[arg(long, value_parser = depth_value)]
        depth: f64,
        #[arg(long, value_parser = ph_value)]
        ph: f64,
        #[arg(long, value_parser = tds_value)]
        tds: f64,
    },
    /// Print one signal's forecast at a timestamp
    Predict {
        #[arg(long)]
        signal: String,
        #[arg(long)]
        ds: String,
    },
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Forecast {
            csv,
            out,
            report: report_path,
        } => {
            let context = load_context(&cli.forecast_models, &cli.classifier)?;
            let input = table::read_csv_path(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let result = context
                .run_table(input)
                .context("forecast and classification failed")?;

            let bytes = table::result_table_to_csv(&result)?;
            std::fs::write(&out, bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Forecast & classification complete: {} rows written to {}.",
                result.len(),
                out.display()
            );
            for summary in report::summarize_labels(&result) {
                println!("- {}: {} rows", summary.label, summary.count);
            }

            if let Some(path) = report_path {
                let source = csv.file_name().and_then(|name| name.to_str());
                std::fs::write(&path, report::build_report(source, &result))
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Report written to {}.", path.display());
            }
        }
        Commands::Classify { depth, ph, tds } => {
            let context = load_context(&cli.forecast_models, &cli.classifier)?;
            let record = context
                .run_manual(depth, ph, tds)
                .context("classification failed")?;
            table::write_result_record(&record, std::io::stdout().lock())?;
        }
        Commands::Predict { signal, ds } => {
            let forecasters = artifacts::load_forecast_models(&cli.forecast_models)
                .with_context(|| {
                    format!("failed to load {}", cli.forecast_models.display())
                })?;
            let timestamp = table::parse_timestamp(&ds)
                .with_context(|| format!("cannot parse {ds:?} as a timestamp"))?;
            let raw = forecasters.forecast(&signal, timestamp)?;
            let clamped = forecast::clamp(signal.parse::<Signal>()?, raw);
            println!(
                "{signal} at {timestamp}: raw {raw}, clamped {}",
                table::format_value(clamped)
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wasteguard_forecast=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_context(forecast_models: &Path, classifier: &Path) -> anyhow::Result<PipelineContext> {
    let forecasters = artifacts::load_forecast_models(forecast_models)
        .with_context(|| format!("failed to load {}", forecast_models.display()))?;
    let classifier = artifacts::load_classifier(classifier)
        .with_context(|| format!("failed to load {}", classifier.display()))?;
    Ok(PipelineContext::new(forecasters, classifier))
}

fn bounded(value: &str, low: f64, high: f64) -> Result<f64, String> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("{value:?} is not a number"))?;
    if !(low..=high).contains(&parsed) {
        return Err(format!("must be between {low} and {high}"));
    }
    Ok(parsed)
}

fn depth_value(value: &str) -> Result<f64, String> {
    bounded(value, 0.0, 20.0)
}

fn ph_value(value: &str) -> Result<f64, String> {
    bounded(value, 0.0, 14.0)
}

fn tds_value(value: &str) -> Result<f64, String> {
    bounded(value, 0.0, 5000.0)
}
