//! CLI entry point for the feature pipeline.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use lex_features::{Degradation, Pipeline, PipelineSpec};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    author = "Lex Machina Team",
    version,
    about = "Fit/transform feature pipeline for tabular data",
    long_about = "Fits a feature pipeline described by a JSON spec on a CSV file and writes \
                  the transformed table.\n\n\
                  EXAMPLES:\n  \
                  # Fit and transform a training file\n  \
                  lex-features -i train.csv -s pipeline.json -t Survived -o features.csv\n\n  \
                  # Print a JSON run summary\n  \
                  lex-features -i train.csv -s pipeline.json --json"
)]
struct Args {
    /// Path to the CSV file to process
    #[arg(short, long)]
    input: String,

    /// Path to the pipeline spec (JSON)
    #[arg(short, long)]
    spec: String,

    /// Target column; overrides the target named in the pipeline file
    #[arg(short, long)]
    target: Option<String>,

    /// Output CSV file
    #[arg(short, long, default_value = "./outputs/features.csv")]
    output: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,

    /// Print a JSON run summary to stdout instead of log output
    #[arg(long)]
    json: bool,
}

/// Summary printed with `--json`.
#[derive(Debug, Serialize)]
struct RunSummary {
    rows: usize,
    columns: Vec<String>,
    stages: Vec<&'static str>,
    degradations: Vec<Degradation>,
    output: String,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout only carries JSON.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);

    if !Path::new(&args.input).exists() {
        return Err(anyhow!("Input file not found: {}", args.input));
    }

    let spec_text = std::fs::read_to_string(&args.spec)
        .with_context(|| format!("Reading pipeline spec {}", args.spec))?;
    let mut spec = PipelineSpec::from_json(&spec_text).context("Parsing pipeline spec")?;
    if let Some(target) = &args.target {
        spec.target = Some(target.clone());
    }

    info!("Loading dataset from: {}", args.input);
    let data = load_csv(&args.input)?;
    info!("Dataset loaded successfully: {:?}", data.shape());

    let (x, y) = split_target(data, spec.target.as_deref())?;

    let mut pipeline = Pipeline::from_spec(&spec)?;
    debug!("Stages: {:?}", pipeline.stage_names());
    let mut out = pipeline.fit_transform(x, y.as_ref())?;

    let degradations = pipeline.degradations();
    for d in &degradations {
        warn!(
            "Stage '{}' fell back{}: {}",
            d.stage,
            d.column
                .as_deref()
                .map(|c| format!(" on '{}'", c))
                .unwrap_or_default(),
            d.reason
        );
    }

    write_csv(&mut out, &args.output)?;
    info!("Features saved: {}", args.output);

    if args.json {
        let summary = RunSummary {
            rows: out.height(),
            columns: out
                .get_column_names()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            stages: pipeline.stage_names(),
            degradations,
            output: args.output.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Wrote {} rows x {} columns to {} ({} fallbacks)",
            out.height(),
            out.width(),
            args.output,
            pipeline.degradations().len()
        );
    }

    Ok(())
}

/// Separate the target column from the features, if one is named.
fn split_target(data: DataFrame, target: Option<&str>) -> Result<(DataFrame, Option<Series>)> {
    let Some(target) = target else {
        return Ok((data, None));
    };
    let y = data
        .column(target)
        .map_err(|_| anyhow!("Target column '{}' not found in dataset", target))?
        .as_materialized_series()
        .clone();
    let x = data.drop(target)?;
    Ok((x, Some(y)))
}

fn load_csv(path: &str) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(100))
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
        .try_into_reader_with_file_path(Some(PathBuf::from(path)))?
        .finish()?;
    Ok(df)
}

fn write_csv(df: &mut DataFrame, path: &str) -> Result<()> {
    if let Some(dir) = Path::new(path).parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .with_quote_char(b'"')
        .finish(df)?;
    Ok(())
}
