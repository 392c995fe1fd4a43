use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vstorm_core::{BenchmarkRunner, Config, Dataset, RunMetrics, RunStatus, adapters};

#[derive(Parser)]
#[command(name = "vstorm")]
#[command(about = "Vector database benchmarking tool", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "vstorm.yaml")]
    config: PathBuf,

    /// Dataset: a YAML file or a directory with the parquet triple
    #[arg(short, long)]
    dataset: PathBuf,

    /// Drop and recreate the benchmark collection before loading
    #[arg(long)]
    drop_old: bool,

    /// Output format for the result record
    #[arg(long, default_value = "json")]
    output: OutputFormat,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = Config::from_file(&cli.config)?;

    eprintln!("Loading dataset...");
    let dataset = Dataset::from_file(&cli.dataset)?;
    let dim = dataset.dim()?;
    eprintln!(
        "Loaded {} train vectors, {} queries, dimension {dim}",
        dataset.train.len(),
        dataset.queries.len()
    );

    eprintln!("Constructing adapter...");
    let adapter = adapters::build(&config.adapter, dim, &config.case, cli.drop_old).await?;

    let runner = BenchmarkRunner::new(adapter, config.case.clone(), config.run.clone());
    let backend = runner.adapter_name().to_string();

    eprintln!("Running benchmark...");
    let record = runner.run(&dataset).await;
    let metrics = RunMetrics::from_record(&backend, &record);

    match cli.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        OutputFormat::Csv => {
            println!(
                "backend,status,inserted,load_qps,optimize_ms,search_qps,p50_ms,p95_ms,p99_ms,recall"
            );
            println!(
                "{},{:?},{},{},{},{},{},{},{},{}",
                metrics.backend,
                metrics.status,
                metrics.inserted,
                fmt_f64(metrics.load_qps),
                fmt_u64(metrics.optimize_duration_ms),
                fmt_f64(metrics.search_qps),
                fmt_f64(metrics.latency.as_ref().map(|l| l.p50_us as f64 / 1000.0)),
                fmt_f64(metrics.latency.as_ref().map(|l| l.p95_us as f64 / 1000.0)),
                fmt_f64(metrics.latency.as_ref().map(|l| l.p99_us as f64 / 1000.0)),
                fmt_f64(metrics.recall),
            );
        }
    }

    if metrics.status == RunStatus::Fatal {
        std::process::exit(1);
    }
    Ok(())
}

/// Absent values print empty so a reader cannot mistake them for zero
fn fmt_f64(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

fn fmt_u64(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
