use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{NaiveDate, NaiveTime, Utc};
use clap::Parser;
use spendcast::{
    config::{DEFAULT_CONFIG_TOML, SpendcastConfig},
    events::EventBus,
    models::{ForecastStrategy, UsageQuery},
    observability,
    pipeline_sink::{CompositeSink, JsonFileSink, LogSink},
    record_source::FileRecordSource,
    services::{ForecastEngine, Pipeline, PipelineOptions, RunReport},
};
use tokio_util::sync::CancellationToken;

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "spendcast.toml";

/// CLI arguments for spendcast
#[derive(Parser, Debug)]
#[command(version, about = "LLM API usage forecasting and cost alerting", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./spendcast.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Analyze usage, forecast costs and evaluate thresholds
    Run {
        /// Usage record file (overrides source.path)
        #[arg(short, long)]
        records: Option<PathBuf>,
        /// Forecasting strategy (overrides forecast.strategy)
        #[arg(short, long, value_enum)]
        strategy: Option<ForecastStrategy>,
        /// Days to forecast (overrides forecast.horizon_days)
        #[arg(long)]
        horizon: Option<usize>,
        /// Run date; forecasts start the day after (defaults to today, UTC)
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Write the run report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./spendcast.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Init { output, force } => run_init(output, force),
        Command::CheckConfig => {
            let config = load_config(args.config.as_deref());
            match config.to_toml_string() {
                Ok(toml) => print!("{toml}"),
                Err(e) => {
                    eprintln!("Failed to render config: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run {
            records,
            strategy,
            horizon,
            today,
            output,
        } => {
            let mut config = load_config(args.config.as_deref());
            if let Some(strategy) = strategy {
                config.forecast.strategy = strategy;
            }
            if let Some(horizon) = horizon {
                config.forecast.horizon_days = horizon;
            }
            if let Err(e) = config.validate() {
                eprintln!("Invalid configuration: {e}");
                std::process::exit(1);
            }

            if let Err(e) = observability::init_tracing(&config.observability) {
                eprintln!("Failed to initialize logging: {e}");
            }

            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let report = run_pipeline(&config, records.as_deref(), today).await;
            write_report(&report, output.as_deref());

            if !report.is_done() {
                std::process::exit(1);
            }
        }
    }
}

/// Load the config from an explicit path, `./spendcast.toml`, or defaults.
fn load_config(explicit: Option<&Path>) -> SpendcastConfig {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    let Some(path) = path else {
        return SpendcastConfig::default();
    };
    match SpendcastConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

async fn run_pipeline(
    config: &SpendcastConfig,
    records: Option<&Path>,
    today: NaiveDate,
) -> RunReport {
    let source = match FileRecordSource::from_config(&config.source, records) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let client = match reqwest::Client::builder().build() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };
    let engine = ForecastEngine::from_config(&config.generator, client);

    let mut forecast_sink = CompositeSink::new().with_forecast_sink(Arc::new(LogSink));
    let mut alert_sink = CompositeSink::new().with_alert_sink(Arc::new(LogSink));
    if let Some(path) = &config.output.forecasts_path {
        forecast_sink = forecast_sink.with_forecast_sink(Arc::new(JsonFileSink::new(path)));
    }
    if let Some(path) = &config.output.alerts_path {
        alert_sink = alert_sink.with_alert_sink(Arc::new(JsonFileSink::new(path)));
    }

    let pipeline = Pipeline::new(engine, PipelineOptions::from_config(config))
        .with_events(EventBus::new())
        .with_forecast_sink(Arc::new(forecast_sink))
        .with_alert_sink(Arc::new(alert_sink));

    // The window ends at the close of the run date
    let end = today.and_time(NaiveTime::MIN).and_utc() + chrono::Duration::days(1)
        - chrono::Duration::nanoseconds(1);
    let query = UsageQuery {
        timeframe: config.forecast.timeframe,
        end,
        models: config.forecast.models.clone(),
        api_key_id: config.source.api_key_id.clone(),
        project_id: config.source.project_id.clone(),
        provider: config.source.provider.clone(),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    pipeline.execute(&source, &query, today, &cancel).await
}

fn write_report(report: &RunReport, output: Option<&Path>) {
    let json = match serde_json::to_string_pretty(report) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Failed to serialize run report: {e}");
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, json) {
                eprintln!("Failed to write report to {}: {e}", path.display());
                std::process::exit(1);
            }
        }
        None => println!("{json}"),
    }
}

fn run_init(output: Option<PathBuf>, force: bool) {
    let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, DEFAULT_CONFIG_TOML) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To run a forecast, run:");
    println!(
        "  spendcast --config {} run --records usage.jsonl",
        output_path.display()
    );
}
