//! fedstats -- poll federated storage endpoints and publish their usage.
//!
//! One invocation is one polling cycle; run it from cron or a systemd
//! timer at the shortest configured frequency.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fedstats::config::{Config, LoggingConfig};
use fedstats::output::{self, Sink};

/// Command-line arguments for fedstats.
#[derive(Parser, Debug)]
#[command(
    name = "fedstats",
    version,
    about = "Storage statistics poller for federated S3, Azure and WebDAV endpoints"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/fedstats/fedstats.yaml")]
    config: PathBuf,

    /// Only poll this endpoint id. Repeatable.
    #[arg(short, long = "endpoint")]
    endpoints: Vec<String>,

    /// Poll every endpoint regardless of cached freshness.
    #[arg(short, long)]
    force: bool,

    /// Output sink. Repeatable.
    #[arg(short, long = "output", value_enum, default_values_t = [Sink::Stdout])]
    outputs: Vec<Sink>,

    /// Directory for plaintext and JSON output (overrides `output.directory`).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Print the full status history of each endpoint on stdout.
    #[arg(long)]
    debug: bool,

    /// Log level (overrides `RUST_LOG` and `logging.level`).
    #[arg(long)]
    log_level: Option<String>,

    /// Append logs to this file (overrides `logging.file`).
    #[arg(long)]
    logfile: Option<PathBuf>,
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&logging.level))?,
    };
    let json = logging.format.eq_ignore_ascii_case("json");

    match cli.logfile.as_ref().or(logging.file.as_ref()) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        None => {
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config: Config = fedstats::config::load_config(&cli.config)
        .with_context(|| format!("cannot load configuration {}", cli.config.display()))?;
    init_logging(&cli, &config.logging)?;
    info!("Loaded configuration from {}", cli.config.display());

    fedstats::metrics::init_metrics();
    fedstats::metrics::describe_metrics();

    let options = fedstats::RunOptions {
        endpoints: cli.endpoints.clone(),
        force: cli.force,
    };
    let cache = fedstats::build_cache(&config.cache)?;
    let report = fedstats::run(&config, &cache, &options).await?;
    let mut records = output::records(&report);
    if cli.debug {
        output::attach_cache_snapshots(&cache, &mut records).await;
    }

    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output.directory.clone());
    for sink in &cli.outputs {
        match sink {
            Sink::Stdout => output::write_stdout(&mut std::io::stdout().lock(), &records, cli.debug)?,
            Sink::Plaintext => {
                let path = output::write_plaintext(&output_dir, &records)?;
                info!("Wrote {}", path.display());
            }
            Sink::Json => {
                let path = output::write_json(&output_dir, &records)?;
                info!("Wrote {}", path.display());
            }
            Sink::Xml => {
                let path = output::write_xml(&output_dir, &records)?;
                info!("Wrote {}", path.display());
            }
        }
    }

    if let Some(path) = &config.metrics.textfile {
        fedstats::metrics::write_textfile(path)?;
    }

    info!("Polled {} endpoint(s)", records.len());
    Ok(())
}
