//! CloudEvent Bridge - Kubernetes event log records to CloudEvents
//!
//! Reads log batches as JSON lines and either delivers them to an HTTP sink
//! or rewrites them into structured CloudEvents.

use anyhow::Context;
use clap::{Parser, Subcommand};
use cloudevent_core::config::{self, BridgeConfig, ConfigLoader};
use cloudevent_core::logs::LogBatch;
use cloudevent_core::plugins::{LogsExporter, LogsProcessor, PluginInfo};
use cloudevent_core::CloudEventTransform;
use cloudevent_export::CloudEventExporter;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cloudevent-bridge")]
#[command(version)]
#[command(about = "Turns Kubernetes event log records into CloudEvents", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format (json, text)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "CE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver log batches to the configured endpoint
    Export {
        /// Input file with one JSON log batch per line ("-" for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Rewrite log records into structured CloudEvents
    Transform {
        /// Input file with one JSON log batch per line ("-" for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file for envelopes, one per line (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = ConfigLoader::new().with_cli_path(cli.config.clone()).load();

    // CLI verbose flag takes precedence over the configured level
    let configured = loaded
        .as_ref()
        .map(|c| c.bridge.log_level.as_str())
        .unwrap_or("warn");
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match configured.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };
    init_logging(log_level, &cli.format)?;

    let bridge_config = loaded.context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    match cli.command {
        Commands::Export { input } => export_command(bridge_config, &input).await,
        Commands::Transform { input, output } => {
            transform_command(&bridge_config, &input, output.as_deref()).await
        }
        Commands::CheckConfig => check_config_command(&bridge_config),
    }
}

fn init_logging(level: Level, format: &str) -> anyhow::Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => tracing::subscriber::set_global_default(builder.json().finish())?,
        "text" => tracing::subscriber::set_global_default(builder.finish())?,
        other => anyhow::bail!("Unknown log format: {} (expected json or text)", other),
    }
    Ok(())
}

async fn open_input(path: &Path) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Read batches line by line, skipping blank lines.
///
/// Lines that do not parse are logged and skipped.
async fn next_batch(
    lines: &mut tokio::io::Lines<Box<dyn AsyncBufRead + Unpin + Send>>,
    line_no: &mut usize,
) -> anyhow::Result<Option<LogBatch>> {
    while let Some(line) = lines.next_line().await? {
        *line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<LogBatch>(&line) {
            Ok(batch) => return Ok(Some(batch)),
            Err(e) => warn!("Skipping line {}: not a log batch: {}", line_no, e),
        }
    }
    Ok(None)
}

async fn export_command(config: BridgeConfig, input: &Path) -> anyhow::Result<()> {
    let mut exporter = CloudEventExporter::new(config)?;
    info!(
        "Starting {} v{} -> {}",
        exporter.name(),
        exporter.version(),
        exporter.config().export.endpoint
    );
    exporter.start().await?;

    let mut lines = open_input(input).await?.lines();
    let mut line_no = 0;
    let mut batches = 0u64;
    let mut rejected = 0u64;

    while let Some(batch) = next_batch(&mut lines, &mut line_no).await? {
        batches += 1;
        debug!("Pushing batch {} with {} records", batches, batch.record_count());
        if let Err(e) = exporter.push_logs(batch).await {
            error!("Batch on line {} rejected: {}", line_no, e);
            rejected += 1;
        }
    }

    exporter.shutdown().await?;

    let stats = exporter.stats();
    println!("Batches:           {}", batches);
    println!("Batches rejected:  {}", rejected);
    println!("Delivered:         {}", stats.delivered);
    println!("Failed:            {}", stats.failed);
    println!("Throttled:         {}", stats.throttled);
    println!("Retried:           {}", stats.retried);
    println!("Validation errors: {}", stats.validation_errors);

    Ok(())
}

async fn transform_command(
    config: &BridgeConfig,
    input: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let transform = CloudEventTransform::from_config(config)?;

    let mut out: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut lines = open_input(input).await?.lines();
    let mut line_no = 0;
    let mut written = 0u64;

    while let Some(batch) = next_batch(&mut lines, &mut line_no).await? {
        let batch = match transform.process_logs(batch).await {
            Ok(batch) => batch,
            Err(e) => {
                error!("Batch on line {} rejected: {}", line_no, e);
                continue;
            }
        };

        for record in batch.records() {
            out.write_all(record.body.as_bytes()).await?;
            out.write_all(b"\n").await?;
            written += 1;
        }
    }

    out.flush().await?;
    info!("Wrote {} envelopes", written);
    Ok(())
}

fn check_config_command(config: &BridgeConfig) -> anyhow::Result<()> {
    config.export.validate()?;
    config.reason_filter()?;

    println!("{}", config::to_toml(config)?);
    Ok(())
}
