//! transferbuf command-line tool
//!
//! Copies a file through a transfer buffer pool, optionally with several
//! parallel reader streams and an in-order CRC32.
//!
//! # Examples
//!
//! ```bash
//! # Copy with four reader streams and 256 KiB blocks
//! transferbuf copy big.dat /mnt/dest/big.dat --streams 4 --blocks 8 --block-size 262144
//!
//! # Show the configuration that would be used
//! transferbuf config --config delivery.toml
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transferbuf::delivery::{FileSink, FileSource};
use transferbuf::{metrics, ChecksumKind, Delivery, DeliveryConfig};

/// transferbuf - buffered, checksummed data movement
#[derive(Parser, Debug)]
#[command(name = "transferbuf")]
#[command(version = transferbuf::VERSION)]
#[command(about = "Buffered, checksummed data movement", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "TRANSFERBUF_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "TRANSFERBUF_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy SOURCE to DEST through the transfer pool
    Copy(CopyArgs),

    /// Print the effective configuration
    Config,

    /// Show version
    Version,
}

/// Copy arguments; each flag overrides the configuration file
#[derive(Args, Debug)]
struct CopyArgs {
    /// Source file
    source: PathBuf,

    /// Destination file (created or truncated)
    dest: PathBuf,

    /// Bytes per block
    #[arg(long)]
    block_size: Option<usize>,

    /// Number of blocks in the pool
    #[arg(long)]
    blocks: Option<usize>,

    /// Parallel reader streams
    #[arg(long)]
    streams: Option<usize>,

    /// Checksum type (crc32, cksum, none)
    #[arg(long)]
    checksum: Option<ChecksumKind>,

    /// Print Prometheus metrics after the copy
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match cli.command {
        Commands::Copy(args) => copy_command(cli.config, args).await,
        Commands::Config => {
            let config = DeliveryConfig::load(cli.config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Commands::Version => {
            println!("transferbuf {}", transferbuf::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "transferbuf.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    // Console logs go to stderr; stdout carries the report
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Copy command - move one file through the pool
async fn copy_command(config_path: Option<PathBuf>, args: CopyArgs) -> anyhow::Result<()> {
    let mut config = DeliveryConfig::load(config_path.as_deref())?;
    if let Some(block_size) = args.block_size {
        config.pool.block_size = block_size;
    }
    if let Some(blocks) = args.blocks {
        config.pool.block_count = blocks;
    }
    if let Some(streams) = args.streams {
        config.streams = streams;
    }
    if let Some(checksum) = args.checksum {
        config.checksum = checksum;
    }

    metrics::init_metrics();

    let source = FileSource::open(&args.source)
        .with_context(|| format!("Failed to open source {}", args.source.display()))?;
    let sink = FileSink::create(&args.dest)
        .with_context(|| format!("Failed to create destination {}", args.dest.display()))?;
    info!(
        source = %args.source.display(),
        dest = %args.dest.display(),
        "Copying"
    );

    let delivery = Delivery::from_config(&config, Arc::new(source), Arc::new(sink))?;
    let report = match delivery.run().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Copy failed");
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if args.metrics {
        print!("{}", metrics::gather());
    }
    Ok(())
}
