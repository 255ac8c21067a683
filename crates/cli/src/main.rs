//! Kernel Pool CLI - Main entry point
//!
//! Validates kernel pool configuration files and warms the registrations
//! they declare.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing::{info, warn};

use kernel_pool_config::{lint_config, Config};

mod warm;

/// kernel-pool - Validate and warm pooled model registrations
#[derive(Parser, Debug)]
#[command(name = "kernel-pool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "KERNEL_POOL_CONFIG", global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate and lint a configuration file
    Test,
    /// Register every entry, construct each kernel once, print status and remove
    Warm {
        /// Print the report as JSON
        #[arg(long = "json")]
        json: bool,

        /// Per-entry construction timeout in seconds
        #[arg(long = "timeout-secs", default_value_t = 30)]
        timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config_path = cli
        .config
        .context("No configuration file given (use --config or KERNEL_POOL_CONFIG)")?;

    match cli.command {
        Commands::Test => test_config(&config_path),
        Commands::Warm { json, timeout_secs } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(warm_config(&config_path, json, Duration::from_secs(timeout_secs)))
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load a configuration and fail on validation errors. Warnings are logged.
fn load_validated(config_path: &str) -> Result<Config> {
    info!("Loading configuration file: {}", config_path);
    let config = Config::from_file(config_path).context("Failed to load configuration file")?;

    let validation = config.validate();
    for error in &validation.errors {
        warn!(category = %error.category, "{}", error.message);
    }
    if !validation.is_valid() {
        anyhow::bail!(
            "Configuration validation failed with {} error(s)",
            validation.errors.len()
        );
    }

    for warning in &lint_config(&config).warnings {
        warn!("{}", warning);
    }
    Ok(config)
}

/// Test configuration file and exit
fn test_config(config_path: &str) -> Result<()> {
    let config = load_validated(config_path)?;

    info!("Configuration test successful:");
    info!("  - {} pool(s)", config.pools.len());
    info!("  - {} entry(ies)", config.entry_count());
    info!("  - on-conflict {}", config.registry.on_conflict.as_str());

    println!(
        "kernel-pool: configuration file {} test is successful",
        config_path
    );
    Ok(())
}

/// Warm every configured entry and print the result
async fn warm_config(config_path: &str, json: bool, timeout: Duration) -> Result<()> {
    let config = load_validated(config_path)?;
    let report = warm::warm(&config, timeout).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", warm::render_table(&report));
    }

    if report.failed > 0 {
        anyhow::bail!(
            "{} of {} entries failed to warm",
            report.failed,
            report.entries.len()
        );
    }
    Ok(())
}
