use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rethinkdb_gather::config::{Config, ConfigError, LoggingConfig};
use rethinkdb_gather::error::GatherError;
use rethinkdb_gather::{LineProtocolWriter, RethinkDB};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rethinkdb-gather")]
#[command(about = "Collect query-engine metrics from one or many RethinkDB servers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every configured server once and print metrics as line protocol
    Gather {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Extra server address, may be repeated
        #[arg(short, long = "server")]
        servers: Vec<String>,
    },
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gather { config, servers } => run_gather(config, servers).await,
        Commands::Config { output } => generate_config(output),
        Commands::Validate { config } => validate_config(config),
        Commands::Version => {
            show_version();
            Ok(())
        }
    }
}

async fn run_gather(config_path: Option<PathBuf>, extra_servers: Vec<String>) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    config.gather.servers.extend(extra_servers);
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging);
    info!("Starting rethinkdb-gather v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Configuration loaded from: {:?}", path);
    }

    let input = RethinkDB::new(config.gather.clone());
    let acc = Arc::new(LineProtocolWriter::new(std::io::stdout()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding polls");
            on_signal.cancel();
        }
    });

    match input.gather_until(acc, cancel).await {
        Ok(()) => Ok(()),
        Err(GatherError::Servers(agg)) => {
            for failure in &agg.failures {
                error!("{}", failure);
            }
            Err(GatherError::Servers(agg).into())
        }
        Err(e) => Err(e.into()),
    }
}

fn generate_config(output: PathBuf) -> Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  rethinkdb-gather gather --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Timeout: {}s", config.gather.timeout_sec);
            println!("  Connect timeout: {}s", config.gather.connect_timeout_sec);
            if config.gather.servers.is_empty() {
                println!("  No servers configured, the local default server will be polled");
            } else {
                println!("  RethinkDB servers: {} instances", config.gather.servers.len());
                for (i, server) in config.gather.servers.iter().enumerate() {
                    println!("    {}: {}", i + 1, server);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            Err(e.into())
        }
    }
}

fn show_version() {
    println!("rethinkdb-gather v{}", env!("CARGO_PKG_VERSION"));
    println!("Collect query-engine metrics from one or many RethinkDB servers");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Reported metrics (tagged with host):");
    println!("  • active_clients");
    println!("  • clients");
    println!("  • queries_per_sec");
    println!("  • read_docs_per_sec");
    println!("  • written_docs_per_sec");
}

/// Logs go to stderr; stdout carries the metrics
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rethinkdb_gather={}", logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
