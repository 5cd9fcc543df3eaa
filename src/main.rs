use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use votier::config::{Config, ConfigError};
use votier::utils::format_duration;
use votier::Coordinator;

#[derive(Parser)]
#[command(name = "votier")]
#[command(about = "Cluster coordination core with tiered record storage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/votier.toml")]
        config: PathBuf,
    },
    /// Generate an example configuration file
    Config {
        /// Primary storage backend (memory, redis or file)
        #[arg(short, long, default_value = "memory")]
        storage: String,
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
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_coordinator(config).await?,
        Commands::Config { storage, output } => generate_config(&storage, output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

async fn run_coordinator(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config)?;

    info!("Starting votier v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);

    let coordinator = Coordinator::start(&config)
        .await
        .context("Failed to start coordinator")?;

    if config.server.self_register {
        coordinator.register_self().await;
    }

    let mut ticker = tokio::time::interval(config.health.interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => log_status(&coordinator).await,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

async fn log_status(coordinator: &Coordinator) {
    let cluster = coordinator.nodes().cluster_status().await;
    info!(
        "Cluster: {}/{} nodes healthy, strategy {}",
        cluster.healthy_nodes, cluster.total_nodes, cluster.strategy
    );
    for node in &cluster.nodes {
        let since_check = node.last_health_check.elapsed().unwrap_or_default();
        info!(
            "  {} {}:{} healthy={} active={} requests={} errors={} avg={:.1}ms checked {} ago",
            node.node_id,
            node.host,
            node.port,
            node.healthy,
            node.active_connections,
            node.total_requests,
            node.error_count,
            node.avg_response_time_ms,
            format_duration(since_check)
        );
    }

    let storage = coordinator.storage().statistics().await;
    info!(
        "Storage: {} records, primary {} backup {}",
        storage.total_records,
        storage.primary_backend,
        storage.secondary_backend.unwrap_or("none")
    );
}

fn generate_config(storage: &str, output: PathBuf) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", storage, output);

    Config::create_example_config(&output, storage).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  votier run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Advertised address: {}:{}", config.server.host, config.server.port);
            println!("  Storage: {} ({})", config.storage.storage_type, config.storage.file_path);
            println!("  Strategy: {}", config.balancer.strategy);
            println!(
                "  Health checks: every {}s, timeout {}s",
                config.health.interval_sec, config.health.timeout_sec
            );
            println!("  Static nodes: {}", config.cluster.nodes.len());
            for (i, node) in config.cluster.nodes.iter().enumerate() {
                println!(
                    "    {}: {} {}:{} (weight {})",
                    i + 1,
                    node.node_id,
                    node.host,
                    node.port,
                    node.weight
                );
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
    println!("votier v{}", env!("CARGO_PKG_VERSION"));
    println!("Cluster coordination core with tiered record storage");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Round-robin, weighted, random, least-connections and least-response-time selection");
    println!("  • Background HTTP/TCP health monitoring");
    println!("  • Memory, Redis-protocol and file record storage with file backup");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}
