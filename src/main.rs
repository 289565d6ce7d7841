use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use switchboard::config::{Config, ConfigError};
use switchboard::error::{ErrorSeverity, SwitchboardError, SwitchboardResult};
use switchboard::utils::format_duration;
use switchboard::{RunningSwitchboard, Switchboard};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "A connection router that keeps MySQL clients on one healthy Galera node")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/switchboard.toml")]
        config: PathBuf,
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
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_switchboard(config).await?,
        Commands::Config { output } => generate_config(output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

async fn run_switchboard(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), config = ?config_path, "Starting switchboard");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = start_switchboard(config, shutdown_rx)
        .await
        .inspect_err(report_startup_failure)
        .context("Failed to start switchboard")?;

    shutdown_signal().await?;
    info!("Shutdown signal received");

    // Every task holds a receiver; a send error only means they are all gone already
    let _ = shutdown_tx.send(true);
    running.wait().await;

    Ok(())
}

async fn start_switchboard(
    config: Config,
    shutdown: watch::Receiver<bool>,
) -> SwitchboardResult<RunningSwitchboard> {
    Switchboard::new(config)?.start(shutdown).await
}

fn report_startup_failure(e: &SwitchboardError) {
    match e.severity() {
        ErrorSeverity::Critical | ErrorSeverity::Error => error!(
            severity = %e.severity(),
            recoverable = e.is_recoverable(),
            error = %e,
            "Switchboard failed to start"
        ),
        ErrorSeverity::Warning | ErrorSeverity::Info => warn!(
            severity = %e.severity(),
            recoverable = e.is_recoverable(),
            error = %e,
            "Switchboard failed to start"
        ),
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;

    Ok(())
}

fn generate_config(output: PathBuf) -> anyhow::Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the backends to match your cluster and run:");
    println!("  switchboard run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Proxy address: {}", config.proxy_listen_addr());
            match config.inactive_listen_addr() {
                Some(addr) => println!("  Inactive address: {}", addr),
                None => println!("  Inactive router: disabled"),
            }
            println!(
                "  Health check timeout: {}, poll interval: {}",
                format_duration(config.proxy.healthcheck_timeout()),
                format_duration(config.proxy.poll_interval())
            );
            println!(
                "  Available when donor: {}, when read-only: {}",
                config.proxy.available_when_donor, config.proxy.available_when_read_only
            );
            println!(
                "  Galera agent TLS: {}",
                if config.galera_agent_tls.enabled { "enabled" } else { "disabled" }
            );
            println!("  Backends: {}", config.proxy.backends.len());
            for (i, backend) in config.proxy.backends.iter().enumerate() {
                println!(
                    "    {}: {} {}:{} (status port {})",
                    i + 1,
                    backend.name,
                    backend.host,
                    backend.port,
                    backend.status_port
                );
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("switchboard v{}", env!("CARGO_PKG_VERSION"));
    println!("A connection router for Galera clusters");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Single active node selection from galera agent health");
    println!("  • Session severing on failover and traffic disable");
    println!("  • Optional inactive router for reporting traffic");
    println!("  • Plain HTTP or TLS health checks");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("switchboard={}", config.logging.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(level = %config.logging.level, format = %config.logging.format, "Logging initialized");
    Ok(())
}
