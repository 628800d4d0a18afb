//! Droplink - Edge node for the Drops irrigation controller
//!
//! Maintains one long-lived, mutually authenticated connection to the
//! controller and multiplexes measurement reports and remote commands
//! over it, correlated by per-exchange ids.

mod actuator;
mod config;
mod engine;
mod protocol;
mod sensor;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use actuator::ActionTable;
use config::Config;
use engine::Engine;
use sensor::SimulatedLevel;

/// Droplink - Edge node for the Drops irrigation controller
#[derive(Parser)]
#[command(name = "droplink")]
#[command(author = "Droplink Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Report water levels and run watering commands from a central controller", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the controller and run until the session dies
    Run {
        /// Controller address (host:port)
        #[arg(short, long)]
        addr: Option<String>,

        /// CA certificate the controller must be signed with
        #[arg(long)]
        ca_cert: Option<PathBuf>,

        /// Client certificate to present
        #[arg(long)]
        cert: Option<PathBuf>,

        /// Client private key
        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            addr,
            ca_cert,
            cert,
            key,
        } => {
            if let Some(addr) = addr {
                config.network.controller_addr = addr;
            }
            if let Some(ca_cert) = ca_cert {
                config.security.ca_cert = ca_cert;
            }
            if let Some(cert) = cert {
                config.security.certificate = cert;
            }
            if let Some(key) = key {
                config.security.key = key;
            }

            run_node(config).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_node_info(&config);
        }
    }

    Ok(())
}

/// Connect to the controller and drive the session to its end.
///
/// Only returns once the session is fatally broken; the resulting error
/// terminates the process. Reconnection policy, if any, belongs to the
/// supervisor running this binary.
async fn run_node(config: Config) -> anyhow::Result<()> {
    let addr = config.network.controller_addr.clone();

    tracing::info!(
        "Starting droplink node '{}' ({} {})",
        config.node_id(),
        config.general.role,
        config.general.description
    );

    let stream = transport::connect(
        &addr,
        &config.tls_settings(),
        Duration::from_millis(config.network.connect_timeout_ms),
    )
    .await?;

    let actions = ActionTable::with_defaults();
    let source = Arc::new(SimulatedLevel::new(config.calibration()));
    let engine = Engine::new(config.engine_config(), actions, source);

    println!("\n========================================");
    println!("  Droplink Node Running");
    println!("========================================");
    println!("  Node: {}", config.node_id());
    println!("  Controller: {}", addr);
    println!("  Reporting '{}' every {}s", config.metrics.name, config.metrics.interval_secs);
    println!("========================================\n");

    engine.run(stream).await?;
    Ok(())
}

/// Print node information
fn print_node_info(config: &Config) {
    let actions = ActionTable::with_defaults();

    println!("Droplink Node Information");
    println!("=========================\n");

    println!("Node: {}", config.node_id());
    println!("Role: {} {}", config.general.role, config.general.description);
    println!("Controller: {}", config.network.controller_addr);
    println!("Metric: {} every {}s", config.metrics.name, config.metrics.interval_secs);
    println!("Ack timeout: {}s", config.network.ack_timeout_secs);
    println!("Actions: {}", actions.names().join(", "));
    println!("\nCertificates:");
    println!("  CA:   {}", config.security.ca_cert.display());
    println!("  Cert: {}", config.security.certificate.display());
    println!("  Key:  {}", config.security.key.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        // Test that CLI parsing works
        let cli = Cli::try_parse_from(["droplink", "info"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "droplink",
            "run",
            "--addr",
            "controller:19406",
            "--ca-cert",
            "/etc/droplink/ca.crt",
        ]);
        assert!(cli.is_ok());
    }
}
