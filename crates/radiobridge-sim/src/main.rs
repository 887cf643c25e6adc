//! `radiobridge-sim` - drive a radio bridge against a simulated modem.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use radiobridge_core::load_config;
use radiobridge_metrics::describe_metrics;
use radiobridge_protocol::RequestKind;
use radiobridge_sim::{load_scenario, run_scenario, SimResult};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Radio bridge simulator
#[derive(Parser)]
#[command(name = "radiobridge-sim")]
#[command(about = "Run radio bridge scenarios against a simulated modem")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Serve Prometheus metrics on this address
    #[cfg(feature = "prometheus")]
    #[arg(long, global = true)]
    metrics_listen: Option<std::net::SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run {
        /// Path to the scenario YAML
        scenario: PathBuf,

        /// Seed for the simulated modem (overrides the scenario's seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a bridge configuration file
    CheckConfig {
        /// Path to the configuration YAML
        config: PathBuf,
    },
    /// List request kinds, opcodes and version ladders
    Kinds,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_listen {
        if let Err(e) = radiobridge_metrics::install_prometheus(addr) {
            error!("Failed to start Prometheus exporter on {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
        info!("Serving metrics on http://{}/metrics", addr);
    }
    describe_metrics();

    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands) -> SimResult<()> {
    match command {
        Commands::Run { scenario, seed, json } => {
            info!("Loading scenario: {}", scenario.display());
            let scenario = load_scenario(&scenario)?;
            let report = run_scenario(&scenario, seed)?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                println!("{}", report);
            }
        }
        Commands::CheckConfig { config } => {
            let parsed = load_config(&config)?;
            println!(
                "{}: ok (instance {}, wake lock {} ms, ack {} ms, max age {} ms)",
                config.display(),
                parsed.name,
                parsed.wake_lock_timeout_ms,
                parsed.ack_wake_lock_timeout_ms,
                parsed.request_max_age_ms
            );
        }
        Commands::Kinds => print_kinds(),
    }
    Ok(())
}

fn print_kinds() {
    println!("{:<38} {:>6}  versions", "kind", "opcode");
    for kind in RequestKind::ALL {
        let versions: Vec<String> = kind.ladder().versions().iter().map(|v| v.to_string()).collect();
        println!("{:<38} {:>6}  {}", kind.as_label(), kind.opcode(), versions.join(" "));
    }
}
