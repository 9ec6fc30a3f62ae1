use clap::{Parser, Subcommand};
use deferrals::DeferralConfig;
use std::path::PathBuf;
use std::time::Duration;

mod commands;

use commands::simulate::SimulateOptions;

#[derive(Parser)]
#[command(name = "deferrals-cli")]
#[command(about = "Drive a simulated host through a readiness-gated deferral lifecycle")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (bare or with a [deferrals] table)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the readiness poll interval
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue work, wait for a simulated service, and drain the registry
    Simulate {
        /// Service becomes available after this many poll intervals
        #[arg(long, default_value = "2")]
        ready_after: u32,

        /// Start the host before readiness (drain runs as a transactional restart)
        #[arg(long)]
        started: bool,

        /// Number of queued registrations, each wiring one job handler
        #[arg(short, long, default_value = "3")]
        registrations: usize,

        /// Number of queued plain functions
        #[arg(short, long, default_value = "2")]
        funcs: usize,

        /// Make the registration at this position fail
        #[arg(long)]
        fail_at: Option<usize>,

        /// Cancel polling after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut config = match &cli.config {
        Some(path) => DeferralConfig::from_file(path)?,
        None => DeferralConfig::from_env()?,
    };
    if let Some(ms) = cli.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }
    config.validate()?;

    match cli.command {
        Commands::Simulate {
            ready_after,
            started,
            registrations,
            funcs,
            fail_at,
            cancel_after_ms,
        } => {
            let options = SimulateOptions {
                ready_after,
                started,
                registrations,
                funcs,
                fail_at,
                cancel_after: cancel_after_ms.map(Duration::from_millis),
            };
            commands::simulate::run(config, options).await
        }
        Commands::Config => commands::show_config::run(&config),
    }
}
