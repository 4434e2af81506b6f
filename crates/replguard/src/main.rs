//! replguard - operator CLI
//!
//! # Usage
//!
//! ```bash
//! # List the operations of the configured plugins
//! replguard -c config.yml list
//!
//! # Run one operation
//! replguard -c config.yml run bucardo.install
//! replguard -c config.yml run bucardo.change_config --setting log_level --value verbose
//! replguard -c config.yml run indexes.recreate --wait-for-copy
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use replguard::{
    dispatch, BucardoCli, Config, Invocation, OperationRegistry, PgConnector, Runtime,
};

#[derive(Parser)]
#[command(name = "replguard")]
#[command(version, about = "Safely mutate Bucardo replication artifacts on a live database pair")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the operations of the configured plugins
    List,
    /// Run one operation, e.g. `retry.add_triggers`
    Run {
        /// Qualified operation name (`plugin.operation`)
        operation: String,

        /// Wait for the next completed copy before recreating indexes
        #[arg(long)]
        wait_for_copy: bool,

        /// Setting to change (`bucardo.change_config`)
        #[arg(long, requires = "value")]
        setting: Option<String>,

        /// New value of the setting (`bucardo.change_config`)
        #[arg(long, requires = "setting")]
        value: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    let registry = OperationRegistry::from_plugins(config.plugins.as_slice())
        .context("Failed to build the operation registry")?;

    match cli.command {
        Commands::List => {
            if registry.is_empty() {
                println!("No plugins with operations are configured.");
            } else {
                println!("{}", registry.menu());
            }
            Ok(())
        }
        Commands::Run {
            operation,
            wait_for_copy,
            setting,
            value,
        } => {
            let operation = registry.get(&operation)?;
            let connector = PgConnector::new(config.clone());
            let engine = BucardoCli::from_config(&config);
            let rt = Runtime::new(&config, &connector, &engine);
            let args = Invocation {
                wait_for_copy,
                setting,
                value,
            };

            match dispatch(&rt, operation, &args).await {
                Ok(()) => {
                    info!(operation = %operation, "operation finished");
                    Ok(())
                }
                Err(e) => {
                    error!(operation = %operation, "operation failed: {}", e);
                    Err(e).with_context(|| format!("{} failed", operation))
                }
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
