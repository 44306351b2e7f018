use crate::api::server::start_server;
use crate::services::allowlist_updater::AllowlistUpdater;
use crate::state::WorkerState;
use crate::TaskHandles;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use shared::network::{HttpNetworkSource, NetworkSource};
use shared::protocol::TermConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

const APP_VERSION: &str = match option_env!("WORKER_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Parser)]
#[command(author, version = APP_VERSION, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve benchmark payloads to validators
    Run {
        /// Address to bind the API server to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port number for the worker to listen on
        #[arg(long, default_value = "8091")]
        port: u16,

        /// Metagraph API URL used to allow-list validators
        #[arg(long, default_value = "http://localhost:8000/")]
        metagraph_url: String,

        /// TOML file with protocol constants
        #[arg(long)]
        config: Option<PathBuf>,

        /// Base URL of the network's published configuration
        #[arg(long)]
        config_url: Option<String>,

        /// Seconds between validator allow-list refreshes
        #[arg(long, default_value = "300")]
        refresh_interval: u64,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Print the protocol configuration the worker would use
    Check {
        /// TOML file with protocol constants
        #[arg(long)]
        config: Option<PathBuf>,

        /// Base URL of the network's published configuration
        #[arg(long)]
        config_url: Option<String>,
    },
}

async fn load_config(
    config: Option<&PathBuf>,
    config_url: Option<&str>,
) -> Result<TermConfig, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(path) = config {
        return Ok(TermConfig::load_from_file(path)?);
    }
    if let Some(url) = config_url {
        return Ok(TermConfig::fetch(&Url::parse(url)?).await?);
    }
    Ok(TermConfig::default())
}

pub async fn execute_command(
    command: &Commands,
    cancellation_token: CancellationToken,
    task_handles: TaskHandles,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match command {
        Commands::Run {
            host,
            port,
            metagraph_url,
            config,
            config_url,
            refresh_interval,
            log_level: _,
        } => {
            let config = load_config(config.as_ref(), config_url.as_deref()).await?;
            info!("Starting worker {APP_VERSION}");
            info!(
                "Serving {} byte payloads, validators need stake >= {}",
                config.benchmark_shape.payload_bytes().unwrap_or_default(),
                config.validator_min_stake
            );

            let network: Arc<dyn NetworkSource> =
                Arc::new(HttpNetworkSource::new(&Url::parse(metagraph_url)?)?);
            let worker_state = Arc::new(WorkerState::new(APP_VERSION));

            if *refresh_interval == 0 {
                warn!("Refresh interval of 0 seconds, using 1 second");
            }
            let updater = AllowlistUpdater::new(
                network,
                worker_state.clone(),
                config.validator_min_stake,
                Duration::from_secs((*refresh_interval).max(1)),
            );
            let updater_handle = updater.start(cancellation_token.clone());
            task_handles.lock().await.push(updater_handle);

            tokio::select! {
                result = start_server(host, *port, worker_state) => {
                    if let Err(e) = result {
                        error!("API server failed: {e}");
                        return Err(e.into());
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Stopping API server");
                }
            }
            Ok(())
        }
        Commands::Check { config, config_url } => {
            let config = load_config(config.as_ref(), config_url.as_deref()).await?;
            println!("{}", toml::to_string_pretty(&config)?);
            println!(
                "payload: {} -> {} bytes",
                config.benchmark_shape,
                config.benchmark_shape.payload_bytes().unwrap_or_default()
            );
            Ok(())
        }
    }
}
