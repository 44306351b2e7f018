use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Context as _;
use clap::Parser;
use log::{error, info};
use shared::artifacts::RedisArtifactStore;
use shared::ledger::HttpLedger;
use shared::models::network::Uid;
use shared::network::HttpNetworkSource;
use shared::protocol::TermConfig;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    export_metrics,
    handler::{get_term, health_check, State},
    HttpWorkerProber, MetricsContext, RedisSeedStore, Validator, ValidatorServices,
};

#[derive(Parser)]
pub struct Cli {
    /// Uid this validator is registered under
    #[arg(short = 'u', long)]
    pub uid: Uid,

    /// Ledger API URL
    #[arg(short = 'r', long, default_value = "http://localhost:8545")]
    pub ledger_url: String,

    /// Network snapshot API URL
    #[arg(long, default_value = "http://localhost:8090")]
    pub metagraph_url: String,

    /// Redis URL of the shared artifact store
    #[arg(long, default_value = "redis://localhost:6379")]
    pub artifact_redis_url: String,

    /// Redis URL for this validator's own seeds
    #[arg(long, default_value = "redis://localhost:6380")]
    pub redis_url: String,

    /// Optional: TOML file with the protocol constants
    #[arg(long, default_value = None)]
    pub config: Option<PathBuf>,

    /// Optional: base URL the network publishes its configuration under.
    /// Ignored when --config is given.
    #[arg(long, default_value = None)]
    pub config_url: Option<String>,

    /// Seconds between scheduler ticks
    #[arg(long, default_value = "5")]
    pub tick_interval: u64,

    /// Port of the health and metrics server
    #[arg(long, default_value = "9879")]
    pub port: u16,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    async fn load_config(&self) -> anyhow::Result<TermConfig> {
        if let Some(path) = &self.config {
            return TermConfig::load_from_file(path);
        }
        if let Some(config_url) = &self.config_url {
            let base: Url = config_url.parse().context("invalid config url")?;
            return TermConfig::fetch(&base).await;
        }
        info!("Using default protocol configuration");
        Ok(TermConfig::default())
    }

    pub async fn run(self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let config = self.load_config().await?;
        let ledger_url: Url = self.ledger_url.parse().context("invalid ledger url")?;
        let metagraph_url: Url = self.metagraph_url.parse().context("invalid metagraph url")?;

        let services = ValidatorServices {
            ledger: Arc::new(HttpLedger::new(ledger_url)?),
            artifacts: Arc::new(RedisArtifactStore::new(&self.artifact_redis_url)?),
            network: Arc::new(HttpNetworkSource::new(&metagraph_url)?),
            prober: Arc::new(HttpWorkerProber::new()?),
            seeds: Arc::new(RedisSeedStore::new(&self.redis_url)?),
        };
        let metrics_ctx = MetricsContext::new(self.uid.to_string());

        let (validator, validator_health) = Validator::new(
            self.uid,
            config,
            services,
            cancellation_token.clone(),
            metrics_ctx,
        )?;
        let validator = validator.with_tick_interval(Duration::from_secs(self.tick_interval));

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(State {
                    validator_health: validator_health.clone(),
                }))
                .route("/health", web::get().to(health_check))
                .route("/term", web::get().to(get_term))
                .route(
                    "/metrics",
                    web::get().to(|| async {
                        match export_metrics() {
                            Ok(metrics) => {
                                HttpResponse::Ok().content_type("text/plain").body(metrics)
                            }
                            Err(e) => {
                                error!("Error exporting metrics: {e:?}");
                                HttpResponse::InternalServerError().finish()
                            }
                        }
                    }),
                )
        })
        .bind(("0.0.0.0", self.port))
        .with_context(|| format!("failed to bind health server on port {}", self.port))?
        .run();
        let server_handle = server.handle();
        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("Actix server error: {e:?}");
            }
        });

        info!("Validator {} started", self.uid);
        let result = validator.run().await;
        server_handle.stop(true).await;
        result
    }
}
