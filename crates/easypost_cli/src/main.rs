use std::{net::SocketAddr, path::Path, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use easypost_control_plane::{
    build_router, spawn_scheduler, AppState, JobQueue, JobWorker, RetryPolicy, Schedule,
};
use easypost_provider::{
    HttpShippingProvider, InMemoryShippingProvider, ProviderConfig, ShippingProvider,
    DEFAULT_BASE_URL,
};
use easypost_storage::{EasypostStorage, StorageConfig};
use easypost_sync::{DuplicateRefundPolicy, ShipmentSync, SyncConfig};
use serde::Deserialize;
use tracing::{info, warn};

const API_KEY_ENV: &str = "EASYPOST_API_KEY";

#[derive(Debug, Parser)]
#[command(author, version, about = "EasyPost shipment sync daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the webhook endpoint, job worker and scheduler.
    Serve {
        #[arg(long, default_value = "config/easypost.toml")]
        config: PathBuf,
    },
    /// Poll the provider once for every submitted refund.
    PollRefunds {
        #[arg(long, default_value = "config/easypost.toml")]
        config: PathBuf,
    },
    /// Request every additional format for one label.
    BackfillLabel {
        #[arg(long, default_value = "config/easypost.toml")]
        config: PathBuf,
        #[arg(long)]
        label_id: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RuntimeConfig {
    http: HttpSection,
    storage: StorageSection,
    #[serde(default)]
    provider: ProviderSection,
    #[serde(default)]
    jobs: JobsSection,
    #[serde(default)]
    refunds: RefundsSection,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpSection {
    bind: String,
    auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StorageSection {
    sqlite_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ProviderMode {
    #[default]
    Http,
    Simulated,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProviderSection {
    #[serde(default)]
    mode: ProviderMode,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct JobsSection {
    #[serde(default = "default_retry_delay_secs")]
    retry_delay_secs: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_refund_poll_interval_secs")]
    refund_poll_interval_secs: u64,
    #[serde(default = "default_retention_hours")]
    retention_hours: i64,
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    20
}

fn default_refund_poll_interval_secs() -> u64 {
    3600
}

fn default_retention_hours() -> i64 {
    168
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
            max_retries: default_max_retries(),
            refund_poll_interval_secs: default_refund_poll_interval_secs(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl JobsSection {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_secs(self.retry_delay_secs),
            max_retries: self.max_retries,
        }
    }

    fn schedule(&self) -> Schedule {
        Schedule {
            refund_poll_interval: (self.refund_poll_interval_secs > 0)
                .then(|| Duration::from_secs(self.refund_poll_interval_secs)),
            retention_hours: self.retention_hours,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RefundsSection {
    #[serde(default)]
    on_duplicate: DuplicateRefundPolicy,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => serve(config).await,
        Command::PollRefunds { config } => poll_refunds(config).await,
        Command::BackfillLabel { config, label_id } => backfill_label(config, &label_id).await,
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;

    let require_bearer = requires_token(&config.http.bind);
    if require_bearer && config.http.auth_token.is_none() {
        return Err(anyhow!(
            "non-loopback bind {} requires http.auth_token",
            config.http.bind
        ));
    }

    if !require_bearer {
        info!("loopback bind detected: bearer auth optional");
    } else {
        warn!("non-loopback bind detected: bearer auth enforced");
    }

    let (storage, sync) = open(&config).await?;
    let (queue, receiver) = JobQueue::new(storage.clone());
    let worker = JobWorker::new(sync, queue.clone(), receiver, config.jobs.retry_policy());
    tokio::spawn(worker.run());
    spawn_scheduler(queue.clone(), config.jobs.schedule());

    let state = AppState::new(storage, queue, config.http.auth_token.clone(), require_bearer);
    let app = build_router(state);

    let socket: SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid socket address {}", config.http.bind))?;

    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .with_context(|| format!("failed to bind {}", config.http.bind))?;

    info!(bind = %config.http.bind, "easypostd listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server failed")
}

async fn poll_refunds(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let (_, sync) = open(&config).await?;
    let report = sync.update_refund_statuses().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn backfill_label(config_path: PathBuf, label_id: &str) -> Result<()> {
    let config = load_config(&config_path)?;
    let (_, sync) = open(&config).await?;
    let report = sync.get_additional_label_formats(label_id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_config(config_path: &Path) -> Result<RuntimeConfig> {
    let config_source = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read config file {}", config_path.display()))?;
    toml::from_str(&config_source)
        .with_context(|| format!("invalid config TOML at {}", config_path.display()))
}

async fn open(config: &RuntimeConfig) -> Result<(EasypostStorage, ShipmentSync)> {
    let storage = EasypostStorage::connect(&StorageConfig::new(&config.storage.sqlite_path)).await?;
    let provider = build_provider(&config.provider, std::env::var(API_KEY_ENV).ok())?;
    let sync = ShipmentSync::new(
        storage.clone(),
        provider,
        SyncConfig {
            on_duplicate_refund: config.refunds.on_duplicate,
        },
    );
    Ok((storage, sync))
}

fn build_provider(
    section: &ProviderSection,
    env_api_key: Option<String>,
) -> Result<Arc<dyn ShippingProvider>> {
    match section.mode {
        ProviderMode::Simulated => {
            warn!("using simulated provider; no requests leave this process");
            Ok(Arc::new(InMemoryShippingProvider::new()))
        }
        ProviderMode::Http => {
            let api_key = section
                .api_key
                .clone()
                .or(env_api_key)
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| anyhow!("provider.api_key or ${API_KEY_ENV} is required"))?;
            let mut provider_config = ProviderConfig::new(api_key);
            provider_config.base_url = section
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
            if let Some(timeout_secs) = section.timeout_secs {
                provider_config.timeout = Duration::from_secs(timeout_secs);
            }
            let provider = HttpShippingProvider::new(provider_config)
                .context("failed to build provider HTTP client")?;
            Ok(Arc::new(provider))
        }
    }
}

fn requires_token(bind: &str) -> bool {
    match bind.parse::<SocketAddr>() {
        Ok(addr) => !addr.ip().is_loopback(),
        Err(_) => true,
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
