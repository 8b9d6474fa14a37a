// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, anyhow};
use log::{error, info, warn};
use rustls::crypto::{CryptoProvider, ring};
use tokio::time::sleep;

use poi_multi_collector::checkpoint::Status;
use poi_multi_collector::collector::executor::ReqwestTransport;
use poi_multi_collector::collector::runner::PipelineContext;
use poi_multi_collector::collector::supervisor::CollectorHub;
use poi_multi_collector::config::load_config;
use poi_multi_collector::credentials::CredentialPool;
use poi_multi_collector::metrics::METRICS;
use poi_multi_collector::store::PoiStore;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration and logging
// - Open the POI database and seed credentials
// - Start one collection per enabled provider
// - Stop cooperatively on Ctrl-C and wait for checkpoints
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider,
    // installed once before the first TLS connection.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow!("failed to install rustls CryptoProvider"))?;

    // --------------------------------------------------------
    // Configuration (first argument, default config.json)
    //
    // NOTE:
    // - The config file may contain API keys.
    // - It must not be committed to version control.
    // --------------------------------------------------------
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = load_config(&config_path)?;

    let default_level = if config.debug_logging() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    info!("loaded {}", config_path.display());

    // --------------------------------------------------------
    // Storage
    // --------------------------------------------------------
    let store = PoiStore::open(&config.database.path)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
    let credentials = CredentialPool::new(store.pool().clone());

    for seed in &config.credentials {
        if credentials.seed(&seed.provider, &seed.secret, &seed.name).await? {
            info!("[{}] credential '{}' added", seed.provider, seed.name);
        }
    }

    let ctx = PipelineContext {
        sink: Arc::new(store.clone()),
        credentials,
        checkpoints: config.checkpoints.open()?,
        region: Arc::from(config.region.source()?),
    };

    // --------------------------------------------------------
    // Metrics reporter (periodic, low-noise; 0 disables it)
    // --------------------------------------------------------
    if let Some(interval) = config.metrics_interval() {
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                info!("[METRICS] {}", METRICS.summary());
            }
        });
    }

    // --------------------------------------------------------
    // Start all enabled provider collections
    // --------------------------------------------------------
    let mut hub = CollectorHub::new(ctx);
    for settings in config.providers.iter().filter(|p| p.enabled) {
        let transport = ReqwestTransport::new(Duration::from_secs(settings.retry.timeout_secs))
            .context("failed to build HTTP client")?;
        if let Err(e) = hub.start(settings.clone(), Arc::new(transport)) {
            error!("{:#}", e);
        }
    }

    if hub.providers().is_empty() {
        warn!("no provider enabled, nothing to do");
        return Ok(());
    }

    // --------------------------------------------------------
    // Wait for completion or Ctrl-C
    //
    // On Ctrl-C every collection is asked to stop; each one
    // finishes its in-flight page and saves a paused checkpoint.
    // --------------------------------------------------------
    let stop_flags = hub.stop_flags();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping collections");
            for flag in &stop_flags {
                flag.store(true, Ordering::SeqCst);
            }
        }
    });

    let results = hub.join_all().await;

    for (provider, cp) in results {
        match cp.status {
            Status::Error | Status::Paused => warn!(
                "[{}] {}: {} saved, {}",
                provider,
                cp.status.as_str(),
                cp.total_saved,
                cp.error_message.as_deref().unwrap_or("-")
            ),
            _ => info!("[{}] {}: {} saved", provider, cp.status.as_str(), cp.total_saved),
        }
    }

    info!(
        "database holds {} records; {}",
        store.count(None).await?,
        METRICS.summary()
    );
    Ok(())
}
