use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use argus_watcher::notify::{LogNotifier, Notifier, WebhookNotifier};
use argus_watcher::poller::Poller;
use argus_watcher::providers;
use argus_watcher::scheduler::PollScheduler;
use argus_watcher::store::{SqliteStore, Store};
use argus_watcher::subscriptions::SubscriptionManager;
use argus_watcher::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("argus_watcher=info".parse()?),
        )
        .init();

    info!("Starting Argus Watcher...");

    let config = AppConfig::from_env()?;

    if config.metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics.port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "metrics exporter listening");
    }

    let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&config.database).await?);
    let providers = providers::all_providers(&config.crawler)?;
    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook.url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            config.notifications.webhook.username.clone(),
        )),
        None => Arc::new(LogNotifier),
    };

    let poller = Arc::new(Poller::new(
        Arc::clone(&store),
        providers,
        notifier,
        &config,
    ));

    let mut scheduler = PollScheduler::new(
        Arc::clone(&poller),
        Arc::clone(&store),
        Duration::from_secs(config.poller.interval_seconds),
    )
    .await?;

    scheduler.start().await?;
    let restored = scheduler.restore().await?;
    info!(restored, "watching subscriptions");

    // The command surface (bot, CLI, HTTP) drives this manager; keep it
    // alive for the lifetime of the process.
    let _manager = SubscriptionManager::new(
        Arc::clone(&store),
        Arc::new(scheduler),
        config.poller.clone(),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    Ok(())
}
