//! # Indexer Server
//!
//! Wires the full pipeline together: loads the source roster from the
//! configuration file, builds one ingester per configured source, bridges
//! them onto the event bus through the ingester service and feeds the bus
//! into the document indexers. Shuts the services down in reverse start
//! order on Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::signal;
use tracing::info;

use lib_indexer::configs::MessageIngesterConfig;
use lib_indexer::core::{EventBus, TaskScheduler};
use lib_indexer::indexer::documents::{DeviceDocument, DeviceEntityDocument, PostDocument};
use lib_indexer::indexer::store::{DocumentStore, InMemoryStore};
use lib_indexer::indexer::{
    DeviceIndexer, EntityStateChangeIndexer, MessageIndexerService, PostIndexer,
};
use lib_indexer::ingesters::mqtt::MqttMessageIngester;
use lib_indexer::ingesters::rest::RestMessageIngester;
use lib_indexer::ingesters::websocket::WebSocketMessageIngester;
use lib_indexer::ingesters::MessageIngester;
use lib_indexer::loggers::setup_logging;
use lib_indexer::service::{MessageIngesterService, Service};

const APP_NAME: &str = "server_indexer";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = setup_logging(APP_NAME).context("failed to initialize logging")?;

    let config = MessageIngesterConfig::load().context("failed to load ingester config")?;
    info!(
        websocket = config.websocket.len(),
        rest = config.rest.len(),
        mqtt = config.mqtt.len(),
        "loaded source roster"
    );

    let scheduler = Arc::new(TaskScheduler::new());
    let bus = Arc::new(EventBus::default());

    // Indexing side first so no accepted message is published into a bus
    // nobody listens on.
    let device_store: Arc<InMemoryStore<DeviceDocument>> = Arc::new(InMemoryStore::new());
    let entity_store: Arc<InMemoryStore<DeviceEntityDocument>> = Arc::new(InMemoryStore::new());
    let post_store: Arc<InMemoryStore<PostDocument>> = Arc::new(InMemoryStore::new());
    let indexer_service = MessageIndexerService::new(
        Arc::clone(&bus),
        Arc::new(DeviceIndexer::new(
            Arc::clone(&device_store) as Arc<dyn DocumentStore<DeviceDocument>>
        )),
        Arc::new(EntityStateChangeIndexer::new(
            Arc::clone(&entity_store) as Arc<dyn DocumentStore<DeviceEntityDocument>>
        )),
        Arc::new(PostIndexer::new(
            Arc::clone(&post_store) as Arc<dyn DocumentStore<PostDocument>>
        )),
    );
    indexer_service.start().await;

    let ingester_service = MessageIngesterService::new(Arc::clone(&bus));
    for (source, ws_config) in &config.websocket {
        let filter = compile_filter(source, ws_config.inject_filter.as_deref())?;
        let ingester: Arc<dyn MessageIngester> =
            Arc::new(WebSocketMessageIngester::new(source, ws_config.clone()));
        ingester_service.register(source, ingester, filter);
    }
    for (source, rest_config) in &config.rest {
        let filter = compile_filter(source, rest_config.inject_filter.as_deref())?;
        let ingester: Arc<dyn MessageIngester> = Arc::new(RestMessageIngester::new(
            source,
            rest_config.clone(),
            Arc::clone(&scheduler),
        ));
        ingester_service.register(source, ingester, filter);
    }
    for (source, mqtt_config) in &config.mqtt {
        let filter = compile_filter(source, mqtt_config.inject_filter.as_deref())?;
        let ingester: Arc<dyn MessageIngester> =
            Arc::new(MqttMessageIngester::new(source, mqtt_config.clone()));
        ingester_service.register(source, ingester, filter);
    }
    ingester_service.start().await;
    info!(sources = ingester_service.source_count(), "indexer pipeline running");

    shutdown_signal().await;
    info!("shutdown signal received, stopping services");

    // Reverse start order: stop accepting before tearing the indexers down.
    ingester_service.stop().await;
    indexer_service.stop().await;
    info!("indexer pipeline stopped");
    Ok(())
}

fn compile_filter(source: &str, pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern {
        Some(pattern) => {
            let regex = Regex::new(pattern)
                .with_context(|| format!("invalid inject filter for source '{source}'"))?;
            Ok(Some(regex))
        }
        None => Ok(None),
    }
}

/// Completes when the process receives Ctrl+C or, on UNIX, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
