use anyhow::{Context, Result};
use moodcart_catalog::{Catalog, CatalogQuery, RestCatalog, SqliteCatalog};
use moodcart_core::ExpressionClassifier;
use moodcart_hw::V4lProvider;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod aggregator;
mod assistant;
mod config;
mod dbus_interface;
mod engine;
mod session;

use assistant::Assistant;
use config::{CatalogBackend, Config};
use dbus_interface::AssistantService;

const BUS_NAME: &str = "org.moodcart.Assistant1";
const OBJECT_PATH: &str = "/org/moodcart/Assistant1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("moodcartd starting");

    let config = Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        sources = config.model_sources.len(),
        interval_ms = config.sample_interval.as_millis() as u64,
        "configuration loaded"
    );

    // Model loading never fails the daemon; an unavailable classifier only
    // disables camera start.
    let sources = config.model_sources.clone();
    let classifier = tokio::task::spawn_blocking(move || ExpressionClassifier::load(&sources))
        .await
        .context("model loading task failed")?;
    let engine = engine::spawn_engine(classifier)?;
    let models = engine.status().clone();

    let catalog: Arc<dyn Catalog> = match &config.catalog {
        CatalogBackend::Rest(rest) => Arc::new(RestCatalog::new(rest.clone())?),
        CatalogBackend::Sqlite(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            Arc::new(SqliteCatalog::open(path).await?)
        }
    };

    let assistant = Arc::new(Assistant::new(
        Arc::new(engine),
        models,
        Arc::new(V4lProvider::new(config.camera_device.clone())),
        CatalogQuery::new(catalog),
        config.sample_interval,
    ));

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AssistantService::new(assistant.clone()))?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "moodcartd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("moodcartd shutting down");
    assistant.stop_camera().await;

    Ok(())
}
