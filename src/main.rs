use std::env;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use docsage::core::config::AppPaths;
use docsage::core::logging;
use docsage::rag::loader::load_directory;
use docsage::server::router::router;
use docsage::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    let log_dir = logging::init(&paths);
    tracing::info!("Writing logs to {}", log_dir.display());

    let state = AppState::initialize(paths.clone()).await?;
    let settings = state.pipeline.settings().clone();

    if let Some(source_dir) = &settings.ingestion.source_dir {
        let dir = paths.resolve_source_dir(source_dir);
        match load_directory(&dir).await {
            Ok(documents) => {
                let report = state.pipeline.ingest(documents).await;
                tracing::info!(
                    ingested = report.ingested.len(),
                    failed = report.failed.len(),
                    "Startup ingestion of {} finished",
                    dir.display()
                );
            }
            Err(err) => tracing::warn!("Skipping startup ingestion: {}", err),
        }
    }

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(settings.server.port);
    let bind_addr = format!("{}:{}", settings.server.host, port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    println!("DOCSAGE_PORT={}", addr.port());
    tracing::info!("Listening on {}", addr);

    let app: Router = router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.pipeline.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
    }
}
