use std::sync::Arc;

use crate::app::create_app;
use crate::configs::Settings;

pub mod app;
pub mod configs;
pub mod errors;
pub mod models;
pub mod services;

pub async fn run(settings: &Arc<Settings>) {
    let mut app = create_app(settings).await;
    app.start().await;

    tracing::info!("panel daemon running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("shutting down");
    app.shutdown().await;
}
