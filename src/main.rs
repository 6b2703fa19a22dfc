use anyhow::{Context, Result};
use sfbench::api::{create_router, AppState};
use sfbench::config::{AppConfig, ENCRYPTION_SECRET_VAR};
use sfbench::crypto::SecretCipher;
use sfbench::store::Store;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sfbench=info".into()),
        )
        .init();

    info!("sfbench starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;

    let secret = std::env::var(ENCRYPTION_SECRET_VAR)
        .with_context(|| format!("{} is required", ENCRYPTION_SECRET_VAR))?;
    let cipher = SecretCipher::from_secret(&secret)
        .with_context(|| format!("{} is not usable", ENCRYPTION_SECRET_VAR))?;

    info!(
        bind_addr = %config.server.bind_addr,
        app_url = %config.app_url(),
        database = %config.database.path,
        registration_open = config.server.admin_token.is_none(),
        "Configuration loaded"
    );

    let store = Arc::new(
        Store::open(&config.database.path, cipher.clone())
            .context("Failed to open database")?,
    );
    info!("Store initialized");

    let bind_addr = config.server.bind_addr.clone();
    let state = AppState::new(store, cipher, config)?;
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(bind_addr = %bind_addr, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("sfbench stopped");

    Ok(())
}
