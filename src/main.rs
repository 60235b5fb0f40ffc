use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use placement_portal::{
    auth::GoogleIdentityProvider,
    config::Config,
    api::routes::create_router,
    fetcher::ReqwestFetcher,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("placement_portal=info,tower_http=info")),
        )
        .with_target(false)
        .init();

    // Half-configured identity checks are worse than no server at all.
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Refusing to start");
            std::process::exit(1);
        }
    };

    tracing::info!(
        mode = %config.mode,
        project = %config.service_account.project_id,
        service_account = config.service_account.client_email.as_deref().unwrap_or("-"),
        origin = %config.frontend_origin,
        "Loaded configuration"
    );
    if config.database_url.is_none() {
        tracing::warn!("FIREBASE_DATABASE_URL is not set");
    }

    let provider = Arc::new(GoogleIdentityProvider::new(config.service_account.project_id.clone())?);
    let fetcher = Arc::new(ReqwestFetcher::new(config.fetch_timeout)?);
    let server_addr = config.server_addr;
    let mode = config.mode;

    let app_state = AppState::new(config, provider, fetcher);
    let app = create_router(app_state);

    let listener = TcpListener::bind(server_addr).await?;
    tracing::info!("Server running in {} mode on {}", mode, server_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
