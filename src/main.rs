use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use power_monitor_service::{
    api::{self, AppState},
    config::Config,
    db::{self, pg::PgStore, store::Store},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; env vars may also be set externally
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    // Connect to DB and run migrations
    let pool = db::create_pool(
        &config.database_url,
        config.db_max_connections,
        config.store_timeout,
    )
    .await?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool, config.store_timeout));
    let state = AppState::new(store.clone(), &config);

    let mut app = api::router(state);
    if let Some(cors) = api::cors(&config.cors_origin) {
        app = app.layer(cors);
    }

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        tariff = config.energy_tariff,
        optional_fields = ?config.optional_fields,
        "HTTP server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    info!("Store closed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
