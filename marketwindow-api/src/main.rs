//! # MarketWindow API Server
//!
//! Marketplace backend: sellers open shops that admins verify with a one-time
//! code, keep stock through an append-only ledger, and buyers browse and
//! follow verified shops.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p marketwindow-api
//! ```

use marketwindow_api::{
    app::{bootstrap_admin, build_router, AppState},
    config::Config,
};
use marketwindow_shared::{
    db::{
        migrations::run_migrations,
        pool::{close_pool, create_pool, DatabaseConfig},
    },
    otp::delivery::LogDelivery,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketwindow_api=debug,marketwindow_shared=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "MarketWindow API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    let pool = create_pool(DatabaseConfig::from_url(
        config.database.url.clone(),
        config.database.max_connections,
    ))
    .await?;

    if config.database.run_migrations {
        run_migrations(&pool).await?;
    }

    if let Some(admin) = &config.admin {
        bootstrap_admin(&pool, admin).await?;
    }

    let address = config.bind_address();
    let state = AppState::new(pool.clone(), config, Arc::new(LogDelivery::new()))?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    close_pool(pool).await;
    tracing::info!("Server stopped");

    Ok(())
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
