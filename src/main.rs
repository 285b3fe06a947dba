use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pharmacy_storage_service::{
    api::{self, AppState},
    audit::AuditRecorder,
    config::{Config, NotifierConfig},
    db,
    monitoring::{Monitor, Scheduler},
    notify::{LogSink, NotificationSink, WebhookSink},
    store::{MemoryStore, Store},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(db::open_store(url, config.pool_settings()).await?),
        None => {
            warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    let sink: Arc<dyn NotificationSink> = match config.notifier.clone() {
        NotifierConfig::Log => Arc::new(LogSink),
        NotifierConfig::Webhook {
            url,
            secret,
            timeout,
        } => {
            info!(
                url = %url,
                signed = secret.is_some(),
                timeout_secs = timeout.as_secs(),
                "Delivering alerts to webhook"
            );
            Arc::new(WebhookSink::new(url, secret, timeout)?)
        }
    };

    let monitor = Arc::new(Monitor::new(
        Arc::clone(&store),
        sink,
        config.expiry_window(),
    ));

    // Observed by both monitoring loops and the HTTP server.
    let shutdown = CancellationToken::new();

    let mut scheduler = Scheduler::new(Arc::clone(&monitor), config.cadence(), shutdown.clone());
    scheduler.start();

    let state = AppState {
        audit: AuditRecorder::new(Arc::clone(&store)),
        store,
        monitor,
        expiry_window: config.expiry_window(),
        low_stock_threshold: config.low_stock_threshold,
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    scheduler.stop().await;
    info!("Monitoring stopped");

    Ok(())
}

/// Resolves on Ctrl+C / SIGTERM and cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
