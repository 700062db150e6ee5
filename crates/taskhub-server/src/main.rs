mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use taskhub_api::events::EventBus;
use taskhub_api::watcher::DeadlineWatcher;
use taskhub_api::{AppState, AppStateInner};
use taskhub_notify::{DeliveryWorker, LogMailer, Notifier, WebhookMailer};

use crate::config::Config;

/// How long queued notifications may take to go out after the server stops.
const DELIVERY_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskhub=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = taskhub_db::Database::open(&config.db_path)?;

    // Notification delivery runs off the request path
    let (notifier, queue) = Notifier::channel();
    let delivery = match &config.mail_webhook_url {
        Some(url) => {
            info!("Delivering mail through {}", url);
            DeliveryWorker::spawn(queue, WebhookMailer::new(url), config.app_url.clone())
        }
        None => {
            info!("No mail relay configured, mail will be logged");
            DeliveryWorker::spawn(queue, LogMailer, config.app_url.clone())
        }
    };

    let events = EventBus::new().with_handler(Arc::new(DeadlineWatcher::new(notifier)));

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        admin_usernames: config.admin_usernames.clone(),
        events,
    });

    let app = taskhub_api::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("taskhub listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last Notifier; once it is dropped the worker drains and stops.
    if delivery.finish(DELIVERY_GRACE).await {
        info!("Pending notifications delivered");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
