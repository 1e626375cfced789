mod cache;
mod config;
mod db;
mod error;
mod handlers;
mod identity;
mod models;
mod state;
mod tasks;
mod time_status;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, Method, header::CONTENT_TYPE};
use log::{error, info};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use cache::PollCache;
use config::Config;
use db::Database;
use state::AppState;

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Config::load();

    // Initialize database
    let database = match Database::new(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    let state = Arc::new(AppState {
        db: database,
        cache: PollCache::new(),
        config,
    });

    // --- Background tasks: expiry sweep and cache invalidation ---
    tokio::spawn(tasks::poll_ender::check_expired_polls_task(Arc::clone(&state)));
    tokio::spawn(tasks::invalidator::cache_invalidation_task(Arc::clone(&state)));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(identity::VOTER_HEADER),
            HeaderName::from_static(handlers::moderation::ADMIN_HEADER),
        ])
        .expose_headers([HeaderName::from_static(identity::VOTER_HEADER)])
        .max_age(Duration::from_secs(60 * 60));

    let app = handlers::router().layer(cors).with_state(Arc::clone(&state));

    let address = format!("0.0.0.0:{}", state.config.port);
    let listener = TcpListener::bind(&address)
        .await
        .expect("Failed to bind server address");
    info!("Server running on {}", address);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
