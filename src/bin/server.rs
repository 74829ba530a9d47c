use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

use murmur::config::ServerConfig;
use murmur::core::{BoardServer, Hub};
use murmur::handlers::routes;
use murmur::storage::open_store;

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();

    // Load config from .env
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, public_dir={}",
        config.host,
        config.port,
        config.public_dir.display()
    );

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };
    let hub = Hub::spawn(config.outbound_queue_capacity);
    let drain_timeout = config.shutdown_drain_timeout;
    let board = Arc::new(BoardServer::new(store, hub, config));
    let _sweepers = board.start_background_tasks();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = match warp::serve(routes(board.clone())).try_bind_with_graceful_shutdown(
        addr,
        async move {
            let _ = stop_rx.await;
        },
    ) {
        Ok((bound, server)) => {
            info!("Starting Murmur server on {}", bound);
            server
        }
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    let server = tokio::spawn(server);

    shutdown_signal().await;
    info!("Shutdown signal received, draining connections");

    // Close live connections first so clients see a clean close frame
    match board.shutdown(drain_timeout).await {
        Ok(count) => info!("Closed {} live connections", count),
        Err(e) => warn!("Hub shutdown: {}", e),
    }

    let _ = stop_tx.send(());
    if let Err(e) = server.await {
        error!("Server task failed: {}", e);
    }
    info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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
}
