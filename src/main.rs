use colab_hub::config::Config;
use colab_hub::routes::build_routes;
use colab_hub::ws::maintenance::start_maintenance;
use colab_hub::AppState;
use std::panic;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration before tracing so the log level can come from it
    let loaded = Config::load();
    let log_level = loaded
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("colab_hub=debug,tower_http=debug,{log_level}").into()
        }))
        .init();

    info!("Starting server...");

    let config = loaded.unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    info!(
        service = %config.service_name,
        environment = %config.environment,
        default_room = %config.default_room,
        max_connections_per_room = ?config.max_connections_per_room,
        "Configuration ready"
    );

    let address = config.server_address();
    let policy = config.maintenance_policy();
    let state = AppState::new(config);

    // Background room maintenance
    let cancel_token = CancellationToken::new();
    let maintenance = tokio::spawn(start_maintenance(
        state.registry.clone(),
        policy,
        cancel_token.clone(),
    ));

    let app = build_routes(state);

    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        error!("Failed to bind to {}: {}", address, e);
        e
    })?;

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/<room>", address);
    info!("📚 OpenAPI document at http://{}/api-docs/openapi.json", address);

    let shutdown_token = cancel_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_token.cancel();
        })
        .await?;

    cancel_token.cancel();
    if let Err(e) = maintenance.await {
        error!("Maintenance task failed: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
