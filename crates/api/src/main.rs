use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use demix_api::background::job_retention;
use demix_api::config::ServerConfig;
use demix_api::router::build_app_router;
use demix_api::state::AppState;
use demix_pipeline::SimulatedSeparator;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let (json_layer, text_layer) = if json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "demix_api=debug,demix_pipeline=debug,demix_events=info,tower_http=debug".into()
            }),
        )
        .with(json_layer)
        .with(text_layer)
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    tracing::info!(
        host = %config.host,
        port = config.port,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Loaded server configuration"
    );

    // --- App state ---
    let engine = Arc::new(SimulatedSeparator::new(config.simulated_step));
    let state = AppState::new(config.clone(), engine);
    tracing::info!("Job registry, progress broker and dispatcher created");

    // --- Background tasks ---
    let shutdown = CancellationToken::new();
    let retention_handle = tokio::spawn(job_retention::run(state.clone(), shutdown.child_token()));

    // --- Router ---
    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
    });

    shutdown_signal().await;
    shutdown.cancel();

    // Open streams would otherwise hold graceful shutdown until the timeout.
    let closed = state.broker.close_all();
    tracing::info!(closed, "Closed open progress streams");

    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server stopped accepting connections"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "Server task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "Connections still open after shutdown timeout, exiting anyway"
        ),
    }

    match tokio::time::timeout(std::time::Duration::from_secs(5), retention_handle).await {
        Ok(Ok(())) => tracing::info!("Job retention task stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Job retention task failed"),
        Err(_) => tracing::warn!("Job retention task did not stop in time"),
    }

    let active = state.dispatcher.active_jobs();
    if active > 0 {
        tracing::warn!(active, "Exiting with jobs still running");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
