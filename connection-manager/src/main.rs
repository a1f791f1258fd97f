use anyhow::{Context, Result};
use brokerchannel::config::load_config_or_default;
use brokerchannel::{EventTranslator, RouteEvent};
use connection_manager::api::{create_router, ApiState};
use connection_manager::{wait_for_shutdown, BridgeError, ConnectionManager, MqttSessionFactory, RouteHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Depth of the route-lifecycle event queue.
const COMMAND_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "connection_manager=info,brokerchannel=info".into()),
        )
        .init();

    info!("Connection Manager starting...");

    let config_path = std::env::var("BROKERCHANNEL_CONFIG")
        .unwrap_or_else(|_| "brokerchannel.toml".to_string());
    let mut config = load_config_or_default(&config_path)?;
    config.apply_env_overrides()?;

    info!(
        config_path = %config_path,
        routes = config.routes.len(),
        api_enabled = config.api.enabled,
        api_port = config.api.port,
        delivery_timeout_secs = config.delivery.timeout_secs,
        shutdown_timeout_secs = config.shutdown.timeout_secs,
        "Configuration loaded"
    );

    if config.delivery.timeout() >= config.shutdown.timeout() {
        warn!("Delivery timeout is not below the shutdown window; in-flight deliveries may be cut off");
    }

    let translator = EventTranslator::new(config.delivery.timeout())
        .context("Failed to build HTTP client for event delivery")?;
    let factory = Arc::new(MqttSessionFactory::new(config.mqtt.clone()));
    let manager = ConnectionManager::new(factory, translator, config.shutdown.timeout());
    let snapshots = manager.snapshots();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let routes = RouteHandle::new(command_tx);

    let manager_handle = tokio::spawn(manager.run(command_rx, shutdown_rx.clone()));

    // Routes from the config file
    for route in config.routes.drain(..) {
        let id = route.id();
        if let Err(e) = routes.notify(RouteEvent::Added(route)).await {
            warn!(route = %id, error = %e, "Failed to queue configured route");
        }
    }

    // Start HTTP API server
    let server_handle = if config.api.enabled {
        let router = create_router(ApiState {
            routes: routes.clone(),
            snapshots,
        });
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api.port))
            .await
            .context("Failed to bind route API port")?;
        info!(port = config.api.port, "Route API listening");

        let mut server_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { wait_for_shutdown(&mut server_shutdown).await });
            if let Err(e) = serve.await {
                error!(error = %e, "Route API server error");
            }
        }))
    } else {
        None
    };
    drop(routes);

    wait_for_signal().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Some(server_handle) = server_handle {
        if let Err(e) = server_handle.await {
            warn!(error = %e, "Route API task failed");
        }
    }

    match manager_handle.await.context("Connection manager task panicked")? {
        Ok(()) => {
            info!("Connection manager stopped");
            Ok(())
        }
        Err(e @ BridgeError::ShutdownIncomplete { .. }) => {
            error!(error = %e, "Shutdown incomplete");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl_c signal")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;

    Ok(())
}
