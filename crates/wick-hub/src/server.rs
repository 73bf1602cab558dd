//! Hub assembly: router, listener, background reaper, shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::registry::{start_reaper, DeviceRegistry};
use crate::routes;

/// Hub configuration.
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    /// Outbound frames queued per session before sends start failing.
    pub max_send_queue: usize,
    /// How long a disconnected state survives before the reaper takes it.
    pub stale_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_send_queue: 256,
            stale_timeout: Duration::from_secs(5 * 60),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl HubConfig {
    /// Defaults with `WICK_HOST` / `WICK_PORT` applied. Invalid values
    /// are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("WICK_HOST") {
            if !host.trim().is_empty() {
                config.host = host;
            }
        }
        if let Ok(port) = std::env::var("WICK_PORT") {
            if let Ok(port) = port.trim().parse::<u16>() {
                if port > 0 {
                    config.port = port;
                }
            }
        }
        config
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/devices", get(routes::list_devices))
        .route("/devices/{id}", get(routes::get_device))
        .route("/devices/{id}/command", post(routes::send_command))
        .route("/ws/device/{id}", get(routes::device_ws))
        .route("/ws/observer", get(routes::observer_ws))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the hub. Returns a handle owning the background
/// tasks; dropping it does not stop them, call [`HubHandle::shutdown`].
pub async fn start(config: HubConfig) -> Result<HubHandle, std::io::Error> {
    let registry = Arc::new(DeviceRegistry::new(config.max_send_queue));
    let shutdown = CancellationToken::new();

    let reaper = start_reaper(
        Arc::clone(&registry),
        config.reap_interval,
        config.stale_timeout,
        shutdown.child_token(),
    );

    let router = build_router(AppState {
        registry: Arc::clone(&registry),
    });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "hub listening");

    let serve_cancel = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
            .await
            .ok();
    });

    Ok(HubHandle {
        port: local_addr.port(),
        registry,
        shutdown,
        server,
        reaper,
    })
}

/// Handle returned by [`start`] — keeps background tasks alive.
pub struct HubHandle {
    pub port: u16,
    pub registry: Arc<DeviceRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    reaper: tokio::task::JoinHandle<()>,
}

impl HubHandle {
    /// Stop accepting connections, close every live session, and wait
    /// for all background tasks to finish.
    pub async fn shutdown(self) {
        info!("hub shutting down");
        self.shutdown.cancel();
        self.registry.disconnect_all();
        let _ = self.reaper.await;
        let _ = self.server.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_fixed_constants() {
        let config = HubConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.stale_timeout, Duration::from_secs(300));
        assert_eq!(config.reap_interval, Duration::from_secs(60));
    }

    #[test]
    fn build_router_creates_routes() {
        let state = AppState {
            registry: Arc::new(DeviceRegistry::new(32)),
        };
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn start_binds_a_random_port() {
        let config = HubConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };
        let handle = start(config).await.unwrap();
        assert!(handle.port > 0);
        handle.shutdown().await;
    }
}
