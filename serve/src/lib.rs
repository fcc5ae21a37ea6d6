//! HTTP/SSE server for the caphub core (axum).
//!
//! Serves the `/api/cap` surface: agents, threads, runs (including the SSE
//! run stream), and interrupts. All success responses are
//! `{"success":true,"data":…}`; errors are
//! `{"success":false,"error":{code,message,details}}` with codes emitted
//! verbatim.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`],
//! [`hub_config_from_settings`].

mod agents;
mod app;
mod interrupts;
mod response;
mod runs;
mod threads;

use std::sync::Arc;
use std::time::Duration;

use caphub::{Hub, HubConfig};
use config::HubSettings;
use tokio::net::TcpListener;
use tracing::info;

use app::{router, AppState};

const DEFAULT_ADDR: &str = "127.0.0.1:8087";

/// Maps the environment settings onto the hub configuration.
pub fn hub_config_from_settings(settings: &HubSettings) -> HubConfig {
    HubConfig {
        pool_size: settings.pool_size,
        checkpoint_interval: Duration::from_millis(settings.checkpoint_interval_ms),
        default_timeout: Duration::from_millis(settings.default_timeout_ms),
        max_timeout: Duration::from_millis(settings.max_timeout_ms),
        grace: Duration::from_millis(settings.grace_ms),
        lease_ttl: Duration::from_millis(settings.lease_ttl_ms),
        health_interval: Duration::from_millis(settings.health_interval_ms),
        unhealthy_threshold: settings.unhealthy_threshold,
        min_confidence: settings.min_confidence,
        max_agents_per_system: settings.max_agents_per_system,
        bus_capacity: settings.bus_capacity,
        distributed: settings.distributed,
        ..HubConfig::default()
    }
}

/// Runs the server on an existing listener. Used by tests (bind to
/// `127.0.0.1:0`, then pass the listener).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    hub: Arc<Hub>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("caphub listening on http://{}", addr);
    let state = Arc::new(AppState { hub });
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Binds `addr` (default 127.0.0.1:8087) and serves until the process exits.
pub async fn run_serve(
    addr: Option<&str>,
    hub: Arc<Hub>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, hub).await
}
