//! # deskunit-node
//!
//! Faculty desk unit node.
//!
//! This binary provides:
//! - The presence and consultation control loop
//! - A local HTTP gateway for the message bus bridge and operators
//! - Optional forwarding of published messages to the bridge
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, with a simulated beacon
//! cargo run --package deskunit-node --no-default-features --features mock-bluetooth
//!
//! # Production (on the desk unit)
//! DESKUNIT_CONFIG=/etc/deskunit/config.toml ./deskunit-node
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use deskunit_core::{
    default_config_path, BeaconScanner, DeskError, DeskUnit, MonotonicClock, NodeConfig,
};
use deskunit_node::gateway::{self, BridgeForwarder, PanelDisplay};
use deskunit_node::state::AppState;
use deskunit_node::{api, logging, runner};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Environment variable pointing at the configuration file.
const CONFIG_PATH_ENV: &str = "DESKUNIT_CONFIG";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(default_config_path, PathBuf::from);
    let config = NodeConfig::load_or_default(&config_path)
        .map_err(DeskError::from)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    logging::init(&logging::LogMode::from_config(&config.server))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        faculty_id = config.faculty.id,
        config = %config_path.display(),
        "Starting deskunit-node"
    );
    if !config.bluetooth.is_configured() {
        warn!("No beacon address configured, presence will stay away until one is set");
    }

    let clock = MonotonicClock::new();
    let scanner = build_scanner(&config, clock)?;
    serve(&config, scanner, clock).await
}

#[cfg(feature = "bluetooth")]
fn build_scanner(
    config: &NodeConfig,
    clock: MonotonicClock,
) -> anyhow::Result<deskunit_core::BluerScanner<MonotonicClock>> {
    deskunit_core::BluerScanner::new(&config.bluetooth, clock)
        .map_err(DeskError::from)
        .context("Failed to open Bluetooth adapter")
}

#[cfg(not(feature = "bluetooth"))]
fn build_scanner(
    config: &NodeConfig,
    clock: MonotonicClock,
) -> anyhow::Result<deskunit_core::MockScanner<MonotonicClock>> {
    warn!("Built without Bluetooth support, simulating a beacon that is always in range");
    let mut scanner = deskunit_core::MockScanner::new(&config.bluetooth.target_address, clock)
        .map_err(DeskError::from)
        .context("Invalid beacon address")?;
    scanner.set_fallback(Some(-60));
    Ok(scanner)
}

async fn serve<S: BeaconScanner>(
    config: &NodeConfig,
    scanner: S,
    clock: MonotonicClock,
) -> anyhow::Result<()> {
    let (transport, outbox, forward_rx) = gateway::outbound(&config.bus);
    let (display, panel_rx) = PanelDisplay::new();
    let unit = DeskUnit::new(config, scanner, transport, display, clock);

    let (snapshot_tx, snapshot_rx) = watch::channel(unit.snapshot());
    let (inbox_tx, inbox_rx) = mpsc::channel(config.bus.inbox_capacity);

    if let (Some(bridge_url), Some(forward_rx)) = (&config.bus.bridge_url, forward_rx) {
        let forwarder = BridgeForwarder::new(bridge_url)?;
        info!(endpoint = %forwarder.endpoint(), "Forwarding published messages to bus bridge");
        tokio::spawn(forwarder.run(forward_rx));
    }

    let state = AppState::new(inbox_tx, snapshot_rx, panel_rx, outbox);
    let app = api::create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .context("Invalid server.bind_address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP gateway stopped");
        }
    });

    runner::run(unit, inbox_rx, snapshot_tx, shutdown_signal()).await;
    info!("deskunit-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
