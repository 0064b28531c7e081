//! # Tunnel Relay Server
//!
//! A horizontally-scalable HTTP tunnel relay. Agents behind NAT open a
//! persistent control connection to any instance in the fleet and advertise
//! local HTTP services under path prefixes; public clients address
//! `/<tunnelId>/<subPath>` on any instance and the relay locates whichever
//! instance currently holds that agent's connection.
//!
//! ## Modules
//!
//! - [`control`]     — the agent-facing WebSocket endpoint (C6) and the
//!   fleet-wide bus dispatcher that glues C1 into C4/C5.
//! - [`forward`]      — the public forwarding endpoint (C7).
//! - [`health`]       — the health-probe endpoint (C8).
//! - [`bus`]          — the broadcast bus (C1): `RedisBus` or `LocalBus`.
//! - [`ownership`]    — the ownership registry (C2).
//! - [`sockets`]      — the active-socket table (C4).
//! - [`pending`]      — the pending-request registries (C3, C5, and their
//!   health-check counterparts).
//! - [`persistence`]  — the tunnel-registration store (C11).
//! - [`identity`]     — one stable random id per process (C12).
//! - [`auth`]         — the authenticator seam (C13).

mod auth;
mod bus;
mod config;
mod control;
mod error;
mod forward;
mod health;
mod identity;
mod ownership;
mod pending;
mod persistence;
mod sockets;
mod state;

use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::StaticKeyAuthenticator;
use crate::bus::{BroadcastBus, LocalBus, RedisBus};
use crate::config::RelayConfig;
use crate::control::{reconnect_handler, register_handler, run_bus_dispatcher};
use crate::forward::forward_handler;
use crate::health::health_handler;
use crate::identity::generate_instance_id;
use crate::persistence::PersistenceAdapter;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay_server=info".into()),
        )
        .init();

    let config = RelayConfig::from_env();
    let instance_id = generate_instance_id();
    info!(instance_id = %instance_id, bind = %config.bind_addr, "starting relay instance");

    let db = sled::open(&config.persistence_path)?;
    let persistence = PersistenceAdapter::open(&db)?;
    let authenticator: Arc<dyn auth::Authenticator> = Arc::new(StaticKeyAuthenticator::from_env_value(&config.api_keys));

    let bus: Arc<dyn BroadcastBus> = match &config.redis_url {
        Some(url) => {
            info!(deployment = %config.deployment_name, "using Redis broadcast bus");
            Arc::new(RedisBus::connect(url, config.deployment_name.clone()).await?)
        }
        None => {
            info!("no RELAY_REDIS_URL set; using single-instance in-process bus");
            Arc::new(LocalBus::new())
        }
    };

    let state = AppState::new(instance_id.clone(), config.clone(), persistence, authenticator, bus.clone());

    let (bus_tx, bus_rx) = tokio::sync::mpsc::unbounded_channel();
    bus.start(instance_id, bus_tx).await?;
    tokio::spawn(run_bus_dispatcher(state.clone(), bus_rx));

    let app = Router::new()
        .route("/ws/register", get(register_handler))
        .route("/ws/{tunnel_id}", get(reconnect_handler))
        .route("/{tunnel_id}/status", get(health_handler))
        .route("/{tunnel_id}/{*sub_path}", any(forward_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("relay listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
