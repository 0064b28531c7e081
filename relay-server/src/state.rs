//! # Shared application state
//!
//! One `AppState` per relay instance, cloned into every handler. Ties
//! together the four in-memory registries (C2, C4, C5's httpRequest
//! registry, C3/health registries), the persistence adapter, the
//! authenticator, and the broadcast bus — the same "one struct of
//! `Arc<DashMap<...>>` fields, cloned freely" shape the teacher's own
//! `AppState` uses.

use std::sync::Arc;

use tunnel_protocol::{HttpResponseData, HealthStatusReport};

use crate::auth::Authenticator;
use crate::bus::BroadcastBus;
use crate::config::RelayConfig;
use crate::ownership::OwnershipRegistry;
use crate::pending::{DualPendingRegistry, PendingRegistry};
use crate::persistence::PersistenceAdapter;
use crate::sockets::ActiveSocketTable;

/// C5: keyed by `agentReqId`, resolved by the agent's `httpResponse`.
pub type AgentHttpRegistry = DualPendingRegistry<HttpResponseData>;
/// C3: keyed by `jobId`, resolved by a peer's `httpResponse` broadcast.
pub type ForwardedHttpRegistry = PendingRegistry<HttpResponseData>;
/// Health-check analogue of C5, keyed by `healthCheckJobId`.
pub type AgentHealthRegistry = DualPendingRegistry<HealthStatusReport>;
/// Health-check analogue of C3, keyed by `jobId`.
pub type ForwardedHealthRegistry = PendingRegistry<HealthStatusReport>;

#[derive(Clone)]
pub struct AppState {
    pub instance_id: Arc<str>,
    pub config: Arc<RelayConfig>,

    pub sockets: Arc<ActiveSocketTable>,
    pub ownership: Arc<OwnershipRegistry>,
    pub agent_http: Arc<AgentHttpRegistry>,
    pub forwarded_http: Arc<ForwardedHttpRegistry>,
    pub agent_health: Arc<AgentHealthRegistry>,
    pub forwarded_health: Arc<ForwardedHealthRegistry>,

    pub persistence: Arc<PersistenceAdapter>,
    pub authenticator: Arc<dyn Authenticator>,
    pub bus: Arc<dyn BroadcastBus>,
}

impl AppState {
    pub fn new(
        instance_id: String,
        config: RelayConfig,
        persistence: PersistenceAdapter,
        authenticator: Arc<dyn Authenticator>,
        bus: Arc<dyn BroadcastBus>,
    ) -> Self {
        Self {
            instance_id: Arc::from(instance_id),
            config: Arc::new(config),
            sockets: Arc::new(ActiveSocketTable::new()),
            ownership: Arc::new(OwnershipRegistry::new()),
            agent_http: Arc::new(DualPendingRegistry::new()),
            forwarded_http: Arc::new(PendingRegistry::new()),
            agent_health: Arc::new(DualPendingRegistry::new()),
            forwarded_health: Arc::new(PendingRegistry::new()),
            persistence: Arc::new(persistence),
            authenticator,
            bus,
        }
    }
}
