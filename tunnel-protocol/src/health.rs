//! # Health-probe vocabulary
//!
//! Shapes returned by `GET /{tunnelId}/status` (C8) and carried inside
//! `pong`/`forwardHealthCheckResponse` messages.

use serde::{Deserialize, Serialize};

/// Status of the tunnel's control connection, as observed by the instance
/// that answered the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    Connected,
    Disconnected,
    Unknown,
}

/// Status of the agent's local service, as reported by the agent itself or
/// inferred by the relay when the agent never answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalServiceStatus {
    Ok,
    Error,
    Timeout,
    AgentUnresponsive,
    Unconfigured,
    Unknown,
}

/// The JSON body returned by the health-probe endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatusReport {
    pub tunnel_id: String,
    pub tunnel_status: TunnelStatus,
    pub local_service_status: LocalServiceStatus,
    pub checked_by_instance_id: String,
    pub timestamp: String,
}
