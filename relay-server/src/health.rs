//! # Health-Probe Endpoint (C8)
//!
//! `GET /{tunnel_id}/status` — spec §4.8. Issues a ping locally when an
//! agent is attached here, forwards the probe to the owning peer instance
//! otherwise, and synthesizes a disconnected report when nobody owns the
//! tunnel at all.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use tunnel_protocol::bus::BroadcastPayload;
use tunnel_protocol::{BroadcastMessage, ControlMessage, HealthStatusReport, LocalServiceStatus, TunnelStatus};

use crate::error::RelayError;
use crate::pending::{PendingOutcome, FORWARDED_HEALTH_TIMEOUT, LOCAL_PING_TIMEOUT};
use crate::state::AppState;

pub async fn health_handler(State(state): State<AppState>, Path(tunnel_id): Path<String>) -> Response {
    match handle(state, tunnel_id).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle(state: AppState, tunnel_id: String) -> Result<HealthStatusReport, RelayError> {
    state
        .persistence
        .get_tunnel(&tunnel_id)
        .map_err(|e| RelayError::Persistence(e.to_string()))?
        .ok_or(RelayError::TunnelNotFound)?;

    if let Some(conn) = state.sockets.get_open(&tunnel_id) {
        let job_id = Uuid::new_v4().to_string();
        let rx = state.agent_health.register_local(job_id.clone(), LOCAL_PING_TIMEOUT);
        if conn
            .tx
            .send(ControlMessage::Ping {
                health_check_job_id: job_id,
            })
            .is_err()
        {
            return Ok(agent_unresponsive_report(&tunnel_id, &state.instance_id));
        }
        return match rx.await {
            Ok(PendingOutcome::Resolved(report)) => Ok(report),
            _ => Ok(agent_unresponsive_report(&tunnel_id, &state.instance_id)),
        };
    }

    if let Some(owner) = state.ownership.get(&tunnel_id) {
        if owner != *state.instance_id {
            let job_id = Uuid::new_v4().to_string();
            let rx = state.forwarded_health.register(job_id.clone(), FORWARDED_HEALTH_TIMEOUT);
            state
                .bus
                .publish(BroadcastMessage::new(
                    state.instance_id.to_string(),
                    BroadcastPayload::ForwardHealthCheck {
                        target_instance_id: owner,
                        tunnel_id: tunnel_id.clone(),
                        health_check_job_id: job_id,
                    },
                ))
                .await
                .map_err(|e| RelayError::Bus(e.to_string()))?;

            return match rx.await {
                Ok(PendingOutcome::Resolved(report)) => Ok(report),
                _ => Err(RelayError::ForwardTimeout),
            };
        }
    }

    Ok(disconnected_report(&tunnel_id, &state.instance_id))
}

fn agent_unresponsive_report(tunnel_id: &str, instance_id: &str) -> HealthStatusReport {
    HealthStatusReport {
        tunnel_id: tunnel_id.to_string(),
        tunnel_status: TunnelStatus::Connected,
        local_service_status: LocalServiceStatus::AgentUnresponsive,
        checked_by_instance_id: instance_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

fn disconnected_report(tunnel_id: &str, instance_id: &str) -> HealthStatusReport {
    HealthStatusReport {
        tunnel_id: tunnel_id.to_string(),
        tunnel_status: TunnelStatus::Disconnected,
        local_service_status: LocalServiceStatus::Unknown,
        checked_by_instance_id: instance_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_report_shape() {
        let report = disconnected_report("T", "I1");
        assert_eq!(report.tunnel_status, TunnelStatus::Disconnected);
        assert_eq!(report.local_service_status, LocalServiceStatus::Unknown);
    }

    #[test]
    fn agent_unresponsive_report_keeps_connected_tunnel_status() {
        let report = agent_unresponsive_report("T", "I1");
        assert_eq!(report.tunnel_status, TunnelStatus::Connected);
        assert_eq!(report.local_service_status, LocalServiceStatus::AgentUnresponsive);
    }
}
