//! # Public Forwarding Endpoint (C7)
//!
//! `ANY /{tunnel_id}/*sub_path` — spec §4.7. The local-vs-remote decision
//! is pulled out as a pure function of "what do we know" so it can be unit
//! tested without a live socket, mirroring how `codec.rs`'s rules are kept
//! pure in `tunnel-protocol`.

use std::collections::HashMap;

use axum::body::{to_bytes, Body};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;
use uuid::Uuid;

use tunnel_protocol::bus::BroadcastPayload;
use tunnel_protocol::codec::{decode_body, encode_body, status_is_bodyless};
use tunnel_protocol::{BroadcastMessage, ControlMessage, HttpRequestData, HttpResponseData};

use crate::error::RelayError;
use crate::pending::{PendingOutcome, HTTP_TIMEOUT};
use crate::persistence::TunnelRegistrationStatus;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// What the forwarding algorithm decides to do, given everything the
/// instance currently knows about a tunnel (spec §4.7 step 4).
#[derive(Debug, PartialEq, Eq)]
pub enum ForwardDecision {
    Local,
    Remote(String),
    NoOwner,
}

/// Pure decision function: local agent present and open wins; otherwise a
/// known, non-self owner is the remote path; otherwise nobody can serve it.
pub fn decide(has_open_local_socket: bool, owner: Option<&str>, self_instance_id: &str) -> ForwardDecision {
    if has_open_local_socket {
        return ForwardDecision::Local;
    }
    match owner {
        Some(owner) if owner != self_instance_id => ForwardDecision::Remote(owner.to_string()),
        _ => ForwardDecision::NoOwner,
    }
}

pub async fn forward_handler(
    State(state): State<AppState>,
    Path((tunnel_id, sub_path)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    match handle(state, tunnel_id, sub_path, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: AppState, tunnel_id: String, sub_path: String, request: Request<Body>) -> Result<Response, RelayError> {
    let registration = state
        .persistence
        .get_tunnel(&tunnel_id)
        .map_err(|e| RelayError::Persistence(e.to_string()))?
        .ok_or(RelayError::TunnelNotFound)?;
    if registration.status != TunnelRegistrationStatus::Connected {
        return Err(RelayError::TunnelNotConnected);
    }

    let has_open_local_socket = state.sockets.get_open(&tunnel_id).is_some();
    let owner = state.ownership.get(&tunnel_id);

    match decide(has_open_local_socket, owner.as_deref(), &state.instance_id) {
        ForwardDecision::Local if is_websocket_upgrade(request.headers()) => Err(RelayError::NotImplemented),
        ForwardDecision::Local => forward_local(&state, &tunnel_id, sub_path, request).await,
        ForwardDecision::Remote(_) if is_websocket_upgrade(request.headers()) => Err(RelayError::NotImplemented),
        ForwardDecision::Remote(owner) => forward_remote(&state, &tunnel_id, owner, sub_path, request).await,
        ForwardDecision::NoOwner => Err(RelayError::NoOwner),
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

async fn request_to_wire(method: &Method, sub_path: &str, headers: &HeaderMap, body: Body) -> Result<HttpRequestData, RelayError> {
    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| RelayError::Protocol(e.to_string()))?;
    let (body, body_is_base64) = encode_body(&bytes, content_type);

    let mut header_map = HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            header_map.insert(name.to_string(), v.to_string());
        }
    }

    Ok(HttpRequestData {
        method: method.to_string(),
        path: format!("/{sub_path}"),
        headers: header_map,
        body,
        body_is_base64,
    })
}

fn wire_to_response(data: HttpResponseData) -> Response {
    let mut builder = Response::builder().status(StatusCode::from_u16(data.status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in &data.headers {
        builder = builder.header(name, value);
    }
    let bytes = if status_is_bodyless(data.status) {
        Vec::new()
    } else {
        decode_body(data.body.as_deref(), data.body_is_base64)
    };
    builder.body(Body::from(bytes)).unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

async fn forward_local(state: &AppState, tunnel_id: &str, sub_path: String, request: Request<Body>) -> Result<Response, RelayError> {
    let Some(conn) = state.sockets.get_open(tunnel_id) else {
        return Err(RelayError::NoOwner);
    };
    let (parts, body) = request.into_parts();
    let data = request_to_wire(&parts.method, &sub_path, &parts.headers, body).await?;

    let agent_req_id = Uuid::new_v4().to_string();
    let rx = state.agent_http.register_local(agent_req_id.clone(), HTTP_TIMEOUT);
    if conn
        .tx
        .send(ControlMessage::HttpRequest {
            request_id: agent_req_id,
            data,
        })
        .is_err()
    {
        return Err(RelayError::NoOwner);
    }

    match rx.await {
        Ok(PendingOutcome::Resolved(data)) => Ok(wire_to_response(data)),
        Ok(PendingOutcome::Rejected(_)) => Err(RelayError::AgentTimeout),
        Err(_) => Err(RelayError::AgentTimeout),
    }
}

async fn forward_remote(
    state: &AppState,
    tunnel_id: &str,
    owner: String,
    sub_path: String,
    request: Request<Body>,
) -> Result<Response, RelayError> {
    let (parts, body) = request.into_parts();
    let data = request_to_wire(&parts.method, &sub_path, &parts.headers, body).await?;

    let job_id = Uuid::new_v4().to_string();
    let rx = state.forwarded_http.register(job_id.clone(), HTTP_TIMEOUT);
    state
        .bus
        .publish(BroadcastMessage::new(
            state.instance_id.to_string(),
            BroadcastPayload::HttpRequest {
                target_instance_id: owner,
                tunnel_id: tunnel_id.to_string(),
                request_id: job_id,
                request_data: data,
            },
        ))
        .await
        .map_err(|e| {
            warn!(error = %e, "failed to publish forwarded httpRequest");
            RelayError::Bus(e.to_string())
        })?;

    match rx.await {
        Ok(PendingOutcome::Resolved(data)) => Ok(wire_to_response(data)),
        Ok(PendingOutcome::Rejected(_)) => Err(RelayError::ForwardTimeout),
        Err(_) => Err(RelayError::ForwardTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_socket_wins_over_known_owner() {
        assert_eq!(decide(true, Some("other"), "self"), ForwardDecision::Local);
    }

    #[test]
    fn remote_owner_used_when_no_local_socket() {
        assert_eq!(decide(false, Some("other"), "self"), ForwardDecision::Remote("other".into()));
    }

    #[test]
    fn self_as_stale_owner_without_local_socket_is_no_owner() {
        // Ownership says "self" but the socket table disagrees: stale entry.
        assert_eq!(decide(false, Some("self"), "self"), ForwardDecision::NoOwner);
    }

    #[test]
    fn no_information_is_no_owner() {
        assert_eq!(decide(false, None, "self"), ForwardDecision::NoOwner);
    }
}
