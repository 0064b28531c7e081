//! # Control-Channel Endpoint (C6)
//!
//! One axum WebSocket per agent, in two flavors: `/ws/register` mints a
//! fresh tunnel, `/ws/{tunnel_id}` reattaches an existing one (spec §4.6).
//! Connection shape mirrors the teacher's `handlers::handle_connection`:
//! split the socket into sink/stream, an outbound task drains an mpsc
//! queue into the sink, and an inbound loop dispatches one frame at a
//! time on the current task.
//!
//! This module also runs the other half of C1's fleet-wide wiring: the
//! bus dispatcher that turns broadcast envelopes addressed to this
//! instance into pushes onto a local agent's control connection, and
//! turns the agent's eventual answer back into a broadcast reply.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use tunnel_protocol::bus::{BroadcastPayload, TunnelActivityKind};
use tunnel_protocol::{
    BroadcastMessage, ControlMessage, HealthStatusReport, HttpRequestData, HttpResponseData,
    LocalServiceStatus, ReconnectedData, RegisteredData, ServiceConfig, TunnelStatus,
};

use crate::pending::{ForwardTarget, ResolveOutcome, HTTP_TIMEOUT, LOCAL_PING_TIMEOUT};
use crate::persistence::{TunnelRegistration, TunnelRegistrationStatus};
use crate::sockets::{ControlConnection, ControlTx};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub api_key: String,
}

pub async fn register_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    if !state.authenticator.is_valid(&query.api_key) {
        return (StatusCode::UNAUTHORIZED, "missing or invalid api key").into_response();
    }
    ws.on_upgrade(move |socket| handle_register_connection(socket, state, query.api_key))
}

pub async fn reconnect_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(tunnel_id): Path<String>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    if !state.authenticator.is_valid(&query.api_key) {
        return (StatusCode::UNAUTHORIZED, "missing or invalid api key").into_response();
    }
    ws.on_upgrade(move |socket| handle_reconnect_connection(socket, state, tunnel_id, query.api_key))
}

fn spawn_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ControlMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize control message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    })
}

async fn handle_register_connection(socket: WebSocket, state: AppState, api_key: String) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<ControlMessage>();
    let outbound = spawn_outbound(sink, rx);

    let tunnel_id = loop {
        let Some(Ok(msg)) = stream.next().await else {
            outbound.abort();
            return;
        };
        match msg {
            Message::Close(_) => {
                outbound.abort();
                return;
            }
            Message::Text(text) => match serde_json::from_str::<ControlMessage>(&text) {
                Ok(ControlMessage::Register { data }) => {
                    match do_register(&state, &api_key, data.services, tx.clone()).await {
                        Ok((tunnel_id, public_base_url)) => {
                            let _ = tx.send(ControlMessage::Registered {
                                data: RegisteredData {
                                    tunnel_id: tunnel_id.clone(),
                                    public_base_url,
                                },
                            });
                            break tunnel_id;
                        }
                        Err(reason) => {
                            let _ = tx.send(ControlMessage::Error {
                                error: reason,
                                request_id: None,
                            });
                        }
                    }
                }
                _ => {
                    let _ = tx.send(ControlMessage::Error {
                        error: "expected a register frame".to_string(),
                        request_id: None,
                    });
                }
            },
            _ => {}
        }
    };

    info!(%tunnel_id, "agent registered");
    run_connection_loop(&tunnel_id, &state, &tx, &mut stream).await;
    outbound.abort();
    on_disconnect(&state, &tunnel_id).await;
}

async fn handle_reconnect_connection(socket: WebSocket, state: AppState, tunnel_id: String, api_key: String) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<ControlMessage>();
    let outbound = spawn_outbound(sink, rx);

    match do_reconnect(&state, &tunnel_id, &api_key, tx.clone()).await {
        Ok(message) => {
            let _ = tx.send(ControlMessage::Reconnected {
                data: ReconnectedData {
                    tunnel_id: tunnel_id.clone(),
                    message,
                },
            });
        }
        Err(reason) => {
            // Policy violation: tell the agent, then close without ever
            // entering the active-socket table (spec §4.6.2 step 2).
            let _ = tx.send(ControlMessage::Error {
                error: reason,
                request_id: None,
            });
            drop(tx);
            let _ = tokio::time::timeout(Duration::from_secs(2), outbound).await;
            return;
        }
    }

    info!(%tunnel_id, "agent reconnected");
    run_connection_loop(&tunnel_id, &state, &tx, &mut stream).await;
    outbound.abort();
    on_disconnect(&state, &tunnel_id).await;
}

async fn do_register(
    state: &AppState,
    api_key: &str,
    services: Vec<ServiceConfig>,
    tx: ControlTx,
) -> Result<(String, String), String> {
    for svc in &services {
        svc.validate()?;
    }
    let tunnel_id = format!("T-{}", Uuid::new_v4().simple());
    let registration = TunnelRegistration::new(tunnel_id.clone(), api_key.to_string(), services);
    state
        .persistence
        .save_tunnel(&registration)
        .map_err(|e| e.to_string())?;

    state.sockets.insert(ControlConnection {
        tunnel_id: tunnel_id.clone(),
        api_key: api_key.to_string(),
        tx,
    });
    state.ownership.set(&tunnel_id, &state.instance_id);
    publish_activity(state, &tunnel_id, TunnelActivityKind::Connected).await;

    let public_base_url = format!("{}/{}", state.config.public_base_url, tunnel_id);
    Ok((tunnel_id, public_base_url))
}

async fn do_reconnect(state: &AppState, tunnel_id: &str, api_key: &str, tx: ControlTx) -> Result<String, String> {
    let registration = state
        .persistence
        .get_tunnel(tunnel_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "unknown tunnel".to_string())?;
    if registration.api_key != api_key {
        return Err("api key does not match this tunnel".to_string());
    }

    state.sockets.insert(ControlConnection {
        tunnel_id: tunnel_id.to_string(),
        api_key: api_key.to_string(),
        tx,
    });
    state
        .persistence
        .update_tunnel_status(tunnel_id, TunnelRegistrationStatus::Connected)
        .map_err(|e| e.to_string())?;
    state.ownership.set(tunnel_id, &state.instance_id);
    publish_activity(state, tunnel_id, TunnelActivityKind::Connected).await;

    Ok("tunnel reattached".to_string())
}

async fn on_disconnect(state: &AppState, tunnel_id: &str) {
    state.sockets.remove(tunnel_id);
    if let Ok(Some(_)) = state.persistence.get_tunnel(tunnel_id) {
        let _ = state
            .persistence
            .update_tunnel_status(tunnel_id, TunnelRegistrationStatus::Disconnected);
    }
    state.ownership.remove_if_owned_by(tunnel_id, &state.instance_id);
    publish_activity(state, tunnel_id, TunnelActivityKind::Disconnected).await;
    info!(%tunnel_id, "agent disconnected");
}

async fn publish_activity(state: &AppState, tunnel_id: &str, activity: TunnelActivityKind) {
    let _ = state
        .bus
        .publish(BroadcastMessage::new(
            state.instance_id.to_string(),
            BroadcastPayload::TunnelActivity {
                tunnel_id: tunnel_id.to_string(),
                activity,
            },
        ))
        .await;
}

async fn run_connection_loop(
    tunnel_id: &str,
    state: &AppState,
    tx: &ControlTx,
    stream: &mut (impl Stream<Item = Result<Message, axum::Error>> + Unpin),
) {
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ControlMessage>(&text) {
                Ok(frame) => dispatch_frame(tunnel_id, state, frame).await,
                Err(e) => {
                    warn!(error = %e, %tunnel_id, "unparseable control frame");
                    let _ = tx.send(ControlMessage::Error {
                        error: "malformed frame".to_string(),
                        request_id: None,
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn dispatch_frame(tunnel_id: &str, state: &AppState, frame: ControlMessage) {
    match frame {
        ControlMessage::Heartbeat => {
            if let Some(conn) = state.sockets.get_open(tunnel_id) {
                let _ = conn.tx.send(ControlMessage::HeartbeatAck);
            }
        }
        ControlMessage::HttpResponse { request_id, data } => {
            if let ResolveOutcome::Forwarded(target) = state.agent_http.resolve(&request_id, data.clone()) {
                let _ = state
                    .bus
                    .publish(BroadcastMessage::new(
                        state.instance_id.to_string(),
                        BroadcastPayload::HttpResponse {
                            target_instance_id: target.origin_instance_id,
                            tunnel_id: tunnel_id.to_string(),
                            request_id: target.origin_job_id,
                            response_data: data,
                        },
                    ))
                    .await;
            }
        }
        ControlMessage::Pong {
            health_check_job_id,
            local_service_status,
        } => {
            let report = HealthStatusReport {
                tunnel_id: tunnel_id.to_string(),
                tunnel_status: TunnelStatus::Connected,
                local_service_status,
                checked_by_instance_id: state.instance_id.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            if let ResolveOutcome::Forwarded(target) = state.agent_health.resolve(&health_check_job_id, report.clone()) {
                let _ = state
                    .bus
                    .publish(BroadcastMessage::new(
                        state.instance_id.to_string(),
                        BroadcastPayload::ForwardHealthCheckResponse {
                            target_instance_id: target.origin_instance_id,
                            tunnel_id: tunnel_id.to_string(),
                            health_check_job_id: target.origin_job_id,
                            status_report: report,
                        },
                    ))
                    .await;
            }
        }
        other => warn!(?other, %tunnel_id, "unexpected frame from agent"),
    }
}

/// Drains broadcast messages addressed to this instance, turning bus
/// traffic into pushes onto local agent connections and vice versa.
/// Spawned once at startup alongside [`crate::bus::BroadcastBus::start`].
pub async fn run_bus_dispatcher(state: AppState, mut rx: mpsc::UnboundedReceiver<BroadcastMessage>) {
    while let Some(msg) = rx.recv().await {
        let origin = msg.original_instance_id;
        match msg.payload {
            BroadcastPayload::TunnelActivity { tunnel_id, activity } => match activity {
                TunnelActivityKind::Connected => state.ownership.set(&tunnel_id, &origin),
                TunnelActivityKind::Disconnected => state.ownership.remove_if_owned_by(&tunnel_id, &origin),
            },
            BroadcastPayload::HttpRequest {
                tunnel_id,
                request_id,
                request_data,
                ..
            } => {
                dispatch_forwarded_http_request(&state, origin, tunnel_id, request_id, request_data).await;
            }
            BroadcastPayload::HttpResponse {
                request_id,
                response_data,
                ..
            } => {
                state.forwarded_http.resolve(&request_id, response_data);
            }
            BroadcastPayload::ForwardHealthCheck {
                tunnel_id,
                health_check_job_id,
                ..
            } => {
                dispatch_forwarded_health_check(&state, origin, tunnel_id, health_check_job_id).await;
            }
            BroadcastPayload::ForwardHealthCheckResponse {
                health_check_job_id,
                status_report,
                ..
            } => {
                state.forwarded_health.resolve(&health_check_job_id, status_report);
            }
        }
    }
}

async fn dispatch_forwarded_http_request(
    state: &AppState,
    origin: String,
    tunnel_id: String,
    job_id: String,
    data: HttpRequestData,
) {
    let Some(conn) = state.sockets.get_open(&tunnel_id) else {
        let response = HttpResponseData {
            status: 502,
            headers: Default::default(),
            body: Some("tunnel agent not connected".to_string()),
            body_is_base64: false,
        };
        let _ = state
            .bus
            .publish(BroadcastMessage::new(
                state.instance_id.to_string(),
                BroadcastPayload::HttpResponse {
                    target_instance_id: origin,
                    tunnel_id,
                    request_id: job_id,
                    response_data: response,
                },
            ))
            .await;
        return;
    };

    let agent_req_id = Uuid::new_v4().to_string();
    state.agent_http.register_forwarded(
        agent_req_id.clone(),
        ForwardTarget {
            origin_job_id: job_id,
            origin_instance_id: origin,
        },
        HTTP_TIMEOUT,
    );
    let _ = conn.tx.send(ControlMessage::HttpRequest {
        request_id: agent_req_id,
        data,
    });
}

async fn dispatch_forwarded_health_check(state: &AppState, origin: String, tunnel_id: String, job_id: String) {
    let Some(conn) = state.sockets.get_open(&tunnel_id) else {
        let report = HealthStatusReport {
            tunnel_id: tunnel_id.clone(),
            tunnel_status: TunnelStatus::Disconnected,
            local_service_status: LocalServiceStatus::Unknown,
            checked_by_instance_id: state.instance_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let _ = state
            .bus
            .publish(BroadcastMessage::new(
                state.instance_id.to_string(),
                BroadcastPayload::ForwardHealthCheckResponse {
                    target_instance_id: origin,
                    tunnel_id,
                    health_check_job_id: job_id,
                    status_report: report,
                },
            ))
            .await;
        return;
    };

    state.agent_health.register_forwarded(
        job_id.clone(),
        ForwardTarget {
            origin_job_id: job_id.clone(),
            origin_instance_id: origin,
        },
        LOCAL_PING_TIMEOUT,
    );
    let _ = conn.tx.send(ControlMessage::Ping {
        health_check_job_id: job_id,
    });
}
