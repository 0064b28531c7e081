//! # Agent Connector (C9)
//!
//! Owns the agent's one WebSocket connection to a relay instance: dial,
//! register or reattach, heartbeat, dispatch incoming frames to the
//! executor, and reconnect with backoff when the transport drops. Mirrors
//! the teacher's `run_agent_loop` connect/split/spawn-outbound/dispatch-
//! inbound shape; the fixed `RECONNECT_DELAY_SECS` retry is replaced with
//! exponential backoff (spec §6, §9) since the teacher never needed to
//! survive a relay instance restart under load.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{error, info, warn};

use tunnel_protocol::{ControlMessage, RegisterData};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::executor;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Runs the connect/dispatch/reconnect loop until a terminal error occurs.
/// Never returns `Ok` — the agent's only lifecycle is "keep this tunnel
/// open" until the process is killed or the relay permanently refuses it.
pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let http_client = executor::http_client();
    let mut tunnel_id: Option<String> = None;
    let mut retry: u32 = 0;

    loop {
        let url = match &tunnel_id {
            Some(id) => format!("{}/ws/{}?api_key={}", config.relay_url.trim_end_matches('/'), id, config.api_key),
            None => format!("{}/ws/register?api_key={}", config.relay_url.trim_end_matches('/'), config.api_key),
        };

        match run_connection(&url, &config, &http_client, tunnel_id.is_some()).await {
            Ok(ConnectionOutcome::Disconnected { learned_tunnel_id }) => {
                if learned_tunnel_id.is_some() {
                    tunnel_id = learned_tunnel_id;
                }
                retry = 0;
                info!("control connection closed, reconnecting immediately");
                continue;
            }
            Ok(ConnectionOutcome::Terminal(reason)) => {
                error!(%reason, "relay rejected this agent permanently");
                return Err(AgentError::Terminal(reason).into());
            }
            Err(e) => {
                warn!(error = %e, "connection attempt failed");
            }
        }

        let delay = std::cmp::min(MAX_BACKOFF, BASE_BACKOFF * 2u32.saturating_pow(retry));
        retry = retry.saturating_add(1);
        info!(delay_secs = delay.as_secs(), "backing off before reconnect");
        sleep(delay).await;
    }
}

enum ConnectionOutcome {
    /// The socket closed after a successful registration/reattach. Carries
    /// the tunnel id learned this session so the next dial can reattach by
    /// URL instead of registering fresh.
    Disconnected { learned_tunnel_id: Option<String> },
    /// The relay refused the tunnel outright; retrying will not help.
    Terminal(String),
}

async fn run_connection(
    url: &str,
    config: &AgentConfig,
    http_client: &reqwest::Client,
    is_reattach: bool,
) -> anyhow::Result<ConnectionOutcome> {
    let ws_stream = match tokio_tungstenite::connect_async(url).await {
        Ok((stream, _)) => stream,
        // The relay rejects the upgrade before the handshake completes when
        // the api key is invalid (relay-server's pre-upgrade 401 in
        // control.rs). That credential will never become valid on its own,
        // so give up instead of backing off forever against a dead key.
        Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
            return Ok(ConnectionOutcome::Terminal("relay rejected the api key (401 Unauthorized)".to_string()));
        }
        Err(e) => return Err(AgentError::Transport(e.to_string()).into()),
    };
    info!(is_reattach, "control connection established");
    let (mut sink, mut stream) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();

    let outbound = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound control frame");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if !is_reattach {
        let _ = tx.send(ControlMessage::Register {
            data: RegisterData {
                services: config.services.iter().map(to_service_config).collect(),
            },
        });
    }

    let mut tunnel_id: Option<String> = None;
    let mut terminal: Option<String> = None;
    let heartbeat_tx = tx.clone();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            if heartbeat_tx.send(ControlMessage::Heartbeat).is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "transport error on control connection");
                break;
            }
        };
        let WsMessage::Text(text) = frame else {
            continue;
        };
        let message: ControlMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "received malformed control frame");
                continue;
            }
        };

        match message {
            ControlMessage::Registered { data } => {
                info!(tunnel_id = %data.tunnel_id, public_base_url = %data.public_base_url, "tunnel registered");
                tunnel_id = Some(data.tunnel_id);
            }
            ControlMessage::Reconnected { data } => {
                info!(tunnel_id = %data.tunnel_id, message = %data.message, "tunnel reattached");
                tunnel_id = Some(data.tunnel_id);
            }
            ControlMessage::HeartbeatAck => {}
            ControlMessage::Error { error, request_id } => {
                warn!(%error, ?request_id, "relay reported an error");
                // Only the reconnect path's pre-`reconnected` errors are the
                // identity-mismatch/unknown-tunnel rejections spec §4.6.2
                // describes as non-retryable with this tunnel id. A register-
                // path error (e.g. a service failing validation) is the
                // recoverable case spec §4.6.1 step 3 keeps the connection
                // open for, not a reason to give up on this agent entirely.
                if is_reattach && request_id.is_none() && tunnel_id.is_none() {
                    terminal = Some(error);
                    break;
                }
            }
            ControlMessage::HttpRequest { request_id, data } => {
                let tx = tx.clone();
                let client = http_client.clone();
                let services = config.services.clone();
                tokio::spawn(async move {
                    let response = executor::execute(&client, &services, data).await;
                    let _ = tx.send(ControlMessage::HttpResponse { request_id, data: response });
                });
            }
            ControlMessage::Ping { health_check_job_id } => {
                let tx = tx.clone();
                let client = http_client.clone();
                let services = config.services.clone();
                tokio::spawn(async move {
                    let status = executor::check_health(&client, &services).await;
                    let _ = tx.send(ControlMessage::Pong {
                        health_check_job_id,
                        local_service_status: status,
                    });
                });
            }
            other => {
                warn!(?other, "unexpected frame direction on control connection");
            }
        }
    }

    heartbeat.abort();
    drop(tx);
    outbound.abort();

    if let Some(reason) = terminal {
        return Ok(ConnectionOutcome::Terminal(reason));
    }
    Ok(ConnectionOutcome::Disconnected { learned_tunnel_id: tunnel_id })
}

fn to_service_config(svc: &crate::config::AgentServiceConfig) -> tunnel_protocol::ServiceConfig {
    let service_type = if svc.is_http() {
        tunnel_protocol::ServiceType::Http
    } else {
        tunnel_protocol::ServiceType::Tcp
    };
    tunnel_protocol::ServiceConfig {
        service_type,
        local_port: svc.local_port,
        subdomain_or_path: svc.subdomain_or_path.clone(),
    }
}
