//! # Broadcast-bus envelopes
//!
//! Five named channels (spec §4.1, §6) carry these messages between relay
//! instances: `req`, `resp`, `activity`, `hc-req`, `hc-resp`. Every message
//! carries `originalInstanceId`; request/response/health-forward messages
//! additionally carry `targetInstanceId` and are ignored by instances that
//! aren't the target.
//!
//! Dispatch checks both the `type` tag and the channel a message arrived
//! on (spec §9: "include both `type` and the channel name in dispatch so
//! malformed cross-channel messages are rejected").

use serde::{Deserialize, Serialize};

use crate::health::HealthStatusReport;
use crate::service::{HttpRequestData, HttpResponseData};

/// The five bus channels, in the order spec §4.1 lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Req,
    Resp,
    Activity,
    HcReq,
    HcResp,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Req,
        Channel::Resp,
        Channel::Activity,
        Channel::HcReq,
        Channel::HcResp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Req => "req",
            Channel::Resp => "resp",
            Channel::Activity => "activity",
            Channel::HcReq => "hc-req",
            Channel::HcResp => "hc-resp",
        }
    }

    /// The physical pub/sub channel name for a given deployment, so that
    /// multiple independent deployments can share one Redis instance
    /// without cross-talk.
    pub fn topic(&self, deployment: &str) -> String {
        format!("tunnel-relay:{deployment}:{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelActivityKind {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastPayload {
    #[serde(rename = "httpRequest")]
    HttpRequest {
        #[serde(rename = "targetInstanceId")]
        target_instance_id: String,
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "requestData")]
        request_data: HttpRequestData,
    },
    #[serde(rename = "httpResponse")]
    HttpResponse {
        #[serde(rename = "targetInstanceId")]
        target_instance_id: String,
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "responseData")]
        response_data: HttpResponseData,
    },
    #[serde(rename = "tunnelActivity")]
    TunnelActivity {
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
        activity: TunnelActivityKind,
    },
    #[serde(rename = "forwardHealthCheck")]
    ForwardHealthCheck {
        #[serde(rename = "targetInstanceId")]
        target_instance_id: String,
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
        #[serde(rename = "healthCheckJobId")]
        health_check_job_id: String,
    },
    #[serde(rename = "forwardHealthCheckResponse")]
    ForwardHealthCheckResponse {
        #[serde(rename = "targetInstanceId")]
        target_instance_id: String,
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
        #[serde(rename = "healthCheckJobId")]
        health_check_job_id: String,
        #[serde(rename = "statusReport")]
        status_report: HealthStatusReport,
    },
}

/// A message as it travels on the bus: the payload plus the instance id of
/// whoever published it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "originalInstanceId")]
    pub original_instance_id: String,
    #[serde(flatten)]
    pub payload: BroadcastPayload,
}

impl BroadcastMessage {
    pub fn new(original_instance_id: impl Into<String>, payload: BroadcastPayload) -> Self {
        Self {
            original_instance_id: original_instance_id.into(),
            payload,
        }
    }

    /// The channel this message belongs on, derived from its payload shape.
    pub fn channel(&self) -> Channel {
        match &self.payload {
            BroadcastPayload::HttpRequest { .. } => Channel::Req,
            BroadcastPayload::HttpResponse { .. } => Channel::Resp,
            BroadcastPayload::TunnelActivity { .. } => Channel::Activity,
            BroadcastPayload::ForwardHealthCheck { .. } => Channel::HcReq,
            BroadcastPayload::ForwardHealthCheckResponse { .. } => Channel::HcResp,
        }
    }

    /// `Some(instance_id)` for messages targeted at one peer; `None` for
    /// broadcast-to-everyone messages (only `tunnelActivity` today).
    pub fn target_instance_id(&self) -> Option<&str> {
        match &self.payload {
            BroadcastPayload::HttpRequest { target_instance_id, .. }
            | BroadcastPayload::HttpResponse { target_instance_id, .. }
            | BroadcastPayload::ForwardHealthCheck { target_instance_id, .. }
            | BroadcastPayload::ForwardHealthCheckResponse { target_instance_id, .. } => {
                Some(target_instance_id)
            }
            BroadcastPayload::TunnelActivity { .. } => None,
        }
    }

    /// Whether `self_instance_id` should act on this message: it wasn't the
    /// publisher (bus never delivers to the publisher, but this is a second
    /// line of defense for in-process test doubles) and, if targeted, it is
    /// the target.
    pub fn is_for(&self, self_instance_id: &str) -> bool {
        if self.original_instance_id == self_instance_id {
            return false;
        }
        match self.target_instance_id() {
            Some(target) => target == self_instance_id,
            None => true,
        }
    }
}

/// Parses a payload received on a specific channel, rejecting payloads
/// whose `type` doesn't belong on that channel (spec §9 cross-channel
/// rejection).
pub fn parse_on_channel(channel: Channel, json: &str) -> Result<BroadcastMessage, String> {
    let msg: BroadcastMessage =
        serde_json::from_str(json).map_err(|e| format!("malformed broadcast message: {e}"))?;
    if msg.channel() != channel {
        return Err(format!(
            "message of type belonging to channel '{}' received on channel '{}'",
            msg.channel().as_str(),
            channel.as_str()
        ));
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_activity(instance: &str) -> BroadcastMessage {
        BroadcastMessage::new(
            instance,
            BroadcastPayload::TunnelActivity {
                tunnel_id: "T".into(),
                activity: TunnelActivityKind::Connected,
            },
        )
    }

    #[test]
    fn activity_is_for_everyone_except_publisher() {
        let msg = sample_activity("A");
        assert!(!msg.is_for("A"));
        assert!(msg.is_for("B"));
        assert!(msg.is_for("C"));
    }

    #[test]
    fn targeted_message_only_for_target() {
        let msg = BroadcastMessage::new(
            "A",
            BroadcastPayload::HttpRequest {
                target_instance_id: "B".into(),
                tunnel_id: "T".into(),
                request_id: "J".into(),
                request_data: HttpRequestData {
                    method: "GET".into(),
                    path: "/x".into(),
                    headers: HashMap::new(),
                    body: None,
                    body_is_base64: false,
                },
            },
        );
        assert!(msg.is_for("B"));
        assert!(!msg.is_for("C"));
        assert!(!msg.is_for("A"));
    }

    #[test]
    fn cross_channel_payload_is_rejected() {
        let msg = sample_activity("A");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(parse_on_channel(Channel::Req, &json).is_err());
        assert!(parse_on_channel(Channel::Activity, &json).is_ok());
    }
}
