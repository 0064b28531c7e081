//! # Control-channel frames
//!
//! JSON text frames exchanged between an agent and the relay instance
//! currently holding its socket (spec §6). Tagged by `type`, mirroring the
//! teacher's `WsMessage` discriminated union — one enum, one dispatch site
//! per direction, no open-ended handler table (spec §9).

use serde::{Deserialize, Serialize};

use crate::health::LocalServiceStatus;
use crate::service::{HttpRequestData, HttpResponseData, ServiceConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterData {
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredData {
    pub tunnel_id: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectedData {
    pub tunnel_id: String,
    pub message: String,
}

/// All control-channel messages, in both directions. See spec §6 for the
/// canonical field table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Agent→Relay: request a brand-new tunnel.
    #[serde(rename = "register")]
    Register { data: RegisterData },

    /// Agent→Relay: periodic keep-alive, ~25s interval.
    #[serde(rename = "heartbeat")]
    Heartbeat,

    /// Agent→Relay: answer to a previously-pushed `httpRequest`.
    #[serde(rename = "httpResponse")]
    HttpResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        data: HttpResponseData,
    },

    /// Agent→Relay: answer to a `ping`.
    #[serde(rename = "pong")]
    Pong {
        #[serde(rename = "healthCheckJobId")]
        health_check_job_id: String,
        #[serde(rename = "localServiceStatus")]
        local_service_status: LocalServiceStatus,
    },

    /// Relay→Agent: a new tunnel was minted for this connection.
    #[serde(rename = "registered")]
    Registered { data: RegisteredData },

    /// Relay→Agent: an existing tunnel was reattached to this connection.
    #[serde(rename = "reconnected")]
    Reconnected { data: ReconnectedData },

    /// Relay→Agent: heartbeat acknowledgment.
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck,

    /// Relay→Agent: forward this HTTP request to the local service.
    #[serde(rename = "httpRequest")]
    HttpRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        data: HttpRequestData,
    },

    /// Relay→Agent: health probe. Expects a matching `pong`.
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "healthCheckJobId")]
        health_check_job_id: String,
    },

    /// Either direction: a protocol-level error. `request_id` is set when
    /// the error is scoped to one in-flight request.
    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none", default)]
        request_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_request_uses_camel_case_type_tag() {
        let msg = ControlMessage::HttpRequest {
            request_id: "r1".into(),
            data: HttpRequestData {
                method: "GET".into(),
                path: "/hello".into(),
                headers: Default::default(),
                body: None,
                body_is_base64: false,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "httpRequest");
        assert_eq!(json["requestId"], "r1");
    }

    #[test]
    fn heartbeat_ack_round_trips() {
        let json = r#"{"type":"heartbeat_ack"}"#;
        let msg: ControlMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ControlMessage::HeartbeatAck));
    }

    #[test]
    fn error_without_request_id_omits_field() {
        let msg = ControlMessage::Error {
            error: "bad frame".into(),
            request_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("requestId").is_none());
    }
}
