//! # Services and HTTP payload shapes
//!
//! `ServiceConfig` is what an agent advertises on `register`; `HttpRequestData`
//! and `HttpResponseData` are the bodies carried by `httpRequest`/`httpResponse`
//! frames and by the matching broadcast-bus envelopes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The kind of local service a tunnel fronts. Only `Http` is dialable today;
/// `Tcp` is accepted and persisted but the core never opens a request to it
/// (raw TCP tunneling is out of scope — see spec §1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Http,
    Tcp,
}

/// One local service an agent exposes under a tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub local_port: u16,
    pub subdomain_or_path: String,
}

impl ServiceConfig {
    /// Validates the shape required by the register flow (§4.6.1 step 3):
    /// non-empty `local_port`, non-empty `subdomain_or_path`.
    pub fn validate(&self) -> Result<(), String> {
        if self.local_port == 0 {
            return Err("local_port must be non-zero".into());
        }
        if self.subdomain_or_path.trim().is_empty() {
            return Err("subdomain_or_path must not be empty".into());
        }
        if self.subdomain_or_path.contains('/') || self.subdomain_or_path.contains(char::is_whitespace) {
            return Err("subdomain_or_path must not contain '/' or whitespace".into());
        }
        Ok(())
    }
}

/// The body of an `httpRequest` frame: method, path (already stripped of the
/// `<tunnelId>` prefix), headers, and a body encoded per [`crate::codec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestData {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// `true` when `body` is base64-encoded bytes rather than raw text.
    #[serde(default)]
    pub body_is_base64: bool,
}

/// The body of an `httpResponse` frame, mirroring [`HttpRequestData`]'s
/// encoding rule on the way back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponseData {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    #[serde(default)]
    pub body_is_base64: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_port() {
        let svc = ServiceConfig {
            service_type: ServiceType::Http,
            local_port: 0,
            subdomain_or_path: "web".into(),
        };
        assert!(svc.validate().is_err());
    }

    #[test]
    fn rejects_path_with_slash() {
        let svc = ServiceConfig {
            service_type: ServiceType::Http,
            local_port: 3000,
            subdomain_or_path: "a/b".into(),
        };
        assert!(svc.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_service() {
        let svc = ServiceConfig {
            service_type: ServiceType::Http,
            local_port: 3000,
            subdomain_or_path: "web".into(),
        };
        assert!(svc.validate().is_ok());
    }
}
