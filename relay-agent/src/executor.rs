//! # Agent Request Executor (C10)
//!
//! Receives an `httpRequest` off the control channel, routes it to a
//! configured local service by path prefix, dials the service over plain
//! HTTP, and returns an `httpResponse`. Also answers health `ping`s with a
//! HEAD request against the first configured HTTP service (spec §4.10).

use std::collections::HashMap;
use std::time::Duration;

use reqwest::redirect::Policy;
use tracing::warn;

use tunnel_protocol::codec::{decode_body, encode_body, status_is_bodyless};
use tunnel_protocol::{HttpRequestData, HttpResponseData, LocalServiceStatus};

use crate::config::AgentServiceConfig;
use crate::error::AgentError;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Headers that must never be forwarded verbatim: the destination host
/// differs from the tunnel's public host, and reqwest recomputes
/// content-length from the body it sends.
const HOP_BY_HOP_REQUEST_HEADERS: [&str; 2] = ["host", "content-length"];

/// Finds the first configured service whose `/subdomain_or_path` prefixes
/// `path`, returning it along with the localized remainder (spec §4.10:
/// "the first whose `/subdomainOrPath` is a prefix of the incoming request
/// path matches... the localized path is the remainder, or `/` if the
/// remainder is empty").
pub fn route<'a>(services: &'a [AgentServiceConfig], path: &str) -> Option<(&'a AgentServiceConfig, String)> {
    services.iter().find_map(|svc| {
        let prefix = format!("/{}", svc.subdomain_or_path);
        let remainder = path.strip_prefix(&prefix)?;
        if remainder.is_empty() {
            Some((svc, "/".to_string()))
        } else if remainder.starts_with('/') {
            Some((svc, remainder.to_string()))
        } else {
            // Prefix matched a partial segment, e.g. "/web" vs "/webhook".
            None
        }
    })
}

/// Executes one `httpRequest` against a local service, or returns a
/// synthetic 404 response when no service matches the path (spec §4.10:
/// "No service matched → return 404... makes no outbound HTTP call").
pub async fn execute(client: &reqwest::Client, services: &[AgentServiceConfig], data: HttpRequestData) -> HttpResponseData {
    let Some((service, localized_path)) = route(services, &data.path) else {
        return HttpResponseData {
            status: 404,
            headers: HashMap::new(),
            body: Some("Target service not found for the given path.".to_string()),
            body_is_base64: false,
        };
    };

    dispatch_to_local_service(client, service, &localized_path, data).await
}

async fn dispatch_to_local_service(
    client: &reqwest::Client,
    service: &AgentServiceConfig,
    localized_path: &str,
    data: HttpRequestData,
) -> HttpResponseData {
    let url = format!("http://{}:{}{}", service.local_host, service.local_port, localized_path);
    let method = match data.method.parse::<reqwest::Method>() {
        Ok(m) => m,
        Err(_) => return bad_gateway(format!("unsupported method '{}'", data.method)),
    };

    let body_bytes = decode_body(data.body.as_deref(), data.body_is_base64);

    let mut request = client.request(method, &url);
    for (name, value) in &data.headers {
        if HOP_BY_HOP_REQUEST_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        request = request.header(name, value);
    }
    if !body_bytes.is_empty() {
        request = request.body(body_bytes);
    }

    match request.send().await {
        Ok(response) => wire_response(response).await,
        Err(e) if e.is_connect() => {
            let err = AgentError::LocalServiceUnreachable(e.to_string());
            warn!(error = %err, %url, "local dispatch failed");
            HttpResponseData {
                status: 503,
                headers: HashMap::new(),
                body: Some(err.to_string()),
                body_is_base64: false,
            }
        }
        Err(e) => {
            warn!(error = %e, %url, "local dispatch failed");
            bad_gateway(e.to_string())
        }
    }
}

async fn wire_response(response: reqwest::Response) -> HttpResponseData {
    let status = response.status().as_u16();
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.to_string(), v.to_string());
        }
    }
    let content_type = headers.get("content-type").cloned();

    if status_is_bodyless(status) {
        return HttpResponseData {
            status,
            headers,
            body: None,
            body_is_base64: false,
        };
    }

    let bytes = response.bytes().await.unwrap_or_default();
    let (body, body_is_base64) = encode_body(&bytes, content_type.as_deref());
    HttpResponseData {
        status,
        headers,
        body,
        body_is_base64,
    }
}

fn bad_gateway(detail: String) -> HttpResponseData {
    HttpResponseData {
        status: 502,
        headers: HashMap::new(),
        body: Some(detail),
        body_is_base64: false,
    }
}

/// Answers a health ping: HEAD the first configured HTTP service with a
/// 3s timeout (spec §4.10 "Health handler").
pub async fn check_health(client: &reqwest::Client, services: &[AgentServiceConfig]) -> LocalServiceStatus {
    let Some(service) = services.iter().find(|s| s.is_http()) else {
        return LocalServiceStatus::Unconfigured;
    };
    let url = format!("http://{}:{}/", service.local_host, service.local_port);

    match client.head(&url).timeout(HEALTH_CHECK_TIMEOUT).send().await {
        Ok(response) if response.status().as_u16() < 500 => LocalServiceStatus::Ok,
        Ok(_) => LocalServiceStatus::Error,
        Err(e) if e.is_timeout() => LocalServiceStatus::Timeout,
        Err(_) => LocalServiceStatus::Error,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .expect("reqwest client configuration is static and always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str, path: &str) -> AgentServiceConfig {
        AgentServiceConfig {
            id: id.to_string(),
            name: id.to_string(),
            service_type: "http".to_string(),
            local_host: "127.0.0.1".to_string(),
            local_port: 3000,
            subdomain_or_path: path.to_string(),
        }
    }

    #[test]
    fn matches_exact_prefix_with_empty_remainder() {
        let services = vec![service("a", "web")];
        let (svc, path) = route(&services, "/web").unwrap();
        assert_eq!(svc.id, "a");
        assert_eq!(path, "/");
    }

    #[test]
    fn matches_prefix_with_remainder() {
        let services = vec![service("a", "web")];
        let (_, path) = route(&services, "/web/hello").unwrap();
        assert_eq!(path, "/hello");
    }

    #[test]
    fn rejects_partial_segment_match() {
        let services = vec![service("a", "web")];
        assert!(route(&services, "/webhook").is_none());
    }

    #[test]
    fn first_matching_service_in_order_wins() {
        let services = vec![service("a", "api"), service("b", "api/v2")];
        let (svc, _) = route(&services, "/api/v2/users").unwrap();
        assert_eq!(svc.id, "a");
    }

    #[test]
    fn no_match_returns_none() {
        let services = vec![service("a", "web")];
        assert!(route(&services, "/other").is_none());
    }
}
