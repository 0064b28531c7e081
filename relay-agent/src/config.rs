//! # Agent configuration (spec §4.10, §6 "Agent environment")
//!
//! Read once at startup from the environment: an enable flag, the relay
//! WebSocket URL, the API key, and a JSON array of service configurations.
//! The teacher hardcodes its relay URL into the UI's settings store; this
//! headless agent has no UI, so the same information comes from
//! `std::env`, matching `relay-server::config`'s level of ceremony.

use std::env;

use serde::Deserialize;

/// One local service this agent exposes under a tunnel (spec §4.10).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentServiceConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub local_host: String,
    pub local_port: u16,
    pub subdomain_or_path: String,
}

impl AgentServiceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.subdomain_or_path.contains('/') || self.subdomain_or_path.contains(char::is_whitespace) {
            return Err(format!(
                "service '{}': subdomain_or_path must not contain '/' or whitespace",
                self.id
            ));
        }
        Ok(())
    }

    pub fn is_http(&self) -> bool {
        self.service_type.eq_ignore_ascii_case("http")
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub enabled: bool,
    pub relay_url: String,
    pub api_key: String,
    pub services: Vec<AgentServiceConfig>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, String> {
        let enabled = env::var("AGENT_ENABLED").map(|v| v != "0" && v != "false").unwrap_or(true);
        let relay_url = env::var("AGENT_RELAY_URL").map_err(|_| "AGENT_RELAY_URL is not set".to_string())?;
        if !relay_url.starts_with("ws://") && !relay_url.starts_with("wss://") {
            return Err("AGENT_RELAY_URL must begin with ws:// or wss://".to_string());
        }
        let api_key = env::var("AGENT_API_KEY").map_err(|_| "AGENT_API_KEY is not set".to_string())?;
        let services_json = env::var("AGENT_SERVICES").unwrap_or_else(|_| "[]".to_string());
        let services: Vec<AgentServiceConfig> =
            serde_json::from_str(&services_json).map_err(|e| format!("AGENT_SERVICES is not valid JSON: {e}"))?;
        for svc in &services {
            svc.validate()?;
        }

        Ok(Self {
            enabled,
            relay_url,
            api_key,
            services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_with_slash() {
        let svc = AgentServiceConfig {
            id: "a".into(),
            name: "a".into(),
            service_type: "http".into(),
            local_host: "127.0.0.1".into(),
            local_port: 3000,
            subdomain_or_path: "a/b".into(),
        };
        assert!(svc.validate().is_err());
    }

    #[test]
    fn is_http_is_case_insensitive() {
        let svc = AgentServiceConfig {
            id: "a".into(),
            name: "a".into(),
            service_type: "HTTP".into(),
            local_host: "127.0.0.1".into(),
            local_port: 3000,
            subdomain_or_path: "web".into(),
        };
        assert!(svc.is_http());
    }
}
