//! # Runtime configuration
//!
//! The teacher hardcodes its bind address and has nothing else to
//! configure. This relay has more moving parts (deployment name, the
//! optional fleet bus, where tunnel state lives, which keys are valid) so
//! they're read from the environment once at startup, the way the
//! teacher's own `RUST_LOG` override works — no config-file crate, since
//! nothing here calls for layered/file-based config.

use std::env;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub public_base_url: String,
    pub deployment_name: String,
    pub redis_url: Option<String>,
    pub persistence_path: String,
    pub api_keys: String,
}

impl RelayConfig {
    /// Reads configuration from the environment, falling back to
    /// single-instance-friendly defaults for everything but the API keys.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("RELAY_BIND_ADDR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 7070))),
            public_base_url: env::var("RELAY_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:7070".to_string()),
            deployment_name: env::var("RELAY_DEPLOYMENT_NAME").unwrap_or_else(|_| "default".to_string()),
            redis_url: env::var("RELAY_REDIS_URL").ok(),
            persistence_path: env::var("RELAY_DATA_DIR").unwrap_or_else(|_| "./data/relay.sled".to_string()),
            api_keys: env::var("RELAY_API_KEYS").unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_single_instance_friendly() {
        // SAFETY for tests: no other test in this process mutates these keys.
        for key in [
            "RELAY_BIND_ADDR",
            "RELAY_PUBLIC_BASE_URL",
            "RELAY_DEPLOYMENT_NAME",
            "RELAY_REDIS_URL",
            "RELAY_DATA_DIR",
            "RELAY_API_KEYS",
        ] {
            env::remove_var(key);
        }
        let cfg = RelayConfig::from_env();
        assert_eq!(cfg.deployment_name, "default");
        assert!(cfg.redis_url.is_none());
    }
}
