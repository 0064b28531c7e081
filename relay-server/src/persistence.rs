//! # Persistence Adapter (C11)
//!
//! CRUD for `TunnelRegistration` records, backed by an embedded `sled`
//! database. `save_tunnel` is the one operation spec §4.11 calls out as
//! needing an atomic multi-write — it keeps the primary record and the two
//! secondary indices (`by_api_key`, `by_agent_id`) coherent, using sled's
//! `Tree::transaction` across all three trees.
//!
//! This component has no counterpart in the teacher repo (the teacher's
//! tunnels live only in `DashMap`s and vanish on process exit); it is a
//! supplemental module required by spec §3/§4.11's `TunnelRegistration`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use tunnel_protocol::ServiceConfig;

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelRegistrationStatus {
    Pending,
    Connected,
    Disconnected,
}

/// A persisted tunnel registration (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelRegistration {
    pub tunnel_id: String,
    pub api_key: String,
    /// Equal to `api_key` in the current design (spec §3).
    pub agent_id: String,
    pub services: Vec<ServiceConfig>,
    pub created_at: String,
    pub status: TunnelRegistrationStatus,
}

impl TunnelRegistration {
    pub fn new(tunnel_id: String, api_key: String, services: Vec<ServiceConfig>) -> Self {
        Self {
            tunnel_id,
            agent_id: api_key.clone(),
            api_key,
            services,
            created_at: Utc::now().to_rfc3339(),
            status: TunnelRegistrationStatus::Connected,
        }
    }
}

pub struct PersistenceAdapter {
    tunnels: sled::Tree,
    by_api_key: sled::Tree,
    by_agent_id: sled::Tree,
}

impl PersistenceAdapter {
    pub fn open(db: &sled::Db) -> Result<Self, RelayError> {
        let tunnels = db
            .open_tree("tunnels")
            .map_err(|e| RelayError::Persistence(e.to_string()))?;
        let by_api_key = db
            .open_tree("tunnels_by_api_key")
            .map_err(|e| RelayError::Persistence(e.to_string()))?;
        let by_agent_id = db
            .open_tree("tunnels_by_agent_id")
            .map_err(|e| RelayError::Persistence(e.to_string()))?;
        Ok(Self {
            tunnels,
            by_api_key,
            by_agent_id,
        })
    }

    /// In-memory adapter for tests: a fresh temporary sled database.
    #[cfg(test)]
    pub fn open_temporary() -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Self::open(&db).unwrap()
    }

    pub fn save_tunnel(&self, reg: &TunnelRegistration) -> Result<(), RelayError> {
        let payload = serde_json::to_vec(reg).map_err(|e| RelayError::Persistence(e.to_string()))?;
        let tunnel_id = reg.tunnel_id.clone();
        let api_key = reg.api_key.clone();
        let agent_id = reg.agent_id.clone();

        (&self.tunnels, &self.by_api_key, &self.by_agent_id)
            .transaction(move |(tunnels, by_api_key, by_agent_id)| {
                tunnels.insert(tunnel_id.as_bytes(), payload.clone())?;
                by_api_key.insert(api_key.as_bytes(), tunnel_id.as_bytes())?;
                by_agent_id.insert(agent_id.as_bytes(), tunnel_id.as_bytes())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| RelayError::Persistence(format!("{:?}", e)))?;
        Ok(())
    }

    pub fn get_tunnel(&self, tunnel_id: &str) -> Result<Option<TunnelRegistration>, RelayError> {
        match self
            .tunnels
            .get(tunnel_id.as_bytes())
            .map_err(|e| RelayError::Persistence(e.to_string()))?
        {
            Some(bytes) => {
                let reg = serde_json::from_slice(&bytes).map_err(|e| RelayError::Persistence(e.to_string()))?;
                Ok(Some(reg))
            }
            None => Ok(None),
        }
    }

    pub fn update_tunnel_status(&self, tunnel_id: &str, status: TunnelRegistrationStatus) -> Result<(), RelayError> {
        let Some(mut reg) = self.get_tunnel(tunnel_id)? else {
            return Ok(());
        };
        reg.status = status;
        let payload = serde_json::to_vec(&reg).map_err(|e| RelayError::Persistence(e.to_string()))?;
        self.tunnels
            .insert(tunnel_id.as_bytes(), payload)
            .map_err(|e| RelayError::Persistence(e.to_string()))?;
        Ok(())
    }

    pub fn delete_tunnel(&self, tunnel_id: &str) -> Result<(), RelayError> {
        let Some(reg) = self.get_tunnel(tunnel_id)? else {
            return Ok(());
        };
        let api_key = reg.api_key.clone();
        let agent_id = reg.agent_id.clone();
        let tunnel_id = reg.tunnel_id.clone();

        (&self.tunnels, &self.by_api_key, &self.by_agent_id)
            .transaction(move |(tunnels, by_api_key, by_agent_id)| {
                tunnels.remove(tunnel_id.as_bytes())?;
                by_api_key.remove(api_key.as_bytes())?;
                by_agent_id.remove(agent_id.as_bytes())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| RelayError::Persistence(format!("{:?}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_protocol::{ServiceConfig, ServiceType};

    fn sample_registration(tunnel_id: &str) -> TunnelRegistration {
        TunnelRegistration::new(
            tunnel_id.to_string(),
            "key-1".to_string(),
            vec![ServiceConfig {
                service_type: ServiceType::Http,
                local_port: 3000,
                subdomain_or_path: "web".to_string(),
            }],
        )
    }

    #[test]
    fn save_then_get_round_trips() {
        let adapter = PersistenceAdapter::open_temporary();
        let reg = sample_registration("T1");
        adapter.save_tunnel(&reg).unwrap();
        let loaded = adapter.get_tunnel("T1").unwrap().unwrap();
        assert_eq!(loaded.tunnel_id, "T1");
        assert_eq!(loaded.api_key, "key-1");
        assert_eq!(loaded.status, TunnelRegistrationStatus::Connected);
    }

    #[test]
    fn missing_tunnel_is_none() {
        let adapter = PersistenceAdapter::open_temporary();
        assert!(adapter.get_tunnel("nope").unwrap().is_none());
    }

    #[test]
    fn update_status_persists() {
        let adapter = PersistenceAdapter::open_temporary();
        let reg = sample_registration("T1");
        adapter.save_tunnel(&reg).unwrap();
        adapter
            .update_tunnel_status("T1", TunnelRegistrationStatus::Disconnected)
            .unwrap();
        let loaded = adapter.get_tunnel("T1").unwrap().unwrap();
        assert_eq!(loaded.status, TunnelRegistrationStatus::Disconnected);
    }

    #[test]
    fn delete_removes_primary_and_indices() {
        let adapter = PersistenceAdapter::open_temporary();
        let reg = sample_registration("T1");
        adapter.save_tunnel(&reg).unwrap();
        adapter.delete_tunnel("T1").unwrap();
        assert!(adapter.get_tunnel("T1").unwrap().is_none());
        assert!(adapter.by_api_key.get("key-1").unwrap().is_none());
        assert!(adapter.by_agent_id.get("key-1").unwrap().is_none());
    }
}
