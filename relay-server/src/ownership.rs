//! # Ownership Registry (C2)
//!
//! In-process map `tunnelId → owningInstanceId`, updated from bus activity
//! events (spec §3 OwnershipEntry, §4.2). Eventually consistent across the
//! fleet: consumers must tolerate stale positives and transient negatives.

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct OwnershipRegistry {
    owners: DashMap<String, String>,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self {
            owners: DashMap::new(),
        }
    }

    /// Unconditional overwrite — the instance that most recently reported
    /// `connected` wins.
    pub fn set(&self, tunnel_id: &str, instance_id: &str) {
        self.owners.insert(tunnel_id.to_string(), instance_id.to_string());
    }

    /// Removes the mapping only if `reporter_instance_id` matches the
    /// currently-recorded owner. This is the stale-disconnect guard (spec
    /// §4.2): an agent that reconnected to instance B must not have its new
    /// ownership erased by instance A's late `disconnected` event.
    pub fn remove_if_owned_by(&self, tunnel_id: &str, reporter_instance_id: &str) {
        if let Some(entry) = self.owners.get(tunnel_id) {
            if entry.value() != reporter_instance_id {
                return;
            }
        } else {
            return;
        }
        self.owners
            .remove_if(tunnel_id, |_, owner| owner == reporter_instance_id);
    }

    pub fn get(&self, tunnel_id: &str) -> Option<String> {
        self.owners.get(tunnel_id).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_unconditionally() {
        let reg = OwnershipRegistry::new();
        reg.set("T", "A");
        reg.set("T", "B");
        assert_eq!(reg.get("T").as_deref(), Some("B"));
    }

    #[test]
    fn stale_disconnect_guard_ignores_mismatched_reporter() {
        // connected,T,A -> connected,T,B -> disconnected,T,A
        let reg = OwnershipRegistry::new();
        reg.set("T", "A");
        reg.set("T", "B");
        reg.remove_if_owned_by("T", "A");
        assert_eq!(reg.get("T").as_deref(), Some("B"));
    }

    #[test]
    fn disconnect_from_current_owner_removes_entry() {
        let reg = OwnershipRegistry::new();
        reg.set("T", "A");
        reg.remove_if_owned_by("T", "A");
        assert_eq!(reg.get("T"), None);
    }

    #[test]
    fn missing_tunnel_lookup_is_none() {
        let reg = OwnershipRegistry::new();
        assert_eq!(reg.get("unknown"), None);
    }
}
