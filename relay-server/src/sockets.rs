//! # Active-Socket Table (C4)
//!
//! Thread-safe map from `tunnelId` to the live control connection on this
//! instance. Inserted when register/reconnect completes; removed on close
//! or error. Lookup only returns a connection whose outbound channel is
//! still open — the send side closes as soon as the WebSocket's outbound
//! task exits, so "open" is simply "the channel hasn't hung up yet".

use dashmap::DashMap;
use tokio::sync::mpsc;
use tunnel_protocol::ControlMessage;

pub type ControlTx = mpsc::UnboundedSender<ControlMessage>;

#[derive(Debug, Clone)]
pub struct ControlConnection {
    pub tunnel_id: String,
    pub api_key: String,
    pub tx: ControlTx,
}

impl ControlConnection {
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
pub struct ActiveSocketTable {
    sockets: DashMap<String, ControlConnection>,
}

impl ActiveSocketTable {
    pub fn new() -> Self {
        Self {
            sockets: DashMap::new(),
        }
    }

    pub fn insert(&self, conn: ControlConnection) {
        self.sockets.insert(conn.tunnel_id.clone(), conn);
    }

    pub fn remove(&self, tunnel_id: &str) {
        self.sockets.remove(tunnel_id);
    }

    /// Returns the live connection for `tunnel_id`, or `None` if absent or
    /// its transport has already gone away.
    pub fn get_open(&self, tunnel_id: &str) -> Option<ControlConnection> {
        self.sockets.get(tunnel_id).and_then(|entry| {
            let conn = entry.value().clone();
            conn.is_open().then_some(conn)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hides_closed_transport() {
        let table = ActiveSocketTable::new();
        let (tx, rx) = mpsc::unbounded_channel();
        table.insert(ControlConnection {
            tunnel_id: "T".into(),
            api_key: "k".into(),
            tx,
        });
        assert!(table.get_open("T").is_some());
        drop(rx);
        assert!(table.get_open("T").is_none());
    }

    #[test]
    fn remove_clears_entry() {
        let table = ActiveSocketTable::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.insert(ControlConnection {
            tunnel_id: "T".into(),
            api_key: "k".into(),
            tx,
        });
        table.remove("T");
        assert!(table.get_open("T").is_none());
    }
}
