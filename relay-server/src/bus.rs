//! # Broadcast Bus (C1)
//!
//! Five named channels, visible to every relay instance in a deployment
//! (spec §4.1). Delivery is best-effort, in-order per publisher, with no
//! persistence — failures manifest downstream as timeouts, never as a
//! surfaced bus error.
//!
//! Two implementations:
//! - [`RedisBus`] — the fleet-wide substrate, backed by Redis pub/sub.
//! - [`LocalBus`] — an in-process stand-in. For a genuinely single-instance
//!   deployment this is a no-op in effect: a publisher is never also a
//!   target of its own message (spec §4.1: "If the deployment is
//!   single-instance the bus may be a trivial in-process no-op"), and it
//!   doubles as the test double for multi-"instance" unit tests.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tunnel_protocol::bus::{parse_on_channel, Channel};
use tunnel_protocol::BroadcastMessage;

use crate::error::RelayError;

#[async_trait]
pub trait BroadcastBus: Send + Sync {
    /// Publishes a message. Never delivered back to its own publisher.
    async fn publish(&self, msg: BroadcastMessage) -> Result<(), RelayError>;

    /// Starts delivering messages addressed to `self_instance_id` (or
    /// untargeted fleet-wide messages) to `tx`. Called once at startup.
    async fn start(&self, self_instance_id: String, tx: mpsc::UnboundedSender<BroadcastMessage>) -> Result<(), RelayError>;
}

/// Fleet-wide bus backed by Redis pub/sub.
pub struct RedisBus {
    deployment: String,
    client: redis::Client,
    publish_conn: redis::aio::ConnectionManager,
}

impl RedisBus {
    pub async fn connect(redis_url: &str, deployment: impl Into<String>) -> Result<Self, RelayError> {
        let client = redis::Client::open(redis_url).map_err(|e| RelayError::Bus(e.to_string()))?;
        let publish_conn = client
            .get_connection_manager()
            .await
            .map_err(|e| RelayError::Bus(e.to_string()))?;
        Ok(Self {
            deployment: deployment.into(),
            client,
            publish_conn,
        })
    }
}

#[async_trait]
impl BroadcastBus for RedisBus {
    async fn publish(&self, msg: BroadcastMessage) -> Result<(), RelayError> {
        let topic = msg.channel().topic(&self.deployment);
        let payload = serde_json::to_string(&msg).map_err(|e| RelayError::Bus(e.to_string()))?;
        let mut conn = self.publish_conn.clone();
        redis::cmd("PUBLISH")
            .arg(&topic)
            .arg(&payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| RelayError::Bus(e.to_string()))?;
        Ok(())
    }

    async fn start(&self, self_instance_id: String, tx: mpsc::UnboundedSender<BroadcastMessage>) -> Result<(), RelayError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RelayError::Bus(e.to_string()))?;
        for channel in Channel::ALL {
            pubsub
                .subscribe(channel.topic(&self.deployment))
                .await
                .map_err(|e| RelayError::Bus(e.to_string()))?;
        }

        let deployment = self.deployment.clone();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel_name = msg.get_channel_name().to_string();
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                let Some(channel) = Channel::ALL
                    .into_iter()
                    .find(|c| c.topic(&deployment) == channel_name)
                else {
                    tracing::warn!(channel_name, "broadcast message on unrecognized channel");
                    continue;
                };
                match parse_on_channel(channel, &payload) {
                    Ok(bmsg) if bmsg.is_for(&self_instance_id) => {
                        let _ = tx.send(bmsg);
                    }
                    Ok(_) => {}
                    Err(reason) => tracing::warn!(reason, "dropping malformed broadcast message"),
                }
            }
        });

        Ok(())
    }
}

/// In-process stand-in for deployments of a single relay instance, and for
/// tests that want to drive several "instances" against one shared channel.
pub struct LocalBus {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _rx) = broadcast::channel(1024);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastBus for LocalBus {
    async fn publish(&self, msg: BroadcastMessage) -> Result<(), RelayError> {
        // No subscribers is not an error: delivery is best-effort (spec §4.1).
        let _ = self.sender.send(msg);
        Ok(())
    }

    async fn start(&self, self_instance_id: String, tx: mpsc::UnboundedSender<BroadcastMessage>) -> Result<(), RelayError> {
        let mut rx = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) if msg.is_for(&self_instance_id) => {
                        let _ = tx.send(msg);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tunnel_protocol::bus::{BroadcastPayload, TunnelActivityKind};

    #[tokio::test]
    async fn local_bus_delivers_activity_to_all_but_publisher() {
        let bus = LocalBus::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        bus.start("A".into(), tx_a).await.unwrap();
        bus.start("B".into(), tx_b).await.unwrap();

        bus.publish(BroadcastMessage::new(
            "A",
            BroadcastPayload::TunnelActivity {
                tunnel_id: "T".into(),
                activity: TunnelActivityKind::Connected,
            },
        ))
        .await
        .unwrap();

        let received_b = tokio::time::timeout(Duration::from_millis(200), rx_b.recv())
            .await
            .unwrap();
        assert!(received_b.is_some());

        let received_a = tokio::time::timeout(Duration::from_millis(50), rx_a.recv()).await;
        assert!(received_a.is_err(), "publisher must not receive its own message");
    }

    #[tokio::test]
    async fn local_bus_respects_target_instance_id() {
        let bus = LocalBus::new();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        bus.start("B".into(), tx_b).await.unwrap();
        bus.start("C".into(), tx_c).await.unwrap();

        bus.publish(BroadcastMessage::new(
            "A",
            BroadcastPayload::ForwardHealthCheck {
                target_instance_id: "B".into(),
                tunnel_id: "T".into(),
                health_check_job_id: "H1".into(),
            },
        ))
        .await
        .unwrap();

        let received_b = tokio::time::timeout(Duration::from_millis(200), rx_b.recv())
            .await
            .unwrap();
        assert!(received_b.is_some());

        let received_c = tokio::time::timeout(Duration::from_millis(50), rx_c.recv()).await;
        assert!(received_c.is_err(), "non-target must not receive targeted message");
    }
}
