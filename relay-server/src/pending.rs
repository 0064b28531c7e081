//! # Pending-Request Registries (C3, C5, and the health-check counterpart)
//!
//! Two shapes recur throughout the relay (spec §3):
//!
//! - A **simple** pending entry: one instance registered a wait and wants
//!   exactly one resolve-or-reject-or-timeout. This is the
//!   Pending-Forwarded Registry (C3) — keyed by `jobId`, used for both HTTP
//!   forwarding and forwarded health checks.
//! - A **dual** pending entry: either `local` (something on this instance
//!   is waiting directly) or `forwarded` (a peer instance is waiting, and
//!   this instance's job is to relay the eventual answer back over the
//!   bus). This is the Pending-Agent Registry (C5) and its health-check
//!   analogue — keyed by `agentReqId`/`healthCheckJobId`.
//!
//! Both shapes guarantee "at most one" resolution (spec §8): `DashMap::remove`
//! is the single atomic gate, so whichever of resolve/reject/timeout gets
//! there first wins and everyone else finds nothing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

/// Default timeouts named in spec §5.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const LOCAL_PING_TIMEOUT: Duration = Duration::from_secs(10);
pub const FORWARDED_HEALTH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub enum PendingOutcome<T> {
    Resolved(T),
    Rejected(String),
}

/// C3: one pending entry per in-flight cross-instance job.
#[derive(Debug)]
pub struct PendingRegistry<T: Send + 'static> {
    entries: Arc<DashMap<String, oneshot::Sender<PendingOutcome<T>>>>,
}

impl<T: Send + 'static> Default for PendingRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> PendingRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Registers a wait and arms a timer that rejects with a timeout error
    /// if nobody resolves or rejects first.
    pub fn register(&self, key: impl Into<String>, timeout: Duration) -> oneshot::Receiver<PendingOutcome<T>> {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        self.entries.insert(key.clone(), tx);

        let entries = self.entries.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, tx)) = entries.remove(&key) {
                let _ = tx.send(PendingOutcome::Rejected("timed out".to_string()));
            }
        });

        rx
    }

    pub fn resolve(&self, key: &str, value: T) -> bool {
        match self.entries.remove(key) {
            Some((_, tx)) => {
                let _ = tx.send(PendingOutcome::Resolved(value));
                true
            }
            None => false,
        }
    }

    pub fn reject(&self, key: &str, reason: impl Into<String>) -> bool {
        match self.entries.remove(key) {
            Some((_, tx)) => {
                let _ = tx.send(PendingOutcome::Rejected(reason.into()));
                true
            }
            None => false,
        }
    }
}

/// Where a `forwarded` dual entry should send its eventual answer: back to
/// the instance (and job) that is actually waiting on it.
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    pub origin_job_id: String,
    pub origin_instance_id: String,
}

#[derive(Debug)]
enum DualEntry<T: Send + 'static> {
    Local(oneshot::Sender<PendingOutcome<T>>),
    Forwarded(ForwardTarget),
}

/// What happened when a dual registry's entry was resolved.
pub enum ResolveOutcome {
    /// A local waiter was resolved directly; nothing further to do.
    Local,
    /// The answer must be relayed back to a peer instance.
    Forwarded(ForwardTarget),
    /// No entry was found for this key (already resolved, rejected, or
    /// timed out, or it never existed) — spec's at-most-once guarantee.
    NotFound,
}

/// C5 / the health-check analogue: an entry is either `local` (resolved by
/// a oneshot the caller awaits) or `forwarded` (resolved by handing the
/// caller a [`ForwardTarget`] to publish a broadcast reply to).
#[derive(Debug)]
pub struct DualPendingRegistry<T: Send + 'static> {
    entries: Arc<DashMap<String, DualEntry<T>>>,
}

impl<T: Send + 'static> Default for DualPendingRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> DualPendingRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Registers a local wait, armed with a timeout.
    pub fn register_local(&self, key: impl Into<String>, timeout: Duration) -> oneshot::Receiver<PendingOutcome<T>> {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        self.entries.insert(key.clone(), DualEntry::Local(tx));

        let entries = self.entries.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, DualEntry::Local(tx))) = entries.remove(&key) {
                let _ = tx.send(PendingOutcome::Rejected("timed out".to_string()));
            }
        });

        rx
    }

    /// Registers a forwarded wait on behalf of a peer instance. Armed with a
    /// housekeeping timeout so an agent that never answers doesn't leak the
    /// entry forever; the peer's own [`PendingRegistry`] timeout is what
    /// actually governs client-visible latency.
    pub fn register_forwarded(&self, key: impl Into<String>, target: ForwardTarget, timeout: Duration) {
        let key = key.into();
        self.entries.insert(key.clone(), DualEntry::Forwarded(target));

        let entries = self.entries.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            entries.remove(&key);
        });
    }

    pub fn resolve(&self, key: &str, value: T) -> ResolveOutcome {
        match self.entries.remove(key) {
            Some((_, DualEntry::Local(tx))) => {
                let _ = tx.send(PendingOutcome::Resolved(value));
                ResolveOutcome::Local
            }
            Some((_, DualEntry::Forwarded(target))) => ResolveOutcome::Forwarded(target),
            None => ResolveOutcome::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_wins_the_at_most_once_race() {
        let reg: PendingRegistry<u32> = PendingRegistry::new();
        let rx = reg.register("job", Duration::from_secs(5));
        assert!(reg.resolve("job", 7));
        // Second resolve finds nothing: entry was already removed.
        assert!(!reg.resolve("job", 9));
        match rx.await.unwrap() {
            PendingOutcome::Resolved(v) => assert_eq!(v, 7),
            PendingOutcome::Rejected(_) => panic!("expected resolved"),
        }
    }

    #[tokio::test]
    async fn unmatched_reject_is_a_no_op() {
        let reg: PendingRegistry<u32> = PendingRegistry::new();
        assert!(!reg.reject("missing", "nope"));
    }

    #[tokio::test]
    async fn timeout_rejects_within_bound() {
        let reg: PendingRegistry<u32> = PendingRegistry::new();
        let rx = reg.register("job", Duration::from_millis(20));
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, PendingOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn dual_registry_local_resolves_directly() {
        let reg: DualPendingRegistry<u32> = DualPendingRegistry::new();
        let rx = reg.register_local("req", Duration::from_secs(5));
        let outcome = reg.resolve("req", 42);
        assert!(matches!(outcome, ResolveOutcome::Local));
        match rx.await.unwrap() {
            PendingOutcome::Resolved(v) => assert_eq!(v, 42),
            _ => panic!("expected resolved"),
        }
    }

    #[tokio::test]
    async fn dual_registry_forwarded_hands_back_target() {
        let reg: DualPendingRegistry<u32> = DualPendingRegistry::new();
        reg.register_forwarded(
            "req",
            ForwardTarget {
                origin_job_id: "J1".into(),
                origin_instance_id: "B".into(),
            },
            Duration::from_secs(5),
        );
        match reg.resolve("req", 1) {
            ResolveOutcome::Forwarded(target) => {
                assert_eq!(target.origin_job_id, "J1");
                assert_eq!(target.origin_instance_id, "B");
            }
            _ => panic!("expected forwarded"),
        }
        // Already consumed: second resolve is a no-op.
        assert!(matches!(reg.resolve("req", 2), ResolveOutcome::NotFound));
    }
}
