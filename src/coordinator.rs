//! Join Coordination
//!
//! Decides once per process how the node enters a cluster and carries that
//! decision out:
//! - an explicit join target is joined before startup continues
//! - a multicast group starts background discovery and startup moves on
//! - with neither, the node runs standalone

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use crate::cluster::{DiscoveryAgent, Membership};
use crate::error::NexaError;
use crate::types::{MulticastAddress, PeerAddress};

/// How this node enters a cluster. An explicit target wins over discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinMode {
    ExplicitJoin(PeerAddress),
    DiscoverJoin(MulticastAddress),
    Standalone,
}

impl JoinMode {
    pub fn select(
        join_address: Option<&str>,
        discover_address: Option<&str>,
    ) -> Result<Self, NexaError> {
        if let Some(join) = join_address {
            return Ok(JoinMode::ExplicitJoin(PeerAddress::parse(join)?));
        }
        if let Some(group) = discover_address {
            return Ok(JoinMode::DiscoverJoin(MulticastAddress::parse(group)?));
        }
        Ok(JoinMode::Standalone)
    }
}

/// Background discovery started by `DiscoverJoin`.
///
/// The task runs for the life of the process whether or not this handle is
/// kept; the handle only observes it.
pub struct DiscoveryTask {
    joined: watch::Receiver<Option<PeerAddress>>,
    handle: JoinHandle<()>,
}

impl DiscoveryTask {
    /// Peer the node joined through discovery. `None` until a join succeeds,
    /// and for good if the discovered peer could not be joined.
    pub fn joined_peer(&self) -> Option<PeerAddress> {
        self.joined.borrow().clone()
    }

    /// Waits up to `timeout` for the discovery join to complete.
    pub async fn wait(&mut self, timeout: Duration) -> Option<PeerAddress> {
        match time::timeout(timeout, self.joined.wait_for(Option::is_some)).await {
            Ok(Ok(peer)) => peer.clone(),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub struct JoinOutcome {
    pub mode: JoinMode,
    pub discovery: Option<DiscoveryTask>,
}

pub struct JoinCoordinator {
    membership: Arc<dyn Membership>,
    discovery: Arc<dyn DiscoveryAgent>,
    join_timeout: Option<Duration>,
}

impl JoinCoordinator {
    pub fn new(membership: Arc<dyn Membership>, discovery: Arc<dyn DiscoveryAgent>) -> Self {
        Self {
            membership,
            discovery,
            join_timeout: None,
        }
    }

    /// Bounds the explicit join call. Unbounded by default.
    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Carries out `mode`. `local` is the address this node advertises.
    pub async fn execute(&self, mode: JoinMode, local: &PeerAddress) -> JoinOutcome {
        let discovery = match &mode {
            JoinMode::ExplicitJoin(peer) => {
                self.join_explicit(peer).await;
                None
            }
            JoinMode::DiscoverJoin(group) => Some(self.start_discovery(local.clone(), *group)),
            JoinMode::Standalone => {
                info!("Standalone node, not joining any cluster");
                None
            }
        };
        JoinOutcome { mode, discovery }
    }

    async fn join_explicit(&self, peer: &PeerAddress) {
        info!(%peer, "Joining cluster");
        let join = self.membership.join(peer);
        let result = match self.join_timeout {
            Some(limit) => match time::timeout(limit, join).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(%peer, "Join did not complete within {:?}, continuing startup", limit);
                    return;
                }
            },
            None => join.await,
        };
        if let Err(e) = result {
            warn!(%peer, "Join failed: {}", e);
        }
    }

    fn start_discovery(&self, local: PeerAddress, group: MulticastAddress) -> DiscoveryTask {
        let found = self.discovery.start(local, group);
        let membership = Arc::clone(&self.membership);
        let (joined_tx, joined_rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            let Ok(peer) = found.await else {
                warn!(%group, "Discovery ended without finding a peer");
                return;
            };
            match membership.join(&peer).await {
                Ok(()) => {
                    let _ = joined_tx.send(Some(peer));
                }
                Err(e) => warn!(%peer, "Join after discovery failed: {}", e),
            }
        });

        DiscoveryTask {
            joined: joined_rx,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct RecordingMembership {
        joins: Mutex<Vec<PeerAddress>>,
        delay: Option<Duration>,
        refuse: bool,
    }

    #[async_trait]
    impl Membership for RecordingMembership {
        async fn join(&self, peer: &PeerAddress) -> Result<(), NexaError> {
            if let Some(delay) = self.delay {
                time::sleep(delay).await;
            }
            if self.refuse {
                return Err(NexaError::cluster(format!("{} refused the join", peer)));
            }
            self.joins.lock().unwrap().push(peer.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct ManualDiscovery {
        started: AtomicUsize,
        pending: Mutex<Vec<oneshot::Sender<PeerAddress>>>,
    }

    impl ManualDiscovery {
        fn fire(&self, peer: PeerAddress) {
            let tx = self.pending.lock().unwrap().pop().unwrap();
            tx.send(peer).unwrap();
        }
    }

    impl DiscoveryAgent for ManualDiscovery {
        fn start(
            &self,
            _local: PeerAddress,
            _group: MulticastAddress,
        ) -> oneshot::Receiver<PeerAddress> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().push(tx);
            rx
        }
    }

    fn local() -> PeerAddress {
        PeerAddress::parse("10.0.0.5:7000").unwrap()
    }

    fn setup(
        membership: RecordingMembership,
    ) -> (JoinCoordinator, Arc<RecordingMembership>, Arc<ManualDiscovery>) {
        let membership = Arc::new(membership);
        let discovery = Arc::new(ManualDiscovery::default());
        let coordinator = JoinCoordinator::new(membership.clone(), discovery.clone());
        (coordinator, membership, discovery)
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(JoinMode::select(None, None).unwrap(), JoinMode::Standalone);
        assert!(matches!(
            JoinMode::select(None, Some("239.0.0.1:9999")).unwrap(),
            JoinMode::DiscoverJoin(_)
        ));
        assert_eq!(
            JoinMode::select(Some("10.0.0.9:7000"), Some("239.0.0.1:9999")).unwrap(),
            JoinMode::ExplicitJoin(PeerAddress::parse("10.0.0.9:7000").unwrap())
        );
    }

    #[test]
    fn test_mode_selection_errors() {
        assert!(matches!(
            JoinMode::select(Some("not an address"), None),
            Err(NexaError::JoinAddressParse { .. })
        ));
        assert!(matches!(
            JoinMode::select(None, Some("239.0.0.1")),
            Err(NexaError::MulticastAddressParse { .. })
        ));
        // Explicit intent wins, so a bad discovery address is never looked at
        assert!(JoinMode::select(Some("10.0.0.9:7000"), Some("garbage")).is_ok());
    }

    #[tokio::test]
    async fn test_standalone_issues_no_join() {
        let (coordinator, membership, discovery) = setup(RecordingMembership::default());

        let outcome = coordinator.execute(JoinMode::Standalone, &local()).await;

        assert_eq!(outcome.mode, JoinMode::Standalone);
        assert!(outcome.discovery.is_none());
        assert!(membership.joins.lock().unwrap().is_empty());
        assert_eq!(discovery.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_explicit_join_completes_before_returning() {
        let (coordinator, membership, discovery) = setup(RecordingMembership {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let target = PeerAddress::parse("10.0.0.9:7000").unwrap();

        let mode = JoinMode::select(Some("10.0.0.9:7000"), Some("239.0.0.1:9999"))
            .unwrap();
        let outcome = coordinator.execute(mode, &local()).await;

        assert!(outcome.discovery.is_none());
        assert_eq!(*membership.joins.lock().unwrap(), vec![target]);
        assert_eq!(discovery.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_explicit_join_timeout_does_not_fail_startup() {
        let (coordinator, membership, _) = setup(RecordingMembership {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let coordinator = coordinator.with_join_timeout(Some(Duration::from_millis(20)));
        let target = PeerAddress::parse("10.0.0.9:7000").unwrap();

        let outcome = coordinator.execute(JoinMode::ExplicitJoin(target), &local()).await;

        assert!(matches!(outcome.mode, JoinMode::ExplicitJoin(_)));
        assert!(membership.joins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_does_not_block_startup() {
        let (coordinator, membership, discovery) = setup(RecordingMembership::default());
        let group = MulticastAddress::parse("239.0.0.1:9999").unwrap();

        let outcome = coordinator.execute(JoinMode::DiscoverJoin(group), &local()).await;
        let mut task = outcome.discovery.expect("discovery task");

        assert_eq!(discovery.started.load(Ordering::SeqCst), 1);
        assert_eq!(task.joined_peer(), None);
        assert_eq!(task.wait(Duration::from_millis(20)).await, None);
        assert!(membership.joins.lock().unwrap().is_empty());

        let found = PeerAddress::parse("nexa://10.0.0.7:7000/b").unwrap();
        discovery.fire(found.clone());

        assert_eq!(task.wait(Duration::from_secs(1)).await, Some(found.clone()));
        assert_eq!(task.joined_peer(), Some(found.clone()));
        assert_eq!(*membership.joins.lock().unwrap(), vec![found]);
    }

    #[tokio::test]
    async fn test_discovery_without_peer_joins_nothing() {
        let (coordinator, membership, discovery) = setup(RecordingMembership::default());
        let group = MulticastAddress::parse("239.0.0.1:9999").unwrap();

        let outcome = coordinator.execute(JoinMode::DiscoverJoin(group), &local()).await;
        let task = outcome.discovery.expect("discovery task");

        // Dropping the sender ends discovery without a result
        discovery.pending.lock().unwrap().clear();
        for _ in 0..100 {
            if task.is_finished() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }

        assert!(task.is_finished());
        assert_eq!(task.joined_peer(), None);
        assert!(membership.joins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_discovery_join_is_not_reported_as_joined() {
        let (coordinator, membership, discovery) = setup(RecordingMembership {
            refuse: true,
            ..Default::default()
        });
        let group = MulticastAddress::parse("239.0.0.1:9999").unwrap();

        let outcome = coordinator.execute(JoinMode::DiscoverJoin(group), &local()).await;
        let mut task = outcome.discovery.expect("discovery task");

        discovery.fire(PeerAddress::parse("nexa://10.0.0.7:7000/b").unwrap());
        for _ in 0..100 {
            if task.is_finished() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }

        assert!(task.is_finished());
        assert_eq!(task.joined_peer(), None);
        assert_eq!(task.wait(Duration::from_millis(20)).await, None);
        assert!(membership.joins.lock().unwrap().is_empty());
    }
}
