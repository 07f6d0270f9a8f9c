use crate::{
    AnycastPayload, LocalTransport, OverlayConfig, OverlayError, PeerHandle, PeerSnapshot,
    PublishProxy, PutGetProxy, SubscribeProxy, Transport,
};
use dashmap::DashMap;
use quadcloud_can::{Coordinate, KeyValidator, PeerId, RoutingKey};
use quadcloud_storage::MemQuadStore;
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A network of peers running in this process, connected by a [LocalTransport].
///
/// Every peer stores its quadruples in a [MemQuadStore].
///
/// Usage example:
/// ```
/// use quadcloud::model::*;
/// use quadcloud::{Network, OverlayConfig, QueryResult};
///
/// # tokio_test::block_on(async {
/// let network = Network::bootstrap(OverlayConfig::semantic()).await?;
/// network.add_peer().await?;
///
/// // insertion
/// let ex = NamedNode::new("http://example.com")?;
/// let quad = Quad::new(ex.clone(), ex.clone(), ex.clone(), ex.clone());
/// network.put_get_proxy()?.add(quad).await?;
///
/// // SPARQL query
/// let response = network
///     .put_get_proxy()?
///     .execute_sparql("ASK { GRAPH <http://example.com> { ?s ?p ?o } }")
///     .await?;
/// assert_eq!(response.result, QueryResult::Ask(true));
/// network.shutdown();
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct Network {
    config: Arc<OverlayConfig>,
    transport: Arc<LocalTransport>,
    peers: DashMap<PeerId, PeerHandle, BuildHasherDefault<FxHasher>>,
}

impl Network {
    /// Starts a network that consists of a single peer owning the whole space.
    pub async fn bootstrap(config: OverlayConfig) -> Result<Self, OverlayError> {
        config.validate()?;
        let network = Self {
            config: Arc::new(config),
            transport: Arc::new(LocalTransport::new()),
            peers: DashMap::default(),
        };
        let peer = network.spawn_peer();
        peer.bootstrap().await?;
        info!("Bootstrapped network with peer {}", peer.id());
        network.peers.insert(peer.id(), peer);
        Ok(network)
    }

    pub fn config(&self) -> &Arc<OverlayConfig> {
        &self.config
    }

    /// Adds a peer that joins at a random point of the space.
    pub async fn add_peer(&self) -> Result<PeerId, OverlayError> {
        self.join(None).await
    }

    /// Adds a peer that splits the zone containing `target`.
    pub async fn add_peer_at(&self, target: Coordinate) -> Result<PeerId, OverlayError> {
        self.join(Some(target)).await
    }

    /// Makes `peer` leave the network gracefully.
    pub async fn remove_peer(&self, peer: PeerId) -> Result<(), OverlayError> {
        let handle = self.handle(peer)?;
        handle.leave().await?;
        self.peers.remove(&peer);
        Ok(())
    }

    /// Stops `peer` without telling anyone. Its neighbors repair the overlay once they notice.
    pub fn crash_peer(&self, peer: PeerId) -> bool {
        if self.peers.remove(&peer).is_none() {
            return false;
        }
        warn!("Crashing peer {peer}");
        self.transport.unregister(peer);
        true
    }

    /// The identifiers of the peers, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers = self
            .peers
            .iter()
            .map(|entry| *entry.key())
            .collect::<Vec<_>>();
        peers.sort_unstable();
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn handle(&self, peer: PeerId) -> Result<PeerHandle, OverlayError> {
        self.peers
            .get(&peer)
            .map(|entry| entry.value().clone())
            .ok_or(OverlayError::PeerNotActivated(peer))
    }

    /// The state of every peer, sorted by identifier.
    pub async fn snapshots(&self) -> Result<Vec<PeerSnapshot>, OverlayError> {
        let mut snapshots = Vec::with_capacity(self.peers.len());
        for handle in self.handles() {
            snapshots.push(handle.snapshot().await?);
        }
        snapshots.sort_unstable_by_key(|snapshot| snapshot.id);
        Ok(snapshots)
    }

    /// Runs one maintenance round on every peer, one after the other.
    pub async fn maintain(&self) -> Result<(), OverlayError> {
        for handle in self.handles() {
            handle.maintain().await?;
        }
        Ok(())
    }

    /// Returns the peers whose zone contains `key`.
    pub async fn locate(&self, key: RoutingKey) -> Result<Vec<PeerId>, OverlayError> {
        let handle = self.random_handle()?;
        let reply = handle
            .anycast(Arc::new(KeyValidator::new(key)), AnycastPayload::Locate)
            .await?;
        let mut peers = reply.result.into_peers();
        peers.sort_unstable();
        peers.dedup();
        Ok(peers)
    }

    pub fn put_get_proxy(&self) -> Result<PutGetProxy, OverlayError> {
        PutGetProxy::try_new(Arc::clone(&self.config), self.handles())
    }

    pub fn publish_proxy(&self) -> Result<PublishProxy, OverlayError> {
        PublishProxy::try_new(Arc::clone(&self.config), self.handles())
    }

    pub fn subscribe_proxy(&self) -> Result<SubscribeProxy, OverlayError> {
        let transport: Arc<dyn Transport> = Arc::<LocalTransport>::clone(&self.transport);
        SubscribeProxy::try_new(Arc::clone(&self.config), self.handles(), transport)
    }

    /// Stops every peer. Their zones are not handed over.
    pub fn shutdown(&self) {
        for peer in self.peers() {
            self.peers.remove(&peer);
            self.transport.unregister(peer);
        }
    }

    fn spawn_peer(&self) -> PeerHandle {
        PeerHandle::spawn(
            Arc::clone(&self.config),
            Arc::clone(&self.transport),
            Arc::new(MemQuadStore::new()),
        )
    }

    fn handles(&self) -> Vec<PeerHandle> {
        let mut handles = self
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        handles.sort_unstable_by_key(PeerHandle::id);
        handles
    }

    fn random_handle(&self) -> Result<PeerHandle, OverlayError> {
        let mut handles = self.handles();
        handles.shuffle(&mut rand::rng());
        handles
            .pop()
            .ok_or_else(|| OverlayError::InvalidConfig("the network has no peer".to_owned()))
    }

    /// Spawns a peer and joins it through random landmarks.
    ///
    /// Unreachable landmarks are replaced by other peers, topology conflicts are retried after a
    /// random back-off.
    async fn join(&self, target: Option<Coordinate>) -> Result<PeerId, OverlayError> {
        let peer = self.spawn_peer();
        let mut landmarks = self.peers();
        landmarks.shuffle(&mut rand::rng());

        let mut attempts = 0;
        let mut last_error = None;
        while let Some(landmark) = landmarks.last().copied() {
            if attempts >= self.config.lookup_attempts + self.config.leave_retries {
                break;
            }
            attempts += 1;

            match peer.join(landmark, target.clone()).await {
                Ok(()) => {
                    self.peers.insert(peer.id(), peer.clone());
                    return Ok(peer.id());
                }
                // An earlier attempt timed out after the peer had joined.
                Err(OverlayError::AlreadyJoined(joined)) if joined == peer.id() && attempts > 1 => {
                    self.peers.insert(peer.id(), peer.clone());
                    return Ok(peer.id());
                }
                Err(error) if error.is_conflict() => {
                    warn!("Join of {} conflicted, retrying: {error}", peer.id());
                    tokio::time::sleep(self.backoff()).await;
                    last_error = Some(error);
                }
                Err(error @ (OverlayError::PeerNotActivated(_) | OverlayError::Transport(_))) => {
                    warn!("Landmark {landmark} is not available: {error}");
                    landmarks.pop();
                    last_error = Some(error);
                }
                Err(error) => {
                    self.transport.unregister(peer.id());
                    return Err(error);
                }
            }
        }

        self.transport.unregister(peer.id());
        Err(last_error.unwrap_or(OverlayError::PeerNotActivated(peer.id())))
    }

    fn backoff(&self) -> Duration {
        let min = u64::try_from(self.config.leave_retry_min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.config.leave_retry_max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(min..=max.max(min)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quadcloud_model::{Literal, NamedNode, Quad, QuadPattern};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn anycast_past_its_deadline_is_partial() -> Result<(), Box<dyn std::error::Error>> {
        let config = OverlayConfig::semantic()
            .with_maintenance_interval(None)
            .with_request_timeout(Duration::from_millis(300));
        let network = Network::bootstrap(config).await?;
        for _ in 0..5 {
            network.add_peer().await?;
        }
        let quads = (0..30)
            .map(|i| {
                Quad::new(
                    NamedNode::new_unchecked(format!("http://example.org/s{i}")),
                    NamedNode::new_unchecked(format!("http://example.org/p{}", i % 7)),
                    Literal::new_simple_literal(i.to_string()),
                    NamedNode::new_unchecked(format!("http://example.org/g{}", i % 3)),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(network.put_get_proxy()?.add_all(quads).await?, 30);

        let snapshots = network.snapshots().await?;
        let hung = snapshots
            .iter()
            .max_by_key(|snapshot| snapshot.quads)
            .unwrap();
        let entry = network.peers().into_iter().find(|peer| *peer != hung.id).unwrap();

        // The hung peer accepts messages but never processes them.
        let (sender, _mailbox) = mpsc::unbounded_channel();
        network.transport.register(hung.id, sender);

        let proxy = PutGetProxy::try_new(Arc::clone(network.config()), vec![network.handle(entry)?])?;
        let response = proxy.find(&QuadPattern::any()).await?;
        assert!(!response.complete);
        assert!(response.result.len() <= 30 - hung.quads);
        assert!(response.latency >= Duration::from_millis(150));

        let located = network
            .handle(entry)?
            .anycast(
                Arc::new(KeyValidator::new(RoutingKey::broadcast(4))),
                AnycastPayload::Locate,
            )
            .await?;
        assert!(!located.complete);
        let peers = located.result.into_peers();
        assert!(peers.contains(&entry));
        assert!(!peers.contains(&hung.id));
        Ok(())
    }
}
