use super::anycast::PendingAnycast;
use super::{PeerSnapshot, PeerState};
use crate::{
    Envelope, Message, NeighborUpdate, OverlayConfig, OverlayError, PeerReply, RequestId,
    Transport,
};
use quadcloud_can::{NeighborEntry, NeighborTable, PeerId, SplitHistory, Zone};
use quadcloud_semantic::{SemanticMapper, SubscriptionIndex};
use quadcloud_storage::QuadStore;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// The state of a peer. Only the task running [PeerActor::run] accesses it.
pub(super) struct PeerActor {
    pub(super) id: PeerId,
    pub(super) config: Arc<OverlayConfig>,
    pub(super) mapper: SemanticMapper,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) store: Arc<dyn QuadStore>,
    pub(super) state: PeerState,
    pub(super) zone: Option<Zone>,
    pub(super) history: SplitHistory,
    pub(super) neighbors: NeighborTable,
    /// The neighbors of our neighbors, as reported in their last update.
    pub(super) second_hand: FxHashMap<PeerId, Vec<NeighborEntry>>,
    pub(super) subscriptions: SubscriptionIndex,
    pub(super) pending: FxHashMap<RequestId, PendingAnycast>,
    pub(super) seen: DuplicateCache,
    /// Failed neighbors whose zone must be taken over by this peer.
    pub(super) takeovers: Vec<NeighborEntry>,
}

impl PeerActor {
    pub(super) fn new(
        id: PeerId,
        config: Arc<OverlayConfig>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn QuadStore>,
    ) -> Self {
        Self {
            id,
            mapper: config.mapper(),
            neighbors: NeighborTable::new(config.dimensions),
            seen: DuplicateCache::new(config.duplicate_cache_size),
            config,
            transport,
            store,
            state: PeerState::Joining,
            zone: None,
            history: SplitHistory::default(),
            second_hand: FxHashMap::default(),
            subscriptions: SubscriptionIndex::default(),
            pending: FxHashMap::default(),
            takeovers: Vec::new(),
        }
    }

    /// Processes the mailbox until the peer terminates or the mailbox is closed.
    pub(super) async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Envelope>) {
        self.start_maintenance();
        while let Some(envelope) = mailbox.recv().await {
            self.handle(envelope).await;
            while let Some(failed) = self.takeovers.pop() {
                self.take_over(failed).await;
            }
            if self.state == PeerState::Terminated {
                break;
            }
        }
        debug!("Peer {} stopped", self.id);
    }

    async fn handle(&mut self, envelope: Envelope) {
        let Envelope { message, reply } = envelope;
        match message {
            Message::Bootstrap => {
                let result = self.bootstrap().map(|()| PeerReply::Ack);
                respond(reply, result);
            }
            Message::JoinNetwork { landmark, target } => {
                let result = self.join_network(landmark, target).await;
                respond(reply, result.map(|()| PeerReply::Ack));
            }
            Message::Leave { attempt } => self.leave(attempt, reply).await,
            Message::Inspect => {
                let snapshot = self.snapshot().await;
                respond(reply, Ok(PeerReply::Snapshot(Box::new(snapshot))));
            }
            Message::Maintain => {
                self.maintain();
                respond(reply, Ok(PeerReply::Ack));
            }
            Message::Join(request) => self.handle_join(request, reply).await,
            Message::SplitNotify(notify) => self.handle_split_notify(notify),
            Message::Merge(request) => self.handle_merge(*request, reply).await,
            Message::Handoff(request) => self.handle_handoff(*request, reply).await,
            Message::NeighborUpdate(update) => self.handle_neighbor_update(update),
            Message::LeaveNotify(notify) => {
                self.forget_neighbor(&notify.left);
                self.refresh_neighbor(notify.replacement);
            }
            Message::Takeover(takeover) => self.handle_takeover(takeover),
            Message::Anycast(request) => self.handle_anycast(request, reply).await,
            Message::AnycastReply {
                request,
                from,
                reply: child,
            } => self.handle_anycast_reply(request, from, child),
            Message::AnycastExpired(request) => self.expire_anycast(request),
        }
    }

    fn start_maintenance(&self) {
        let Some(interval) = self.config.maintenance_interval else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let id = self.id;
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if transport.send(id, Message::Maintain).is_err() {
                    break;
                }
            }
        });
    }

    pub(super) fn zone(&self) -> Result<&Zone, OverlayError> {
        self.zone
            .as_ref()
            .ok_or(OverlayError::PeerNotActivated(self.id))
    }

    pub(super) fn is_active(&self) -> bool {
        self.state == PeerState::Active && self.zone.is_some()
    }

    /// The peer that takes over our zone: the neighbor with the smallest identifier on the side of
    /// the sibling zone.
    pub(super) fn successor(&self) -> Option<PeerId> {
        let last = self.history.last()?;
        self.neighbors
            .get(last.dimension, last.direction.opposite())
            .next()
            .map(|entry| entry.peer)
    }

    /// The entry our neighbors keep about us.
    pub(super) fn entry(&self) -> Result<NeighborEntry, OverlayError> {
        Ok(NeighborEntry {
            peer: self.id,
            zone: self.zone()?.clone(),
            history: self.history.clone(),
            successor: self.successor(),
        })
    }

    /// Files `entry` according to its adjacency with our zone, or drops it if it is not adjacent.
    pub(super) fn refresh_neighbor(&mut self, entry: NeighborEntry) {
        if entry.peer == self.id {
            return;
        }
        let Some(zone) = &self.zone else {
            return;
        };
        let adjacency = zone.adjacency(&entry.zone);
        self.neighbors.remove(&entry.peer);
        match adjacency {
            Some((dimension, direction)) => {
                if let Err(error) = self.neighbors.insert(dimension, direction, entry) {
                    warn!("Peer {} cannot refresh a neighbor: {error}", self.id);
                }
            }
            None => {
                self.second_hand.remove(&entry.peer);
            }
        }
    }

    pub(super) fn forget_neighbor(&mut self, peer: &PeerId) {
        self.neighbors.remove(peer);
        self.second_hand.remove(peer);
    }

    /// Removes a neighbor that could not be reached. If we are its successor, its zone is taken
    /// over after the current envelope was processed.
    pub(super) fn neighbor_failed(&mut self, peer: PeerId) {
        let Some((_, _, entry)) = self.neighbors.remove(&peer) else {
            return;
        };
        warn!("Peer {} lost its neighbor {peer}", self.id);
        if entry.successor == Some(self.id) {
            self.takeovers.push(entry);
        } else {
            self.second_hand.remove(&peer);
        }
    }

    /// Sends `message` to a neighbor. Unreachable neighbors are removed.
    pub(super) fn send_to_neighbor(&mut self, peer: PeerId, message: Message) {
        if self.transport.send(peer, message).is_err() {
            self.neighbor_failed(peer);
        }
    }

    /// Sends our entry and our neighbors to every neighbor.
    pub(super) fn maintain(&mut self) {
        if !self.is_active() {
            return;
        }
        for peer in self.neighbors.peers() {
            if let Some(update) = self.neighbor_update() {
                self.send_to_neighbor(peer, Message::NeighborUpdate(update));
            }
        }
    }

    pub(super) fn neighbor_update(&self) -> Option<NeighborUpdate> {
        Some(NeighborUpdate {
            entry: self.entry().ok()?,
            neighbors: self.neighbors.entries(),
        })
    }

    fn handle_neighbor_update(&mut self, update: NeighborUpdate) {
        if !self.is_active() {
            return;
        }
        let NeighborUpdate { entry, neighbors } = update;
        let peer = entry.peer;
        let lists_us = neighbors.iter().any(|neighbor| neighbor.peer == self.id);
        self.refresh_neighbor(entry);

        let adjacent = self.neighbors.contains(&peer);
        if adjacent {
            self.second_hand.insert(peer, neighbors);
        }
        // The sender has a wrong picture of us.
        if adjacent != lists_us {
            if let Some(update) = self.neighbor_update() {
                self.send_to_neighbor(peer, Message::NeighborUpdate(update));
            }
        }
    }

    async fn snapshot(&self) -> PeerSnapshot {
        let quads = match self.store.len().await {
            Ok(len) => len,
            Err(error) => {
                warn!("Peer {} cannot count its quadruples: {error}", self.id);
                0
            }
        };
        PeerSnapshot {
            id: self.id,
            state: self.state,
            zone: self.zone.clone(),
            history: self.history.clone(),
            neighbors: self
                .neighbors
                .iter()
                .map(|(dimension, direction, entry)| (dimension, direction, entry.clone()))
                .collect(),
            quads,
            subscriptions: self.subscriptions.len(),
        }
    }
}

/// Answers a request. Callers that stopped waiting are ignored.
pub(super) fn respond(
    reply: Option<oneshot::Sender<PeerReply>>,
    result: Result<PeerReply, OverlayError>,
) {
    if let Some(sender) = reply {
        if sender.send(result.unwrap_or_else(PeerReply::Failed)).is_err() {
            debug!("Dropping a reply, the caller stopped waiting");
        }
    }
}

/// Hands `reply` to a caller that waits for the outcome of a topology change. The reply is given
/// back if the caller stopped waiting, which means that the caller did not learn about the change.
pub(super) fn confirm(
    reply: Option<oneshot::Sender<PeerReply>>,
    result: PeerReply,
) -> Result<(), PeerReply> {
    match reply {
        Some(sender) => sender.send(result),
        None => Err(result),
    }
}

/// Remembers the most recent anycast requests.
#[derive(Debug)]
pub(super) struct DuplicateCache {
    capacity: usize,
    order: VecDeque<RequestId>,
    seen: FxHashSet<RequestId>,
}

impl DuplicateCache {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: FxHashSet::default(),
        }
    }

    /// Records `id`. Returns false if it was seen before.
    pub(super) fn insert(&mut self, id: RequestId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_cache_evicts_oldest() {
        let mut cache = DuplicateCache::new(2);
        let first = RequestId::new_random();
        let second = RequestId::new_random();
        let third = RequestId::new_random();

        assert!(cache.insert(first));
        assert!(!cache.insert(first));
        assert!(cache.insert(second));
        assert!(cache.insert(third));
        assert!(cache.insert(first));
        assert!(!cache.insert(third));
    }
}
