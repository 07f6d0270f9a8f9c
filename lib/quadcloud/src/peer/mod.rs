//! The peers of the overlay. Every peer is an actor: a tokio task that owns the state of the peer
//! and processes the envelopes of its mailbox one after the other.

mod actor;
mod anycast;
mod membership;

use crate::{
    AnycastPayload, AnycastReply, AnycastRequest, LocalTransport, Message, OverlayConfig,
    OverlayError, PeerReply, RequestId, Transport,
};
use actor::PeerActor;
use quadcloud_can::{Coordinate, Direction, NeighborEntry, PeerId, SplitHistory, Validator, Zone};
use quadcloud_storage::QuadStore;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// The membership state of a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// The peer does not own a zone yet.
    Joining,
    Active,
    /// The peer is splitting its zone with a joining peer.
    Splitting,
    /// The peer is merging or adopting a zone.
    Merging,
    Leaving,
    Terminated,
}

impl Display for PeerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PeerState::Joining => "joining",
            PeerState::Active => "active",
            PeerState::Splitting => "splitting",
            PeerState::Merging => "merging",
            PeerState::Leaving => "leaving",
            PeerState::Terminated => "terminated",
        })
    }
}

/// A copy of the state of a peer.
#[derive(Clone, Debug)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub state: PeerState,
    pub zone: Option<Zone>,
    pub history: SplitHistory,
    pub neighbors: Vec<(usize, Direction, NeighborEntry)>,
    pub quads: usize,
    pub subscriptions: usize,
}

impl PeerSnapshot {
    /// Whether `peer` is listed on `(dimension, direction)`.
    pub fn has_neighbor(&self, peer: PeerId, dimension: usize, direction: Direction) -> bool {
        self.neighbors
            .iter()
            .any(|(d, dir, entry)| entry.peer == peer && *d == dimension && *dir == direction)
    }
}

/// A handle to a peer. Every call is a message to the mailbox of the peer.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    id: PeerId,
    config: Arc<OverlayConfig>,
    transport: Arc<dyn Transport>,
}

impl PeerHandle {
    /// Spawns a new peer in the [PeerState::Joining] state on the current tokio runtime.
    pub fn spawn(
        config: Arc<OverlayConfig>,
        transport: Arc<LocalTransport>,
        store: Arc<dyn QuadStore>,
    ) -> Self {
        let id = PeerId::new_random();
        let (sender, mailbox) = mpsc::unbounded_channel();
        transport.register(id, sender);

        let transport: Arc<dyn Transport> = transport;
        let actor = PeerActor::new(id, Arc::clone(&config), Arc::clone(&transport), store);
        tokio::spawn(actor.run(mailbox));
        Self {
            id,
            config,
            transport,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Makes this peer the first peer of a network.
    pub async fn bootstrap(&self) -> Result<(), OverlayError> {
        self.acknowledge(Message::Bootstrap, self.config.request_timeout)
            .await
    }

    /// Joins the network of `landmark`.
    pub async fn join(
        &self,
        landmark: PeerId,
        target: Option<Coordinate>,
    ) -> Result<(), OverlayError> {
        let message = Message::JoinNetwork { landmark, target };
        self.acknowledge(message, self.config.request_timeout * 2)
            .await
    }

    /// Leaves the network. The zone of the peer is given to a neighbor.
    ///
    /// Between two attempts the peer keeps serving its mailbox, so that neighbors that leave at
    /// the same time can merge with it.
    pub async fn leave(&self) -> Result<(), OverlayError> {
        let attempts = u32::try_from(self.config.leave_retries.max(1)).unwrap_or(u32::MAX);
        let timeout = (self.config.request_timeout * 2 + self.config.leave_retry_max) * attempts;
        self.acknowledge(Message::Leave { attempt: 1 }, timeout)
            .await
    }

    /// Runs one round of the neighbor maintenance.
    pub async fn maintain(&self) -> Result<(), OverlayError> {
        self.acknowledge(Message::Maintain, self.config.request_timeout)
            .await
    }

    pub async fn snapshot(&self) -> Result<PeerSnapshot, OverlayError> {
        match self
            .call(Message::Inspect, self.config.request_timeout)
            .await?
        {
            PeerReply::Snapshot(snapshot) => Ok(*snapshot),
            _ => Err(OverlayError::UnexpectedReply(self.id)),
        }
    }

    /// Sends an anycast that enters the network at this peer.
    ///
    /// The reply is marked incomplete if some validated peer did not answer before the request
    /// timeout.
    pub async fn anycast(
        &self,
        validator: Arc<dyn Validator>,
        payload: AnycastPayload,
    ) -> Result<AnycastReply, OverlayError> {
        let request = AnycastRequest {
            id: RequestId::new_random(),
            validator,
            payload,
            deadline: Instant::now() + self.config.request_timeout,
            parent: None,
        };
        let timeout = self.config.request_timeout + self.config.anycast_hop_margin;
        match self.call(Message::Anycast(request), timeout).await? {
            PeerReply::Anycast(reply) => Ok(reply),
            _ => Err(OverlayError::UnexpectedReply(self.id)),
        }
    }

    async fn acknowledge(&self, message: Message, timeout: Duration) -> Result<(), OverlayError> {
        match self.call(message, timeout).await? {
            PeerReply::Ack => Ok(()),
            _ => Err(OverlayError::UnexpectedReply(self.id)),
        }
    }

    async fn call(&self, message: Message, timeout: Duration) -> Result<PeerReply, OverlayError> {
        match self.transport.request(self.id, message, timeout).await? {
            PeerReply::Failed(error) => Err(error),
            reply => Ok(reply),
        }
    }
}
