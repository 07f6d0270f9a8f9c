use crate::peer::PeerSnapshot;
use crate::OverlayError;
use quadcloud_can::{Coordinate, NeighborEntry, PeerId, SplitHistory, Validator, Zone};
use quadcloud_model::Quad;
use quadcloud_semantic::{AtomicQuery, Subscription, SubscriptionId};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// A message together with the channel its reply is sent to.
#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    pub reply: Option<oneshot::Sender<PeerReply>>,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            reply: None,
        }
    }

    pub fn with_reply(message: Message, reply: oneshot::Sender<PeerReply>) -> Self {
        Self {
            message,
            reply: Some(reply),
        }
    }
}

/// The messages understood by a peer.
#[derive(Debug)]
pub enum Message {
    /// Makes the peer the owner of the whole space.
    Bootstrap,
    /// Makes the peer join the network of `landmark`. The peer receives the zone containing
    /// `target`, or a random point if no target is given.
    JoinNetwork {
        landmark: PeerId,
        target: Option<Coordinate>,
    },
    /// Makes the peer leave its network gracefully. `attempt` counts the tries, starting at 1.
    Leave { attempt: usize },
    /// Requests a [PeerSnapshot].
    Inspect,
    /// Refreshes the neighbors, which detects failed neighbors.
    Maintain,
    Join(JoinRequest),
    SplitNotify(SplitNotify),
    Merge(Box<MergeRequest>),
    Handoff(Box<HandoffRequest>),
    NeighborUpdate(NeighborUpdate),
    LeaveNotify(LeaveNotify),
    Takeover(Takeover),
    Anycast(AnycastRequest),
    AnycastReply {
        request: RequestId,
        from: PeerId,
        reply: AnycastReply,
    },
    /// The deadline of a pending anycast passed.
    AnycastExpired(RequestId),
}

/// The reply of a peer.
#[derive(Debug)]
pub enum PeerReply {
    Ack,
    Granted(Box<JoinGrant>),
    /// The zone was merged or adopted. Carries the entry of the new owner.
    Transferred(NeighborEntry),
    Anycast(AnycastReply),
    Snapshot(Box<PeerSnapshot>),
    Failed(OverlayError),
}

/// Asks the owner of `target` to split its zone with `joiner`.
#[derive(Clone, Debug)]
pub struct JoinRequest {
    pub joiner: PeerId,
    pub target: Coordinate,
    pub deadline: Instant,
}

/// Everything a joining peer takes over from the owner of the split zone.
#[derive(Clone, Debug)]
pub struct JoinGrant {
    pub zone: Zone,
    pub history: SplitHistory,
    pub neighbors: Vec<NeighborEntry>,
    pub quads: Vec<Quad>,
    pub subscriptions: Vec<Subscription>,
}

/// Tells the neighbors of `owner` that it split its zone with `joined`.
#[derive(Clone, Debug)]
pub struct SplitNotify {
    pub owner: NeighborEntry,
    pub joined: NeighborEntry,
}

/// The state of a peer that gives its zone away.
#[derive(Clone, Debug)]
pub struct ZoneTransfer {
    pub from: PeerId,
    pub zone: Zone,
    pub history: SplitHistory,
    pub neighbors: Vec<NeighborEntry>,
    pub quads: Vec<Quad>,
    pub subscriptions: Vec<Subscription>,
}

/// Asks the sibling of a zone to merge it.
#[derive(Clone, Debug)]
pub struct MergeRequest {
    pub transfer: ZoneTransfer,
    pub deadline: Instant,
}

/// Asks a peer to vacate its zone and adopt the transferred one.
#[derive(Clone, Debug)]
pub struct HandoffRequest {
    pub transfer: ZoneTransfer,
    pub deadline: Instant,
    /// The number of hand-offs in the chain that led to this request.
    pub depth: usize,
}

/// The current entry of a peer together with its own neighbors.
#[derive(Clone, Debug)]
pub struct NeighborUpdate {
    pub entry: NeighborEntry,
    pub neighbors: Vec<NeighborEntry>,
}

/// Tells the neighbors that `left` gave its zone to `replacement`.
#[derive(Clone, Debug)]
pub struct LeaveNotify {
    pub left: PeerId,
    pub replacement: NeighborEntry,
}

/// Tells the former neighbors of a failed peer who repaired its zone.
#[derive(Clone, Debug)]
pub struct Takeover {
    pub failed: PeerId,
    pub entry: NeighborEntry,
}

/// Identifies an anycast. All copies of a request share the identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request delivered to every peer validated by `validator`.
#[derive(Clone, Debug)]
pub struct AnycastRequest {
    pub id: RequestId,
    pub validator: Arc<dyn Validator>,
    pub payload: AnycastPayload,
    pub deadline: Instant,
    /// The peer that forwarded the request. Replies travel back along this path.
    pub parent: Option<PeerId>,
}

/// What a validated peer does with an anycast.
#[derive(Clone, Debug)]
pub enum AnycastPayload {
    /// Stores a quadruple without matching subscriptions.
    AddQuadruple(Quad),
    /// Stores a quadruple and matches it against the indexed subscriptions.
    PublishQuadruple(Quad),
    DeleteQuadruple(Quad),
    FindQuadruples(AtomicQuery),
    /// Indexes a subscription for its next atomic query.
    SubscribeAtomicQueries(Subscription),
    /// Removes a subscription and all of its rewrites.
    Unsubscribe(SubscriptionId),
    /// Reports the identifier of the validated peers.
    Locate,
}

/// The merged results of the peers reached by an anycast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AnycastResult {
    #[default]
    Empty,
    Count(usize),
    Quads(Vec<Quad>),
    Peers(Vec<PeerId>),
}

impl AnycastResult {
    pub fn merge(&mut self, other: AnycastResult) {
        if matches!(self, AnycastResult::Empty) {
            *self = other;
            return;
        }
        match (self, other) {
            (_, AnycastResult::Empty) => {}
            (AnycastResult::Count(count), AnycastResult::Count(other)) => *count += other,
            (AnycastResult::Quads(quads), AnycastResult::Quads(other)) => quads.extend(other),
            (AnycastResult::Peers(peers), AnycastResult::Peers(other)) => peers.extend(other),
            (this, other) => {
                tracing::warn!("Dropping anycast result {other:?} that does not match {this:?}");
            }
        }
    }

    pub fn count(&self) -> usize {
        match self {
            AnycastResult::Empty => 0,
            AnycastResult::Count(count) => *count,
            AnycastResult::Quads(quads) => quads.len(),
            AnycastResult::Peers(peers) => peers.len(),
        }
    }

    pub fn into_quads(self) -> Vec<Quad> {
        match self {
            AnycastResult::Quads(quads) => quads,
            _ => Vec::new(),
        }
    }

    pub fn into_peers(self) -> Vec<PeerId> {
        match self {
            AnycastResult::Peers(peers) => peers,
            _ => Vec::new(),
        }
    }
}

/// The aggregated reply of an anycast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnycastReply {
    /// The number of times the request was forwarded.
    pub inbound_hop_count: usize,
    /// The number of replies that traveled back.
    pub outbound_hop_count: usize,
    /// Measured by the peer the request entered the network at.
    pub latency: Duration,
    /// False if some peer did not answer before its deadline.
    pub complete: bool,
    pub result: AnycastResult,
}

impl AnycastReply {
    /// The reply of a peer that has nothing to contribute.
    pub fn empty() -> Self {
        Self {
            complete: true,
            ..Self::default()
        }
    }

    pub fn incomplete() -> Self {
        Self::default()
    }

    /// Merges the reply of a child into this reply.
    pub fn merge(&mut self, child: AnycastReply) {
        self.inbound_hop_count += child.inbound_hop_count;
        self.outbound_hop_count += child.outbound_hop_count;
        self.complete &= child.complete;
        self.result.merge(child.result);
    }
}
