use crate::registry::CloudId;
use crate::Envelope;
use quadcloud_can::{NeighborTableError, PeerId, ZoneError};
use quadcloud_model::ModelError;
use quadcloud_semantic::{DecompositionError, SinkId};
use quadcloud_storage::StorageError;
use thiserror::Error;

/// An error raised by the overlay.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OverlayError {
    /// A peer tried to join a network although it already owns a zone.
    #[error("peer {0} already joined a network")]
    AlreadyJoined(PeerId),
    /// The operation targets a peer that does not own a zone (yet or anymore).
    #[error("peer {0} is not activated")]
    PeerNotActivated(PeerId),
    /// A concurrent join, merge or leave interfered. Refreshing and retrying resolves it.
    #[error("topology conflict: {0}")]
    TopologyConflict(String),
    /// The request references a network that is not managed by the registry.
    #[error("the identifier {0} is not managed")]
    NotManaged(CloudId),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Malformed(#[from] DecompositionError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Zone(#[from] ZoneError),
    #[error(transparent)]
    NeighborTable(#[from] NeighborTableError),
    /// The peer answered with a reply that does not belong to the request.
    #[error("unexpected reply from peer {0}")]
    UnexpectedReply(PeerId),
}

impl OverlayError {
    /// Whether retrying the operation after a back-off may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            OverlayError::TopologyConflict(_)
                | OverlayError::Transport(TransportError::Timeout(_) | TransportError::NoReply(_))
        )
    }
}

/// An error raised when delivering a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),
    /// The peer dropped the request without answering, e.g., because it crashed.
    #[error("peer {0} did not reply")]
    NoReply(PeerId),
    #[error("peer {0} did not reply in time")]
    Timeout(PeerId),
    #[error("sink {0} is unreachable")]
    UnknownSink(SinkId),
}

/// An envelope that could not be delivered. The envelope is handed back to the sender, which may
/// try another route.
#[derive(Debug, Error)]
#[error("peer {peer} is unreachable")]
pub struct Undeliverable {
    pub peer: PeerId,
    pub envelope: Envelope,
}

impl From<Undeliverable> for TransportError {
    fn from(value: Undeliverable) -> Self {
        TransportError::Unreachable(value.peer)
    }
}

impl From<Undeliverable> for OverlayError {
    fn from(value: Undeliverable) -> Self {
        OverlayError::Transport(value.into())
    }
}
