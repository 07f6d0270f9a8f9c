use crate::PeerId;
use thiserror::Error;

/// An error raised by the geometric operations on zones.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZoneError {
    #[error("expected {expected} dimensions but found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("the interval on dimension {0} is empty")]
    EmptyInterval(usize),
    #[error("dimension {dimension} does not exist in a {dimensions}-dimensional space")]
    UnknownDimension { dimension: usize, dimensions: usize },
    /// Two zones can only be merged if they form a box together.
    #[error("the zones are not complementary")]
    NotComplementary,
}

/// An error raised when updating a [NeighborTable](crate::NeighborTable).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum NeighborTableError {
    /// The peer is already known with another zone or on another side.
    #[error("peer {0} is already registered with a different entry")]
    Conflict(PeerId),
    /// An optimistic replacement found a different entry than expected.
    #[error("the entry of peer {0} changed concurrently")]
    StaleEntry(PeerId),
    #[error("dimension {0} does not exist")]
    UnknownDimension(usize),
}
