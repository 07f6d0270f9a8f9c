use crate::QuadPosition;
use thiserror::Error;

/// Errors raised when a quadruple or a compound event violates the data model of the network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
    /// Quadruples must live in a named graph, the default graph cannot be addressed in the
    /// coordinate space.
    #[error("quadruples must belong to a named graph")]
    DefaultGraph,
    /// Blank nodes are scoped to a single document and cannot be shared across peers.
    #[error("blank nodes are not allowed in the {0} position")]
    BlankNode(QuadPosition),
    /// A compound event needs at least one quadruple.
    #[error("a compound event must contain at least one quadruple")]
    EmptyCompoundEvent,
    /// All quadruples of a compound event share the same graph.
    #[error("compound event mixes the graphs {expected} and {found}")]
    MixedGraphs { expected: String, found: String },
}
