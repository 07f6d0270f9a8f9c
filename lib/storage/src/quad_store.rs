use crate::StorageError;
use async_trait::async_trait;
use quadcloud_model::{Quad, QuadPattern};
use std::fmt::Debug;

/// A predicate deciding which quadruples leave a store, e.g., the quadruples of a zone that is
/// handed to another peer.
pub type QuadFilter<'a> = &'a (dyn Fn(&Quad) -> bool + Send + Sync);

/// The local store of a peer.
///
/// A peer only keeps the quadruples whose coordinate lies in its zone. Routing guarantees this
/// property, the store itself does not know about zones.
#[async_trait]
#[allow(
    clippy::len_without_is_empty,
    reason = "Counting quadruples may be expensive, emptiness is checked via len"
)]
pub trait QuadStore: Debug + Send + Sync {
    /// Inserts `quad`. Returns whether the quad was new.
    async fn insert(&self, quad: Quad) -> Result<bool, StorageError>;

    /// Loads the given quads into the store. Returns the number of new quads.
    async fn extend(&self, quads: Vec<Quad>) -> Result<usize, StorageError>;

    /// Removes `quad`. Returns whether the quad was present.
    async fn remove(&self, quad: &Quad) -> Result<bool, StorageError>;

    async fn contains(&self, quad: &Quad) -> Result<bool, StorageError>;

    /// Returns all quads matching `pattern`.
    async fn find(&self, pattern: &QuadPattern) -> Result<Vec<Quad>, StorageError>;

    /// Removes and returns all quads accepted by `filter`.
    async fn extract(&self, filter: QuadFilter<'_>) -> Result<Vec<Quad>, StorageError>;

    /// Returns the number of quads in the store.
    async fn len(&self) -> Result<usize, StorageError>;

    /// Clears the entire store.
    async fn clear(&self) -> Result<(), StorageError>;
}
