//! An in-memory [QuadStore].

use crate::{QuadFilter, QuadStore, StorageError};
use async_trait::async_trait;
use dashmap::DashSet;
use quadcloud_model::{Quad, QuadPattern};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

/// Keeps the quadruples of a peer in a concurrent hash set.
///
/// Pattern lookups scan the entire set. A peer only stores the quadruples of its own zone, which
/// keeps the sets small for networks with many peers.
#[derive(Debug)]
pub struct MemQuadStore {
    quads: DashSet<Quad, BuildHasherDefault<FxHasher>>,
}

impl Default for MemQuadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemQuadStore {
    /// Creates a new empty [MemQuadStore].
    pub fn new() -> Self {
        Self {
            quads: DashSet::with_hasher(BuildHasherDefault::default()),
        }
    }
}

#[async_trait]
impl QuadStore for MemQuadStore {
    async fn insert(&self, quad: Quad) -> Result<bool, StorageError> {
        Ok(self.quads.insert(quad))
    }

    async fn extend(&self, quads: Vec<Quad>) -> Result<usize, StorageError> {
        Ok(quads
            .into_iter()
            .filter(|quad| self.quads.insert(quad.clone()))
            .count())
    }

    async fn remove(&self, quad: &Quad) -> Result<bool, StorageError> {
        Ok(self.quads.remove(quad).is_some())
    }

    async fn contains(&self, quad: &Quad) -> Result<bool, StorageError> {
        Ok(self.quads.contains(quad))
    }

    async fn find(&self, pattern: &QuadPattern) -> Result<Vec<Quad>, StorageError> {
        Ok(self
            .quads
            .iter()
            .filter(|quad| pattern.matches(quad.key()))
            .map(|quad| quad.key().clone())
            .collect())
    }

    async fn extract(&self, filter: QuadFilter<'_>) -> Result<Vec<Quad>, StorageError> {
        let selected = self
            .quads
            .iter()
            .filter(|quad| filter(quad.key()))
            .map(|quad| quad.key().clone())
            .collect::<Vec<_>>();
        Ok(selected
            .into_iter()
            .filter(|quad| self.quads.remove(quad).is_some())
            .collect())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.quads.len())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.quads.clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic_in_result_fn)]
mod test {
    use super::*;
    use quadcloud_model::{Literal, NamedNode, Term};

    fn quad(object: i32) -> Quad {
        Quad::new(
            NamedNode::new_unchecked("http://example.com/s"),
            NamedNode::new_unchecked("http://example.com/p"),
            Literal::from(object),
            NamedNode::new_unchecked("http://example.com/g"),
        )
    }

    #[tokio::test]
    async fn insert_is_idempotent() -> Result<(), StorageError> {
        let store = MemQuadStore::new();
        assert!(store.insert(quad(1)).await?);
        assert!(!store.insert(quad(1)).await?);
        assert_eq!(store.extend(vec![quad(1), quad(2)]).await?, 1);
        assert_eq!(store.len().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn find_by_pattern() -> Result<(), StorageError> {
        let store = MemQuadStore::new();
        store.extend(vec![quad(1), quad(2)]).await?;

        let pattern = QuadPattern::new(None, None, None, Some(Term::from(Literal::from(2))));
        assert_eq!(store.find(&pattern).await?, vec![quad(2)]);
        assert_eq!(store.find(&QuadPattern::any()).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn extract_removes_selected_quads() -> Result<(), StorageError> {
        let store = MemQuadStore::new();
        store.extend(vec![quad(1), quad(2), quad(3)]).await?;

        let two = quad(2);
        let extracted = store.extract(&|q: &Quad| q == &two).await?;
        assert_eq!(extracted, vec![quad(2)]);
        assert!(!store.contains(&quad(2)).await?);
        assert_eq!(store.len().await?, 2);

        assert!(store.remove(&quad(1)).await?);
        store.clear().await?;
        assert_eq!(store.len().await?, 0);
        Ok(())
    }
}
