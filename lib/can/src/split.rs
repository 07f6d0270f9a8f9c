use crate::{Direction, Zone};
use std::fmt::Debug;

/// One step of the recursive partitioning that produced a zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SplitEntry {
    /// The dimension that was split.
    pub dimension: usize,
    /// The half that was kept.
    pub direction: Direction,
}

impl SplitEntry {
    pub fn new(dimension: usize, direction: Direction) -> Self {
        Self {
            dimension,
            direction,
        }
    }
}

/// The ordered splits that carved a zone out of the full space. The last entry identifies the
/// sibling zone, which lies on `(dimension, direction.opposite())`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SplitHistory(Vec<SplitEntry>);

impl SplitHistory {
    pub fn push(&mut self, entry: SplitEntry) {
        self.0.push(entry);
    }

    pub fn pop(&mut self) -> Option<SplitEntry> {
        self.0.pop()
    }

    pub fn last(&self) -> Option<&SplitEntry> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SplitEntry> {
        self.0.iter()
    }

    /// The history of the sibling zone: the same splits, except that the other half was kept
    /// last.
    pub fn sibling(&self) -> Option<SplitHistory> {
        let (last, prefix) = self.0.split_last()?;
        let mut entries = prefix.to_vec();
        entries.push(SplitEntry::new(last.dimension, last.direction.opposite()));
        Some(SplitHistory(entries))
    }
}

/// Chooses the dimension on which a zone is split when a peer joins.
pub trait SplitStrategy: Debug + Send + Sync {
    fn choose_dimension(&self, zone: &Zone, history: &SplitHistory) -> usize;
}

/// Splits the dimension following the last split, wrapping around. This keeps zones close to
/// cubes if peers join uniformly.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobin;

impl SplitStrategy for RoundRobin {
    fn choose_dimension(&self, zone: &Zone, history: &SplitHistory) -> usize {
        match history.last() {
            Some(last) if zone.dimensions() > 0 => (last.dimension + 1) % zone.dimensions(),
            _ => 0,
        }
    }
}

/// Splits the dimension with the largest approximate extent. Ties go to the lowest dimension.
#[derive(Clone, Copy, Debug, Default)]
pub struct Widest;

impl SplitStrategy for Widest {
    fn choose_dimension(&self, zone: &Zone, _history: &SplitHistory) -> usize {
        (0..zone.dimensions())
            .map(|dimension| (dimension, zone.extent(dimension)))
            .fold(None, |best: Option<(usize, f64)>, (dimension, extent)| match best {
                Some((_, best_extent)) if best_extent.total_cmp(&extent).is_ge() => best,
                _ => Some((dimension, extent)),
            })
            .map_or(0, |(dimension, _)| dimension)
    }
}
