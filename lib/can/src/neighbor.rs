use crate::{Direction, NeighborTableError, PeerId, SplitHistory, Zone};
use std::collections::BTreeMap;

/// What a peer knows about one of its neighbors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighborEntry {
    pub peer: PeerId,
    pub zone: Zone,
    pub history: SplitHistory,
    /// The peer that takes over the zone if the neighbor leaves or fails.
    pub successor: Option<PeerId>,
}

type Side = BTreeMap<PeerId, NeighborEntry>;

/// The neighbors of a peer, grouped by the side of the zone on which they are located.
///
/// Peers are referenced by their identifiers only. Each side is ordered by identifier, which makes
/// the iteration order (and thus routing decisions) deterministic.
#[derive(Clone, Debug, Default)]
pub struct NeighborTable {
    sides: Vec<[Side; 2]>,
}

impl NeighborTable {
    /// Creates an empty table for a `dimensions`-dimensional space.
    pub fn new(dimensions: usize) -> Self {
        Self {
            sides: (0..dimensions).map(|_| [Side::new(), Side::new()]).collect(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.sides.len()
    }

    /// Inserts `entry` on `(dimension, direction)`.
    ///
    /// Re-inserting an identical entry is a no-op. Use [Self::replace] to change an existing entry.
    pub fn insert(
        &mut self,
        dimension: usize,
        direction: Direction,
        entry: NeighborEntry,
    ) -> Result<(), NeighborTableError> {
        if let Some((existing_dimension, existing_direction, existing)) = self.find(&entry.peer) {
            if existing_dimension != dimension
                || existing_direction != direction
                || existing.zone != entry.zone
            {
                return Err(NeighborTableError::Conflict(entry.peer));
            }
        }
        self.side_mut(dimension, direction)?
            .insert(entry.peer, entry);
        Ok(())
    }

    /// Replaces `expected` by `entry` on `(dimension, direction)` if the table still contains
    /// `expected` on this side.
    pub fn replace(
        &mut self,
        dimension: usize,
        direction: Direction,
        expected: &NeighborEntry,
        entry: NeighborEntry,
    ) -> Result<(), NeighborTableError> {
        let side = self.side_mut(dimension, direction)?;
        if side.get(&expected.peer) != Some(expected) {
            return Err(NeighborTableError::StaleEntry(expected.peer));
        }
        side.remove(&expected.peer);

        if expected.peer != entry.peer {
            self.remove(&entry.peer);
        }
        self.side_mut(dimension, direction)?
            .insert(entry.peer, entry);
        Ok(())
    }

    /// Removes `peer` from whichever side it is on.
    pub fn remove(&mut self, peer: &PeerId) -> Option<(usize, Direction, NeighborEntry)> {
        for (dimension, sides) in self.sides.iter_mut().enumerate() {
            for direction in Direction::ALL {
                if let Some(entry) = sides[direction.index()].remove(peer) {
                    return Some((dimension, direction, entry));
                }
            }
        }
        None
    }

    pub fn remove_on(
        &mut self,
        peer: &PeerId,
        dimension: usize,
        direction: Direction,
    ) -> Option<NeighborEntry> {
        self.sides
            .get_mut(dimension)
            .and_then(|sides| sides[direction.index()].remove(peer))
    }

    /// The neighbors on `(dimension, direction)`, ordered by identifier.
    pub fn get(
        &self,
        dimension: usize,
        direction: Direction,
    ) -> impl Iterator<Item = &NeighborEntry> + '_ {
        self.sides
            .get(dimension)
            .into_iter()
            .flat_map(move |sides| sides[direction.index()].values())
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.find(peer).is_some()
    }

    pub fn find(&self, peer: &PeerId) -> Option<(usize, Direction, &NeighborEntry)> {
        self.iter().find(|(_, _, entry)| &entry.peer == peer)
    }

    /// The neighbor whose zone can be merged with `zone` (i.e., its sibling), if any.
    pub fn mergeable_neighbor(&self, zone: &Zone) -> Option<&NeighborEntry> {
        self.iter()
            .map(|(_, _, entry)| entry)
            .find(|entry| zone.is_sibling(&entry.zone))
    }

    /// Re-files every entry according to its adjacency with `zone` and returns the entries that are
    /// no longer adjacent.
    pub fn retain_adjacent(&mut self, zone: &Zone) -> Vec<NeighborEntry> {
        let entries = self.drain();
        let mut removed = Vec::new();
        for entry in entries {
            match zone.adjacency(&entry.zone) {
                Some((dimension, direction)) => {
                    if let Some(sides) = self.sides.get_mut(dimension) {
                        sides[direction.index()].insert(entry.peer, entry);
                    }
                }
                None => removed.push(entry),
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sides
            .iter()
            .map(|sides| sides[0].len() + sides[1].len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Direction, &NeighborEntry)> + '_ {
        self.sides.iter().enumerate().flat_map(|(dimension, sides)| {
            Direction::ALL.into_iter().flat_map(move |direction| {
                sides[direction.index()]
                    .values()
                    .map(move |entry| (dimension, direction, entry))
            })
        })
    }

    /// A copy of every entry.
    pub fn entries(&self) -> Vec<NeighborEntry> {
        self.iter().map(|(_, _, entry)| entry.clone()).collect()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.iter().map(|(_, _, entry)| entry.peer).collect()
    }

    pub fn clear(&mut self) {
        for sides in &mut self.sides {
            sides[0].clear();
            sides[1].clear();
        }
    }

    fn drain(&mut self) -> Vec<NeighborEntry> {
        self.sides
            .iter_mut()
            .flat_map(|sides| {
                let [lower, upper] = sides;
                std::mem::take(lower)
                    .into_values()
                    .chain(std::mem::take(upper).into_values())
            })
            .collect()
    }

    fn side_mut(
        &mut self,
        dimension: usize,
        direction: Direction,
    ) -> Result<&mut Side, NeighborTableError> {
        self.sides
            .get_mut(dimension)
            .map(|sides| &mut sides[direction.index()])
            .ok_or(NeighborTableError::UnknownDimension(dimension))
    }
}
