use crate::{Coordinate, Direction, Element, RoutingKey, ZoneError};
use rand::Rng;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Number of halvings used to draw a random element inside an interval.
const RANDOM_POINT_PRECISION: usize = 32;

/// A box of the coordinate space. Lower bounds are inclusive, upper bounds exclusive.
///
/// The space is bounded: zones do not wrap around at the borders of the space.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Zone {
    lower: Coordinate,
    upper: Coordinate,
}

impl Zone {
    /// Creates a new [Zone]. The interval on every dimension must be non-empty.
    pub fn new(lower: Coordinate, upper: Coordinate) -> Result<Self, ZoneError> {
        if lower.dimensions() != upper.dimensions() {
            return Err(ZoneError::DimensionMismatch {
                expected: lower.dimensions(),
                found: upper.dimensions(),
            });
        }
        for (dimension, (lower, upper)) in lower
            .elements()
            .iter()
            .zip(upper.elements().iter())
            .enumerate()
        {
            if lower >= upper {
                return Err(ZoneError::EmptyInterval(dimension));
            }
        }
        Ok(Self { lower, upper })
    }

    /// The zone covering the entire `dimensions`-dimensional space bounded by `lower` and `upper`.
    pub fn space(dimensions: usize, lower: Element, upper: Element) -> Result<Self, ZoneError> {
        Self::new(
            Coordinate::new(vec![lower; dimensions]),
            Coordinate::new(vec![upper; dimensions]),
        )
    }

    pub fn lower(&self) -> &Coordinate {
        &self.lower
    }

    pub fn upper(&self) -> &Coordinate {
        &self.upper
    }

    pub fn dimensions(&self) -> usize {
        self.lower.dimensions()
    }

    /// Locates `element` relative to the interval of the zone on `dimension`.
    ///
    /// Returns [Ordering::Less] if the element is below the interval, [Ordering::Greater] if it is
    /// above, and [Ordering::Equal] if it is contained.
    pub fn contains_on(&self, dimension: usize, element: &Element) -> Ordering {
        match (self.lower.get(dimension), self.upper.get(dimension)) {
            (Some(lower), _) if element < lower => Ordering::Less,
            (_, Some(upper)) if element >= upper => Ordering::Greater,
            (Some(_), Some(_)) => Ordering::Equal,
            _ => Ordering::Greater,
        }
    }

    pub fn contains(&self, point: &Coordinate) -> bool {
        point.dimensions() == self.dimensions()
            && point
                .elements()
                .iter()
                .enumerate()
                .all(|(dimension, e)| self.contains_on(dimension, e) == Ordering::Equal)
    }

    /// Checks whether every bound element of `key` lies within the zone.
    pub fn contains_key(&self, key: &RoutingKey) -> bool {
        key.dimensions() == self.dimensions()
            && key
                .bound_dimensions()
                .all(|(dimension, e)| self.contains_on(dimension, e) == Ordering::Equal)
    }

    /// Checks whether the open intervals of both zones intersect on `dimension`.
    pub fn overlaps_on(&self, other: &Zone, dimension: usize) -> bool {
        match (
            self.lower.get(dimension),
            self.upper.get(dimension),
            other.lower.get(dimension),
            other.upper.get(dimension),
        ) {
            (Some(a_lower), Some(a_upper), Some(b_lower), Some(b_upper)) => {
                a_lower < b_upper && b_lower < a_upper
            }
            _ => false,
        }
    }

    pub fn overlaps(&self, other: &Zone) -> bool {
        self.dimensions() == other.dimensions()
            && (0..self.dimensions()).all(|dimension| self.overlaps_on(other, dimension))
    }

    /// Checks whether the closed boxes of both zones intersect. Zones sharing a border or a
    /// corner touch each other.
    pub fn touches(&self, other: &Zone) -> bool {
        self.dimensions() == other.dimensions()
            && (0..self.dimensions()).all(|dimension| {
                self.lower.get(dimension) <= other.upper.get(dimension)
                    && other.lower.get(dimension) <= self.upper.get(dimension)
            })
    }

    /// Checks whether `other` starts exactly where `self` ends on `dimension`, looking into
    /// `direction`.
    pub fn abuts(&self, other: &Zone, dimension: usize, direction: Direction) -> bool {
        let (ours, theirs) = match direction {
            Direction::Upper => (self.upper.get(dimension), other.lower.get(dimension)),
            Direction::Lower => (self.lower.get(dimension), other.upper.get(dimension)),
        };
        ours.is_some() && ours == theirs
    }

    /// Returns the dimension and direction in which `other` is a neighbor of `self`.
    ///
    /// Two zones are adjacent if they abut on exactly one dimension and overlap on all others.
    pub fn adjacency(&self, other: &Zone) -> Option<(usize, Direction)> {
        if self.dimensions() != other.dimensions() {
            return None;
        }

        let mut result = None;
        for dimension in 0..self.dimensions() {
            if self.overlaps_on(other, dimension) {
                continue;
            }
            if result.is_some() {
                return None;
            }
            let direction = Direction::ALL
                .into_iter()
                .find(|direction| self.abuts(other, dimension, *direction))?;
            result = Some((dimension, direction));
        }
        result
    }

    /// Splits the zone into two halves on `dimension`. Returns the lower and the upper half.
    pub fn split(&self, dimension: usize) -> Result<(Zone, Zone), ZoneError> {
        let (Some(lower), Some(upper)) = (self.lower.get(dimension), self.upper.get(dimension))
        else {
            return Err(ZoneError::UnknownDimension {
                dimension,
                dimensions: self.dimensions(),
            });
        };

        let middle = Element::middle(lower, upper);
        let lower_half = Zone::new(self.lower.clone(), self.upper.with(dimension, middle.clone()))?;
        let upper_half = Zone::new(self.lower.with(dimension, middle), self.upper.clone())?;
        Ok((lower_half, upper_half))
    }

    /// Merges two complementary zones into their bounding box.
    pub fn merge(&self, other: &Zone) -> Result<Zone, ZoneError> {
        let (dimension, _) = self.adjacency(other).ok_or(ZoneError::NotComplementary)?;
        let same_extent = (0..self.dimensions())
            .filter(|d| *d != dimension)
            .all(|d| {
                self.lower.get(d) == other.lower.get(d) && self.upper.get(d) == other.upper.get(d)
            });
        if !same_extent {
            return Err(ZoneError::NotComplementary);
        }

        let lower = self
            .lower
            .elements()
            .iter()
            .zip(other.lower.elements())
            .map(|(a, b)| a.min(b).clone())
            .collect();
        let upper = self
            .upper
            .elements()
            .iter()
            .zip(other.upper.elements())
            .map(|(a, b)| a.max(b).clone())
            .collect();
        Zone::new(lower, upper)
    }

    /// Checks whether `other` is the zone that was split off together with `self`. Merging siblings
    /// and splitting the result again reproduces both zones.
    pub fn is_sibling(&self, other: &Zone) -> bool {
        let Some((dimension, _)) = self.adjacency(other) else {
            return false;
        };
        let Ok(merged) = self.merge(other) else {
            return false;
        };
        match merged.split(dimension) {
            Ok((lower, upper)) => {
                (&lower == self && &upper == other) || (&lower == other && &upper == self)
            }
            Err(_) => false,
        }
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::middle(&self.lower, &self.upper)
    }

    /// Draws a random point inside the zone.
    pub fn random_point(&self, rng: &mut impl Rng) -> Coordinate {
        self.lower
            .elements()
            .iter()
            .zip(self.upper.elements())
            .map(|(lower, upper)| {
                let mut lower = lower.clone();
                let mut upper = upper.clone();
                for _ in 0..RANDOM_POINT_PRECISION {
                    let middle = Element::middle(&lower, &upper);
                    if rng.random::<bool>() {
                        lower = middle;
                    } else {
                        upper = middle;
                    }
                }
                lower
            })
            .collect()
    }

    /// An approximation of the extent of the zone on `dimension`.
    pub fn extent(&self, dimension: usize) -> f64 {
        match (self.lower.get(dimension), self.upper.get(dimension)) {
            (Some(lower), Some(upper)) => upper.to_f64() - lower.to_f64(),
            _ => 0.0,
        }
    }
}

impl Display for Zone {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} -> {}]", self.lower, self.upper)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn space(dimensions: usize) -> Zone {
        Zone::space(dimensions, Element::from('0'), Element::from('{')).unwrap()
    }

    #[test]
    fn empty_interval_is_rejected() {
        let result = Zone::new(
            Coordinate::new(vec!["a".into(), "a".into()]),
            Coordinate::new(vec!["b".into(), "a".into()]),
        );
        assert_eq!(result, Err(ZoneError::EmptyInterval(1)));
    }

    #[test]
    fn split_halves_tile_zone() {
        let zone = space(2);
        let (lower, upper) = zone.split(0).unwrap();
        assert!(!lower.overlaps(&upper));
        assert_eq!(lower.adjacency(&upper), Some((0, Direction::Upper)));
        assert_eq!(upper.adjacency(&lower), Some((0, Direction::Lower)));
        assert_eq!(lower.merge(&upper).unwrap(), zone);
        assert!(lower.is_sibling(&upper));

        let point = zone.center();
        assert!(lower.contains(&point) ^ upper.contains(&point));
    }

    #[test]
    fn cousins_are_not_siblings() {
        let (left, right) = space(2).split(0).unwrap();
        let (_, left_top) = left.split(1).unwrap();
        let (right_bottom, _) = right.split(1).unwrap();
        assert_eq!(left_top.adjacency(&right_bottom), None);

        let (right_lower, _) = right.split(0).unwrap();
        assert!(left.adjacency(&right_lower).is_some());
        assert!(!left.is_sibling(&right_lower));
        assert_eq!(left.merge(&left_top), Err(ZoneError::NotComplementary));
    }

    #[test]
    fn corner_zones_touch_but_are_not_adjacent() {
        let (left, right) = space(2).split(0).unwrap();
        let (left_bottom, _) = left.split(1).unwrap();
        let (_, right_top) = right.split(1).unwrap();
        assert!(left_bottom.touches(&right_top));
        assert_eq!(left_bottom.adjacency(&right_top), None);
    }

    #[test]
    fn contains_key_ignores_wildcards() {
        let (lower, upper) = space(2).split(0).unwrap();
        let key = RoutingKey::new(vec![Some("E".into()), None]);
        assert!(lower.contains_key(&key));
        assert!(!upper.contains_key(&key));
        assert!(upper.contains_key(&RoutingKey::broadcast(2)));
    }

    #[test]
    fn contains_on_reports_side() {
        let (lower, _) = space(1).split(0).unwrap();
        assert_eq!(lower.contains_on(0, &"/".into()), Ordering::Less);
        assert_eq!(lower.contains_on(0, &"A".into()), Ordering::Equal);
        assert_eq!(lower.contains_on(0, &"z".into()), Ordering::Greater);
    }

    #[test]
    fn random_point_is_contained() {
        let zone = space(3).split(1).unwrap().1;
        let mut rng = rand::rng();
        for _ in 0..32 {
            assert!(zone.contains(&zone.random_point(&mut rng)));
        }
    }
}
