use crate::Element;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// A point of the coordinate space: one [Element] per dimension.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Coordinate(Vec<Element>);

impl Coordinate {
    pub fn new(elements: Vec<Element>) -> Self {
        Self(elements)
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, dimension: usize) -> Option<&Element> {
        self.0.get(dimension)
    }

    pub fn elements(&self) -> &[Element] {
        &self.0
    }

    /// Orders `self` and `other` on a single dimension. Missing dimensions order first.
    pub fn compare_on_dimension(&self, other: &Coordinate, dimension: usize) -> Ordering {
        self.get(dimension).cmp(&other.get(dimension))
    }

    /// Computes the component-wise middle of two coordinates.
    pub fn middle(a: &Coordinate, b: &Coordinate) -> Coordinate {
        a.0.iter()
            .zip(b.0.iter())
            .map(|(a, b)| Element::middle(a, b))
            .collect()
    }

    pub(crate) fn with(&self, dimension: usize, element: Element) -> Coordinate {
        let mut elements = self.0.clone();
        elements[dimension] = element;
        Coordinate(elements)
    }
}

impl FromIterator<Element> for Coordinate {
    fn from_iter<T: IntoIterator<Item = Element>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Element>> for Coordinate {
    fn from(value: Vec<Element>) -> Self {
        Self(value)
    }
}

impl Display for Coordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{element}")?;
        }
        f.write_str(")")
    }
}

/// A lookup key in the coordinate space. Unbound dimensions ([None]) act as wildcards.
///
/// A key without any bound dimension addresses every zone of the network.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoutingKey(Vec<Option<Element>>);

impl RoutingKey {
    pub fn new(elements: Vec<Option<Element>>) -> Self {
        Self(elements)
    }

    /// A key matching every zone of a `dimensions`-dimensional space.
    pub fn broadcast(dimensions: usize) -> Self {
        Self(vec![None; dimensions])
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, dimension: usize) -> Option<&Element> {
        self.0.get(dimension).and_then(Option::as_ref)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Iterates over the bound dimensions in increasing order.
    pub fn bound_dimensions(&self) -> impl Iterator<Item = (usize, &Element)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(dimension, e)| e.as_ref().map(|e| (dimension, e)))
    }
}

impl From<Coordinate> for RoutingKey {
    fn from(value: Coordinate) -> Self {
        Self(value.0.into_iter().map(Some).collect())
    }
}

impl Display for RoutingKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match element {
                Some(element) => write!(f, "{element}")?,
                None => f.write_str("*")?,
            }
        }
        f.write_str(")")
    }
}
