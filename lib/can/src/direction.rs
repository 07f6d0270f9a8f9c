use std::fmt::{Display, Formatter};

/// One of the two sides of a zone on a dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Towards smaller elements.
    Lower,
    /// Towards larger elements.
    Upper,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Lower, Direction::Upper];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Lower => Direction::Upper,
            Direction::Upper => Direction::Lower,
        }
    }

    /// Index of the direction in per-dimension arrays.
    pub fn index(self) -> usize {
        match self {
            Direction::Lower => 0,
            Direction::Upper => 1,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::Lower => "lower",
            Direction::Upper => "upper",
        })
    }
}
