use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// The identifier of a peer. Identifiers are totally ordered, which is used to break ties
/// deterministically (e.g., when electing a successor).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Creates a new random identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for PeerId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
