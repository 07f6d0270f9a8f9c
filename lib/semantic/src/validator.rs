use crate::{AtomicQuery, FilterConstraint, SemanticMapper};
use quadcloud_can::{RoutingKey, Validator, Zone};

/// Validates the zones an atomic query must visit: every bound position is contained and the
/// range constraints pushed down from the FILTER clauses may be satisfied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtomicQueryValidator {
    key: RoutingKey,
    constraints: Vec<FilterConstraint>,
}

impl AtomicQueryValidator {
    pub fn new(query: &AtomicQuery, mapper: &SemanticMapper) -> Self {
        Self {
            key: query.routing_key(mapper),
            constraints: query.constraints().to_vec(),
        }
    }
}

impl Validator for AtomicQueryValidator {
    fn key(&self) -> &RoutingKey {
        &self.key
    }

    fn validates(&self, zone: &Zone) -> bool {
        zone.contains_key(&self.key)
            && self
                .constraints
                .iter()
                .all(|constraint| constraint.admits(zone))
    }

    /// Validating zones may be scattered when a constraint is a disjunction, so requests spread
    /// over every zone containing the key.
    fn traverses(&self, zone: &Zone) -> bool {
        zone.contains_key(&self.key)
    }
}
