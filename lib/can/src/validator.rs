use crate::{RoutingKey, Zone};
use std::fmt::Debug;

/// Decides whether a zone is a target of a request.
///
/// Requests are routed greedily towards [Validator::key] until they reach a validating peer.
/// From there, they spread to every neighbor that validates as well.
pub trait Validator: Debug + Send + Sync {
    /// The key used to route the request towards the validating region.
    fn key(&self) -> &RoutingKey;

    /// Returns whether the peer owning `zone` must process the request.
    fn validates(&self, zone: &Zone) -> bool;

    /// Returns whether a request spreading from a validating peer must pass through `zone`.
    ///
    /// The zones traversed by a request must form a connected region that contains every
    /// validating zone.
    fn traverses(&self, zone: &Zone) -> bool {
        self.validates(zone)
    }
}

/// Validates every zone containing all bound elements of a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValidator {
    key: RoutingKey,
}

impl KeyValidator {
    pub fn new(key: RoutingKey) -> Self {
        Self { key }
    }
}

impl Validator for KeyValidator {
    fn key(&self) -> &RoutingKey {
        &self.key
    }

    fn validates(&self, zone: &Zone) -> bool {
        zone.contains_key(&self.key)
    }
}

/// Validates every zone touching a region, including zones that only share a border with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionValidator {
    region: Zone,
    key: RoutingKey,
}

impl RegionValidator {
    pub fn new(region: Zone) -> Self {
        let key = region.center().into();
        Self { region, key }
    }

    pub fn region(&self) -> &Zone {
        &self.region
    }
}

impl Validator for RegionValidator {
    fn key(&self) -> &RoutingKey {
        &self.key
    }

    fn validates(&self, zone: &Zone) -> bool {
        zone.touches(&self.region)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Element;

    #[test]
    fn region_validator_accepts_touching_zones() {
        let space = Zone::space(2, Element::from('0'), Element::from('{')).unwrap();
        let (left, right) = space.split(0).unwrap();
        let (left_bottom, left_top) = left.split(1).unwrap();

        let validator = RegionValidator::new(left_bottom.clone());
        assert!(validator.validates(&left_bottom));
        assert!(validator.validates(&left_top));
        assert!(validator.validates(&right));
        assert!(left_bottom.contains_key(validator.key()));
    }

    #[test]
    fn key_validator_uses_bound_dimensions() {
        let space = Zone::space(2, Element::from('0'), Element::from('{')).unwrap();
        let (left, right) = space.split(1).unwrap();
        let validator = KeyValidator::new(RoutingKey::new(vec![None, Some("a".into())]));
        assert!(!validator.validates(&left));
        assert!(validator.validates(&right));
    }
}
