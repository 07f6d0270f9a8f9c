use crate::{Network, OverlayError};
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::fmt::{Display, Formatter};
use std::hash::BuildHasherDefault;
use std::sync::Arc;

/// The identifier of a network managed by a [Registry].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloudId(String);

impl CloudId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CloudId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CloudId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Keeps track of the networks running in this process.
#[derive(Debug, Default)]
pub struct Registry {
    networks: DashMap<CloudId, Arc<Network>, BuildHasherDefault<FxHasher>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `network` under `id`, replacing the network previously registered under it.
    pub fn register(&self, id: CloudId, network: Arc<Network>) -> Option<Arc<Network>> {
        tracing::info!("Registering network {id}");
        self.networks.insert(id, network)
    }

    pub fn find(&self, id: &CloudId) -> Result<Arc<Network>, OverlayError> {
        self.networks
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OverlayError::NotManaged(id.clone()))
    }

    pub fn remove(&self, id: &CloudId) -> Result<Arc<Network>, OverlayError> {
        self.networks
            .remove(id)
            .map(|(_, network)| network)
            .ok_or_else(|| OverlayError::NotManaged(id.clone()))
    }

    /// The registered identifiers, sorted.
    pub fn ids(&self) -> Vec<CloudId> {
        let mut ids = self
            .networks
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }
}
