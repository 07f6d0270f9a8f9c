use crate::proxy::EntryPoints;
use crate::{AnycastPayload, OverlayConfig, OverlayError, PeerHandle};
use futures::future::join_all;
use quadcloud_model::{CompoundEvent, Quad};
use std::sync::Arc;

/// Publishes quadruples. A published quadruple is stored and matched against the subscriptions
/// indexed at its zone.
#[derive(Clone, Debug)]
pub struct PublishProxy {
    entries: EntryPoints,
}

impl PublishProxy {
    pub fn try_new(
        config: Arc<OverlayConfig>,
        peers: Vec<PeerHandle>,
    ) -> Result<Self, OverlayError> {
        Ok(Self {
            entries: EntryPoints::try_new(config, peers)?,
        })
    }

    pub async fn publish(&self, quad: Quad) -> Result<(), OverlayError> {
        self.entries
            .anycast_quad(&quad, AnycastPayload::PublishQuadruple(quad.clone()))
            .await?;
        Ok(())
    }

    /// Publishes every quadruple of `event`. The quadruples are routed independently.
    pub async fn publish_event(&self, event: CompoundEvent) -> Result<(), OverlayError> {
        tracing::debug!("Publishing compound event with {} quadruples", event.len());
        for result in join_all(event.into_iter().map(|quad| self.publish(quad))).await {
            result?;
        }
        Ok(())
    }
}
