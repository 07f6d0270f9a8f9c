//! Proxies are the client side of the overlay. They enter the network through one of its peers
//! and turn the operations of applications into anycasts.

mod publish;
mod put_get;
mod subscribe;

pub use publish::PublishProxy;
pub use put_get::PutGetProxy;
pub use subscribe::SubscribeProxy;

use crate::{
    AnycastPayload, AnycastReply, OverlayConfig, OverlayError, PeerHandle, SparqlResponse,
};
use quadcloud_can::{KeyValidator, Validator};
use quadcloud_model::{validate_quad, Quad};
use quadcloud_semantic::SemanticMapper;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

/// The peers a proxy may enter the network through.
///
/// A lookup is retried at another entry peer if the chosen one left or crashed, up to
/// `lookup_attempts` times.
#[derive(Clone, Debug)]
struct EntryPoints {
    config: Arc<OverlayConfig>,
    mapper: SemanticMapper,
    peers: Vec<PeerHandle>,
}

impl EntryPoints {
    fn try_new(config: Arc<OverlayConfig>, peers: Vec<PeerHandle>) -> Result<Self, OverlayError> {
        if !config.is_semantic() {
            return Err(OverlayError::InvalidConfig(format!(
                "proxies need a semantic space, found {} dimensions",
                config.dimensions
            )));
        }
        if peers.is_empty() {
            return Err(OverlayError::InvalidConfig(
                "a proxy needs at least one entry peer".to_owned(),
            ));
        }
        let mapper = config.mapper();
        Ok(Self {
            config,
            mapper,
            peers,
        })
    }

    async fn anycast(
        &self,
        validator: Arc<dyn Validator>,
        payload: AnycastPayload,
    ) -> Result<AnycastReply, OverlayError> {
        let mut peers = self.peers.iter().collect::<Vec<_>>();
        peers.shuffle(&mut rand::rng());

        let mut last_error = None;
        for peer in peers.into_iter().take(self.config.lookup_attempts) {
            match peer.anycast(Arc::clone(&validator), payload.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(error @ (OverlayError::Transport(_) | OverlayError::PeerNotActivated(_))) => {
                    tracing::warn!("Entry peer {} failed, trying another one: {error}", peer.id());
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error.unwrap_or(OverlayError::InvalidConfig(
            "no entry peer is available".to_owned(),
        )))
    }

    /// Sends `payload` to the peer owning the coordinate of `quad`.
    async fn anycast_quad(
        &self,
        quad: &Quad,
        payload: AnycastPayload,
    ) -> Result<AnycastReply, OverlayError> {
        validate_quad(quad)?;
        let coordinate = self.mapper.coordinate(quad)?;
        let validator = Arc::new(KeyValidator::new(coordinate.into()));
        self.anycast(validator, payload).await
    }
}

/// Combines the replies of anycasts that were sent in parallel.
///
/// Hop counts add up, the latency is the one of the slowest anycast.
fn combine(replies: Vec<AnycastReply>) -> SparqlResponse<Vec<AnycastReply>> {
    let mut response = SparqlResponse {
        inbound_hop_count: 0,
        outbound_hop_count: 0,
        latency: Duration::ZERO,
        complete: true,
        result: Vec::with_capacity(replies.len()),
    };
    for reply in replies {
        response.inbound_hop_count += reply.inbound_hop_count;
        response.outbound_hop_count += reply.outbound_hop_count;
        response.latency = response.latency.max(reply.latency);
        response.complete &= reply.complete;
        response.result.push(reply);
    }
    response
}

/// Appends the metrics of `other`, which was sent after the anycasts of `response`.
fn chain<T, U>(response: SparqlResponse<T>, other: &SparqlResponse<U>) -> SparqlResponse<T> {
    SparqlResponse {
        inbound_hop_count: response.inbound_hop_count + other.inbound_hop_count,
        outbound_hop_count: response.outbound_hop_count + other.outbound_hop_count,
        latency: response.latency + other.latency,
        complete: response.complete && other.complete,
        result: response.result,
    }
}
