use super::actor::{respond, PeerActor};
use crate::{
    AnycastPayload, AnycastReply, AnycastRequest, AnycastResult, Message, OverlayError, PeerReply,
    RequestId,
};
use quadcloud_can::{Direction, Element, PeerId, RoutingKey, Validator};
use quadcloud_model::Quad;
use quadcloud_semantic::{
    AtomicQuery, AtomicQueryValidator, ExpressionEvaluator, MatchOutcome, Subscription,
    SubscriptionIndex,
};
use rustc_hash::FxHashSet;
use std::cmp::{Ordering, Reverse};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where the aggregated reply of an anycast goes.
pub(super) enum ReplyTo {
    /// The request entered the network at this peer.
    Caller(oneshot::Sender<PeerReply>),
    /// The request was forwarded by a neighbor.
    Parent(PeerId),
    /// The request was started by this peer and nobody waits for it.
    Nobody,
}

/// An anycast that waits for the replies of the peers it was forwarded to.
pub(super) struct PendingAnycast {
    reply_to: ReplyTo,
    awaiting: FxHashSet<PeerId>,
    reply: AnycastReply,
    started: Instant,
}

impl PeerActor {
    /// Processes an anycast if we are validated, forwards it, and replies once every child
    /// replied or the deadline passed.
    pub(super) async fn handle_anycast(
        &mut self,
        request: AnycastRequest,
        reply: Option<oneshot::Sender<PeerReply>>,
    ) {
        let started = Instant::now();
        let reply_to = match (reply, request.parent) {
            (Some(sender), _) => ReplyTo::Caller(sender),
            (None, Some(parent)) => ReplyTo::Parent(parent),
            (None, None) => ReplyTo::Nobody,
        };

        let zone = match self.zone.clone() {
            Some(zone) if self.is_active() => zone,
            _ => {
                match reply_to {
                    ReplyTo::Caller(sender) => {
                        respond(Some(sender), Err(OverlayError::PeerNotActivated(self.id)));
                    }
                    reply_to => {
                        self.answer(reply_to, request.id, AnycastReply::incomplete(), started);
                    }
                }
                return;
            }
        };
        if !self.seen.insert(request.id) {
            self.answer(reply_to, request.id, AnycastReply::empty(), started);
            return;
        }

        let validates = request.validator.validates(&zone);
        let mut pending = PendingAnycast {
            reply_to,
            awaiting: FxHashSet::default(),
            reply: AnycastReply::empty(),
            started,
        };
        if validates {
            match self.process(&request.payload).await {
                Ok(result) => pending.reply.result = result,
                Err(error) => {
                    warn!("Peer {} failed to process an anycast: {error}", self.id);
                    pending.reply.complete = false;
                }
            }
        }

        let child = AnycastRequest {
            id: request.id,
            validator: Arc::clone(&request.validator),
            payload: request.payload.clone(),
            deadline: request
                .deadline
                .checked_sub(self.config.anycast_hop_margin)
                .unwrap_or(request.deadline),
            parent: Some(self.id),
        };
        if validates || request.validator.traverses(&zone) {
            let targets = self
                .neighbors
                .iter()
                .filter(|(_, _, entry)| {
                    Some(entry.peer) != request.parent && request.validator.traverses(&entry.zone)
                })
                .map(|(_, _, entry)| entry.peer)
                .collect::<Vec<_>>();
            for target in targets {
                self.forward(&mut pending, target, child.clone());
            }
        } else {
            self.route(&mut pending, child);
        }

        if pending.awaiting.is_empty() {
            self.answer(pending.reply_to, request.id, pending.reply, started);
        } else {
            self.schedule_expiry(request.id, request.deadline);
            self.pending.insert(request.id, pending);
        }
    }

    fn forward(&mut self, pending: &mut PendingAnycast, target: PeerId, request: AnycastRequest) {
        if self
            .transport
            .send(target, Message::Anycast(request))
            .is_ok()
        {
            pending.awaiting.insert(target);
            pending.reply.inbound_hop_count += 1;
        } else {
            self.neighbor_failed(target);
            pending.reply.complete = false;
        }
    }

    /// Forwards a request one greedy step towards its key.
    fn route(&mut self, pending: &mut PendingAnycast, request: AnycastRequest) {
        let key = request.validator.key().clone();
        for _ in 0..self.config.lookup_attempts {
            let Some(next) = self.next_hop(&key) else {
                break;
            };
            if self
                .transport
                .send(next, Message::Anycast(request.clone()))
                .is_ok()
            {
                pending.awaiting.insert(next);
                pending.reply.inbound_hop_count += 1;
                return;
            }
            self.neighbor_failed(next);
        }
        debug!("Peer {} found no route towards {key}", self.id);
        pending.reply.complete = false;
    }

    /// The neighbor that brings a request closer to `key`.
    ///
    /// The first bound dimension whose element lies outside our zone decides the direction. Among
    /// the neighbors in that direction, the one containing the key on every earlier bound
    /// dimension and then on most bound dimensions wins. Ties go to the smallest identifier.
    pub(super) fn next_hop(&self, key: &RoutingKey) -> Option<PeerId> {
        let zone = self.zone.as_ref()?;
        let bound = key.bound_dimensions().collect::<Vec<_>>();
        let (index, dimension, direction) =
            bound
                .iter()
                .enumerate()
                .find_map(|(index, (dimension, element))| {
                    match zone.contains_on(*dimension, element) {
                        Ordering::Less => Some((index, *dimension, Direction::Lower)),
                        Ordering::Greater => Some((index, *dimension, Direction::Upper)),
                        Ordering::Equal => None,
                    }
                })?;

        self.neighbors
            .get(dimension, direction)
            .max_by_key(|entry| {
                let contains = |(dimension, element): &(usize, &Element)| {
                    entry.zone.contains_on(*dimension, element) == Ordering::Equal
                };
                (
                    bound[..index].iter().all(contains),
                    bound.iter().filter(|candidate| contains(*candidate)).count(),
                    Reverse(entry.peer),
                )
            })
            .map(|entry| entry.peer)
    }

    fn schedule_expiry(&self, request: RequestId, deadline: Instant) {
        let transport = Arc::clone(&self.transport);
        let peer = self.id;
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if transport
                .send(peer, Message::AnycastExpired(request))
                .is_err()
            {
                debug!("Peer {peer} stopped before anycast {request} expired");
            }
        });
    }

    pub(super) fn handle_anycast_reply(
        &mut self,
        request: RequestId,
        from: PeerId,
        child: AnycastReply,
    ) {
        let Some(pending) = self.pending.get_mut(&request) else {
            debug!("Peer {} drops a late reply for anycast {request}", self.id);
            return;
        };
        if !pending.awaiting.remove(&from) {
            return;
        }
        pending.reply.outbound_hop_count += 1;
        pending.reply.merge(child);
        if pending.awaiting.is_empty() {
            if let Some(pending) = self.pending.remove(&request) {
                self.answer(pending.reply_to, request, pending.reply, pending.started);
            }
        }
    }

    pub(super) fn expire_anycast(&mut self, request: RequestId) {
        let Some(mut pending) = self.pending.remove(&request) else {
            return;
        };
        warn!(
            "Anycast {request} expired at peer {} while waiting for {} peers",
            self.id,
            pending.awaiting.len()
        );
        pending.reply.complete = false;
        self.answer(pending.reply_to, request, pending.reply, pending.started);
    }

    fn answer(
        &mut self,
        reply_to: ReplyTo,
        request: RequestId,
        mut reply: AnycastReply,
        started: Instant,
    ) {
        match reply_to {
            ReplyTo::Caller(sender) => {
                reply.latency = started.elapsed();
                respond(Some(sender), Ok(PeerReply::Anycast(reply)));
            }
            ReplyTo::Parent(parent) => {
                let message = Message::AnycastReply {
                    request,
                    from: self.id,
                    reply,
                };
                self.send_to_neighbor(parent, message);
            }
            ReplyTo::Nobody => {
                if !reply.complete {
                    debug!("Anycast {request} of peer {} completed partially", self.id);
                }
            }
        }
    }

    /// Applies the payload of an anycast to our zone.
    async fn process(&mut self, payload: &AnycastPayload) -> Result<AnycastResult, OverlayError> {
        Ok(match payload {
            AnycastPayload::AddQuadruple(quad) => {
                AnycastResult::Count(usize::from(self.store.insert(quad.clone()).await?))
            }
            AnycastPayload::PublishQuadruple(quad) => {
                let inserted = self.store.insert(quad.clone()).await?;
                let outcomes = self.subscriptions.matching(quad);
                self.dispatch(outcomes);
                AnycastResult::Count(usize::from(inserted))
            }
            AnycastPayload::DeleteQuadruple(quad) => {
                AnycastResult::Count(usize::from(self.store.remove(quad).await?))
            }
            AnycastPayload::FindQuadruples(query) => {
                let quads = self.store.find(&query.pattern()).await?;
                AnycastResult::Quads(
                    quads
                        .into_iter()
                        .filter(|quad| accepts(query, quad))
                        .collect(),
                )
            }
            AnycastPayload::SubscribeAtomicQueries(subscription) => {
                // Rewrites must also match the quadruples that arrived before them.
                if !subscription.matched.is_empty() {
                    self.probe(subscription).await?;
                }
                AnycastResult::Count(usize::from(
                    self.subscriptions.insert(subscription.clone()),
                ))
            }
            AnycastPayload::Unsubscribe(origin) => {
                AnycastResult::Count(self.subscriptions.remove_origin(origin).len())
            }
            AnycastPayload::Locate => AnycastResult::Peers(vec![self.id]),
        })
    }

    async fn probe(&mut self, subscription: &Subscription) -> Result<(), OverlayError> {
        let Some(query) = subscription.next_query() else {
            return Ok(());
        };
        let outcomes = self
            .store
            .find(&query.pattern())
            .await?
            .iter()
            .filter_map(|quad| SubscriptionIndex::probe(subscription, quad))
            .collect();
        self.dispatch(outcomes);
        Ok(())
    }

    /// Delivers notifications and indexes rewritten subscriptions.
    fn dispatch(&mut self, outcomes: Vec<MatchOutcome>) {
        for outcome in outcomes {
            match outcome {
                MatchOutcome::Notify { sink, notification } => {
                    match self.transport.notify(sink, notification) {
                        Ok(()) => self.subscriptions.record_success(&sink),
                        Err(error) => {
                            let failures = self.subscriptions.record_failure(sink);
                            if failures >= self.config.max_notification_failures {
                                let removed = self.subscriptions.remove_sink(&sink);
                                warn!(
                                    "Peer {} dropped sink {sink} and {} subscriptions after {failures} failed notifications: {error}",
                                    self.id,
                                    removed.len()
                                );
                            }
                        }
                    }
                }
                MatchOutcome::Rewrite(subscription) => self.index_rewrite(subscription),
            }
        }
    }

    /// Sends a rewritten subscription to the zones of its next atomic query.
    fn index_rewrite(&mut self, subscription: Subscription) {
        let Some(query) = subscription.next_query() else {
            return;
        };
        let request = AnycastRequest {
            id: RequestId::new_random(),
            validator: Arc::new(AtomicQueryValidator::new(query, &self.mapper)),
            payload: AnycastPayload::SubscribeAtomicQueries(subscription),
            deadline: Instant::now() + self.config.request_timeout,
            parent: None,
        };
        if self
            .transport
            .send(self.id, Message::Anycast(request))
            .is_err()
        {
            warn!("Peer {} cannot index a rewritten subscription", self.id);
        }
    }
}

/// Whether `quad` is an answer of `query`, including the filters evaluated at the peer.
fn accepts(query: &AtomicQuery, quad: &Quad) -> bool {
    query.matches(quad).is_some_and(|bindings| {
        let evaluator = ExpressionEvaluator::new(&bindings);
        query.filters().iter().all(|filter| evaluator.accepts(filter))
    })
}
