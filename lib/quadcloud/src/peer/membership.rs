use super::actor::{confirm, respond, PeerActor};
use super::PeerState;
use crate::{
    Envelope, HandoffRequest, JoinGrant, JoinRequest, LeaveNotify, MergeRequest, Message,
    OverlayError, PeerReply, SplitNotify, Takeover, TransportError, ZoneTransfer,
};
use quadcloud_can::{
    Coordinate, Direction, NeighborEntry, NeighborTable, PeerId, RoutingKey, SplitEntry,
    SplitHistory, Validator, Zone,
};
use quadcloud_model::Quad;
use quadcloud_semantic::{AtomicQueryValidator, SemanticMapper, Subscription};
use rand::Rng;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl PeerActor {
    pub(super) fn bootstrap(&mut self) -> Result<(), OverlayError> {
        if self.state != PeerState::Joining {
            return Err(OverlayError::AlreadyJoined(self.id));
        }
        self.zone = Some(self.config.space()?);
        self.state = PeerState::Active;
        info!("Peer {} bootstrapped a network", self.id);
        Ok(())
    }

    pub(super) async fn join_network(
        &mut self,
        landmark: PeerId,
        target: Option<Coordinate>,
    ) -> Result<(), OverlayError> {
        match self.state {
            PeerState::Joining => {}
            PeerState::Terminated => return Err(OverlayError::PeerNotActivated(self.id)),
            _ => return Err(OverlayError::AlreadyJoined(self.id)),
        }

        let target = match target {
            Some(target) => target,
            None => self.random_target()?,
        };
        let request = JoinRequest {
            joiner: self.id,
            target,
            deadline: Instant::now() + self.config.request_timeout,
        };
        let reply = self
            .transport
            .request(
                landmark,
                Message::Join(request),
                self.config.request_timeout,
            )
            .await?;
        let grant = match reply {
            PeerReply::Granted(grant) => *grant,
            PeerReply::Failed(error) => return Err(error),
            _ => return Err(OverlayError::UnexpectedReply(landmark)),
        };

        info!("Peer {} joined with zone {}", self.id, grant.zone);
        self.zone = Some(grant.zone);
        self.history = grant.history;
        for entry in grant.neighbors {
            self.refresh_neighbor(entry);
        }
        for subscription in grant.subscriptions {
            self.subscriptions.insert(subscription);
        }
        self.state = PeerState::Active;
        self.store.extend(grant.quads).await?;
        Ok(())
    }

    fn random_target(&self) -> Result<Coordinate, OverlayError> {
        Ok(self.config.space()?.random_point(&mut rand::rng()))
    }

    /// Splits our zone with the joining peer or forwards the request towards the owner of the
    /// target.
    pub(super) async fn handle_join(
        &mut self,
        request: JoinRequest,
        reply: Option<oneshot::Sender<PeerReply>>,
    ) {
        if let Err(error) = self.check_join(&request) {
            respond(reply, Err(error));
            return;
        }
        if self.zone().is_ok_and(|zone| zone.contains(&request.target)) {
            self.split_zone(request, reply).await;
            return;
        }

        let key = RoutingKey::from(request.target.clone());
        let mut envelope = Envelope {
            message: Message::Join(request),
            reply,
        };
        for _ in 0..self.config.lookup_attempts {
            let Some(next) = self.next_hop(&key) else {
                break;
            };
            debug!("Peer {} forwards a join request to {next}", self.id);
            match self.transport.deliver(next, envelope) {
                Ok(()) => return,
                Err(undeliverable) => {
                    self.neighbor_failed(next);
                    envelope = undeliverable.envelope;
                }
            }
        }
        respond(
            envelope.reply,
            Err(OverlayError::TopologyConflict(format!(
                "peer {} found no route to the join target",
                self.id
            ))),
        );
    }

    fn check_join(&self, request: &JoinRequest) -> Result<(), OverlayError> {
        match self.state {
            PeerState::Active => {}
            PeerState::Joining | PeerState::Terminated => {
                return Err(OverlayError::PeerNotActivated(self.id))
            }
            state => {
                return Err(OverlayError::TopologyConflict(format!(
                    "peer {} is {state}",
                    self.id
                )))
            }
        }
        if request.joiner == self.id {
            return Err(OverlayError::AlreadyJoined(self.id));
        }
        if Instant::now() > request.deadline {
            return Err(OverlayError::TopologyConflict(
                "the join request expired".to_owned(),
            ));
        }
        Ok(())
    }

    /// Splits our zone with the joining peer. The split is only announced once the joining peer
    /// received its grant, otherwise it is undone.
    async fn split_zone(
        &mut self,
        request: JoinRequest,
        reply: Option<oneshot::Sender<PeerReply>>,
    ) {
        self.state = PeerState::Splitting;
        let checkpoint = self.checkpoint();
        let joiner = request.joiner;
        match self.give_half(&request).await {
            Ok(split) => {
                let Split {
                    grant,
                    notify,
                    recipients,
                    released,
                } = split;
                match confirm(reply, PeerReply::Granted(Box::new(grant))) {
                    Ok(()) => {
                        info!("Peer {} split its zone with {joiner}", self.id);
                        for peer in recipients {
                            self.send_to_neighbor(peer, Message::SplitNotify(notify.clone()));
                        }
                    }
                    Err(reply) => {
                        warn!(
                            "Peer {} takes back the zone granted to {joiner}, which stopped waiting",
                            self.id
                        );
                        self.rollback(checkpoint);
                        let quads = match reply {
                            PeerReply::Granted(grant) => {
                                let JoinGrant { quads, .. } = *grant;
                                quads
                            }
                            _ => Vec::new(),
                        };
                        self.reclaim(quads, released).await;
                    }
                }
            }
            Err(error) => {
                self.rollback(checkpoint);
                respond(reply, Err(error));
            }
        }
        self.state = PeerState::Active;
    }

    /// Gives the half of our zone containing the target to the joining peer, together with the
    /// quadruples and subscriptions of that half.
    async fn give_half(&mut self, request: &JoinRequest) -> Result<Split, OverlayError> {
        let zone = self.zone()?.clone();
        let dimension = self
            .config
            .split_strategy
            .choose_dimension(&zone, &self.history);
        let (lower, upper) = zone.split(dimension)?;
        let (kept, given, kept_direction) = if lower.contains(&request.target) {
            (upper, lower, Direction::Upper)
        } else {
            (lower, upper, Direction::Lower)
        };

        let old_neighbors = self.neighbors.entries();
        let mut joiner_history = self.history.clone();
        joiner_history.push(SplitEntry::new(dimension, kept_direction.opposite()));
        self.history
            .push(SplitEntry::new(dimension, kept_direction));
        for removed in self.neighbors.retain_adjacent(&kept) {
            self.second_hand.remove(&removed.peer);
        }
        self.zone = Some(kept.clone());

        let joined = NeighborEntry {
            peer: request.joiner,
            zone: given.clone(),
            history: joiner_history.clone(),
            successor: Some(self.id),
        };
        self.neighbors
            .insert(dimension, kept_direction.opposite(), joined.clone())?;
        let owner = self.entry()?;
        debug!(
            "Peer {} splits its zone with {} on dimension {dimension}",
            self.id, request.joiner
        );

        let quads = {
            let mapper = &self.mapper;
            let given = &given;
            self.store
                .extract(&|quad: &Quad| {
                    mapper
                        .coordinate(quad)
                        .is_ok_and(|coordinate| given.contains(&coordinate))
                })
                .await?
        };
        let mapper = &self.mapper;
        let subscriptions = self
            .subscriptions
            .select(|subscription| validates(subscription, mapper, &given));
        let released = self
            .subscriptions
            .retain(|subscription| validates(subscription, mapper, &kept));

        let mut neighbors = old_neighbors
            .iter()
            .filter(|entry| given.adjacency(&entry.zone).is_some())
            .cloned()
            .collect::<Vec<_>>();
        neighbors.push(owner.clone());

        Ok(Split {
            grant: JoinGrant {
                zone: given,
                history: joiner_history,
                neighbors,
                quads,
                subscriptions,
            },
            notify: SplitNotify { owner, joined },
            recipients: old_neighbors.into_iter().map(|entry| entry.peer).collect(),
            released,
        })
    }

    /// Stores again what a split that was undone gave away.
    async fn reclaim(&mut self, quads: Vec<Quad>, released: Vec<Subscription>) {
        for subscription in released {
            self.subscriptions.insert(subscription);
        }
        if let Err(error) = self.store.extend(quads).await {
            warn!("Peer {} lost quadruples while undoing a split: {error}", self.id);
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            zone: self.zone.clone(),
            history: self.history.clone(),
            neighbors: self.neighbors.clone(),
            second_hand: self.second_hand.clone(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        let Checkpoint {
            zone,
            history,
            neighbors,
            second_hand,
        } = checkpoint;
        self.zone = zone;
        self.history = history;
        self.neighbors = neighbors;
        self.second_hand = second_hand;
    }

    pub(super) fn handle_split_notify(&mut self, notify: SplitNotify) {
        if !self.is_active() {
            return;
        }
        self.refresh_neighbor(notify.owner);
        self.refresh_neighbor(notify.joined);
    }

    /// Leaves the network. While the topology is in flux, the attempt is repeated after a random
    /// back-off. In the meantime, the peer stays active and processes its mailbox.
    pub(super) async fn leave(
        &mut self,
        attempt: usize,
        reply: Option<oneshot::Sender<PeerReply>>,
    ) {
        if !self.is_active() {
            respond(reply, Err(OverlayError::PeerNotActivated(self.id)));
            return;
        }
        if self.neighbors.is_empty() {
            info!("Peer {} was the last peer of its network", self.id);
            self.terminate();
            respond(reply, Ok(PeerReply::Ack));
            return;
        }

        self.state = PeerState::Leaving;
        let deadline = Instant::now() + self.config.request_timeout;
        match self.vacate(0, deadline).await {
            Ok(successor) => {
                info!("Peer {} left, {} took over its zone", self.id, successor.peer);
                self.terminate();
                respond(reply, Ok(PeerReply::Ack));
            }
            Err(error) if error.is_conflict() && attempt < self.config.leave_retries.max(1) => {
                self.state = PeerState::Active;
                let backoff = self.leave_backoff();
                warn!(
                    "Peer {} failed to leave (attempt {attempt}): {error}. Retrying in {backoff:?}",
                    self.id
                );
                self.retry_leave(attempt + 1, reply, backoff);
            }
            Err(error) => {
                self.state = PeerState::Active;
                respond(reply, Err(error));
            }
        }
    }

    fn retry_leave(
        &self,
        attempt: usize,
        reply: Option<oneshot::Sender<PeerReply>>,
        backoff: Duration,
    ) {
        let transport = Arc::clone(&self.transport);
        let id = self.id;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let envelope = Envelope {
                message: Message::Leave { attempt },
                reply,
            };
            if let Err(undeliverable) = transport.deliver(id, envelope) {
                respond(
                    undeliverable.envelope.reply,
                    Err(OverlayError::PeerNotActivated(id)),
                );
            }
        });
    }

    fn leave_backoff(&self) -> Duration {
        let min = u64::try_from(self.config.leave_retry_min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.config.leave_retry_max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(min..=max.max(min)))
    }

    fn terminate(&mut self) {
        self.transport.unregister(self.id);
        self.clear_zone();
        self.state = PeerState::Terminated;
    }

    /// Gives our zone to our successor: the sibling merges it, any other successor vacates its
    /// own zone first and then adopts ours. Returns the entry of the successor after the transfer.
    pub(super) async fn vacate(
        &mut self,
        depth: usize,
        deadline: Instant,
    ) -> Result<NeighborEntry, OverlayError> {
        if depth > self.config.max_handoff_depth {
            return Err(OverlayError::TopologyConflict(format!(
                "the hand-off chain exceeds {} peers",
                self.config.max_handoff_depth
            )));
        }
        let zone = self.zone()?.clone();
        let Some(last) = self.history.last().copied() else {
            return Err(OverlayError::TopologyConflict(
                "the zone covering the whole space cannot be vacated".to_owned(),
            ));
        };
        let Some(successor) = self
            .neighbors
            .get(last.dimension, last.direction.opposite())
            .next()
            .cloned()
        else {
            return Err(OverlayError::TopologyConflict(format!(
                "peer {} has no successor",
                self.id
            )));
        };

        let transfer = self.transfer(zone.clone()).await?;
        let merge = self.history.sibling().as_ref() == Some(&successor.history)
            && zone.is_sibling(&successor.zone);
        let message = if merge {
            Message::Merge(Box::new(MergeRequest {
                transfer: transfer.clone(),
                deadline,
            }))
        } else {
            Message::Handoff(Box::new(HandoffRequest {
                transfer: transfer.clone(),
                deadline,
                depth: depth + 1,
            }))
        };
        debug!(
            "Peer {} hands its zone to {} (merge: {merge})",
            self.id, successor.peer
        );

        let timeout = deadline.saturating_duration_since(Instant::now());
        match self
            .transport
            .request(successor.peer, message, timeout)
            .await
        {
            Ok(PeerReply::Transferred(entry)) => {
                self.clear_zone();
                Ok(entry)
            }
            Ok(PeerReply::Failed(error)) => {
                self.restore(transfer).await;
                Err(error)
            }
            Ok(_) => {
                self.restore(transfer).await;
                Err(OverlayError::UnexpectedReply(successor.peer))
            }
            Err(error) => {
                match error {
                    TransportError::Unreachable(_) => self.neighbor_failed(successor.peer),
                    // The successor left and its replacement announces itself.
                    TransportError::NoReply(_) => self.forget_neighbor(&successor.peer),
                    _ => {}
                }
                self.restore(transfer).await;
                Err(error.into())
            }
        }
    }

    /// Moves the content of our zone into a transfer. [Self::restore] undoes this.
    async fn transfer(&mut self, zone: Zone) -> Result<ZoneTransfer, OverlayError> {
        let quads = self.store.extract(&|_: &Quad| true).await?;
        Ok(ZoneTransfer {
            from: self.id,
            zone,
            history: self.history.clone(),
            neighbors: self.neighbors.entries(),
            quads,
            subscriptions: self.subscriptions.drain(),
        })
    }

    async fn restore(&mut self, transfer: ZoneTransfer) {
        for subscription in transfer.subscriptions {
            self.subscriptions.insert(subscription);
        }
        if let Err(error) = self.store.extend(transfer.quads).await {
            warn!("Peer {} lost quadruples while restoring its zone: {error}", self.id);
        }
    }

    fn clear_zone(&mut self) {
        self.zone = None;
        self.history = SplitHistory::default();
        self.neighbors.clear();
        self.second_hand.clear();
    }

    fn check_transfer(&self, deadline: Instant) -> Result<(), OverlayError> {
        if !self.is_active() {
            return Err(OverlayError::TopologyConflict(format!(
                "peer {} is {}",
                self.id, self.state
            )));
        }
        if Instant::now() > deadline {
            return Err(OverlayError::TopologyConflict(
                "the transfer request expired".to_owned(),
            ));
        }
        Ok(())
    }

    /// Merges the zone of our leaving sibling. The merge is undone if the sibling stopped waiting
    /// for our answer, as it then keeps its zone.
    pub(super) async fn handle_merge(
        &mut self,
        request: MergeRequest,
        reply: Option<oneshot::Sender<PeerReply>>,
    ) {
        let MergeRequest { transfer, deadline } = request;
        let checkpoint = self.checkpoint();
        let entry = match self.merge_sibling(&transfer, deadline) {
            Ok(entry) => entry,
            Err(error) => {
                self.rollback(checkpoint);
                respond(reply, Err(error));
                return;
            }
        };
        if confirm(reply, PeerReply::Transferred(entry)).is_err() {
            warn!(
                "Peer {} undoes the merge with {}, which stopped waiting",
                self.id, transfer.from
            );
            self.rollback(checkpoint);
            return;
        }

        self.state = PeerState::Merging;
        self.absorb(transfer).await;
        self.state = PeerState::Active;
        info!("Peer {} merged the zone of its sibling", self.id);
    }

    fn merge_sibling(
        &mut self,
        transfer: &ZoneTransfer,
        deadline: Instant,
    ) -> Result<NeighborEntry, OverlayError> {
        self.check_transfer(deadline)?;
        let zone = self.zone()?.clone();
        if transfer.history.sibling().as_ref() != Some(&self.history) {
            return Err(OverlayError::TopologyConflict(format!(
                "peer {} is not the sibling of {}",
                self.id, transfer.from
            )));
        }
        let merged = zone.merge(&transfer.zone).map_err(|error| {
            OverlayError::TopologyConflict(format!("cannot merge {}: {error}", transfer.zone))
        })?;
        self.zone = Some(merged);
        self.history.pop();
        self.adopt_neighbors(transfer);
        self.entry()
    }

    /// Vacates our zone and adopts the zone of a leaving peer.
    ///
    /// Our own zone is gone once the vacation succeeded. If the leaving peer stops waiting before
    /// our answer arrives, it keeps its zone and we join the network again.
    pub(super) async fn handle_handoff(
        &mut self,
        request: HandoffRequest,
        reply: Option<oneshot::Sender<PeerReply>>,
    ) {
        let HandoffRequest {
            transfer,
            deadline,
            depth,
        } = request;
        if let Err(error) = self.check_transfer(deadline) {
            respond(reply, Err(error));
            return;
        }
        if reply.as_ref().map_or(true, oneshot::Sender::is_closed) {
            debug!("Peer {} ignores a hand-off nobody waits for", self.id);
            return;
        }

        self.state = PeerState::Merging;
        let inner_deadline = deadline
            .checked_sub(self.config.anycast_hop_margin)
            .unwrap_or(deadline);
        let successor = match self.vacate(depth, inner_deadline).await {
            Ok(successor) => successor,
            Err(error) => {
                self.state = PeerState::Active;
                respond(reply, Err(error));
                return;
            }
        };

        let landmark = successor.peer;
        self.zone = Some(transfer.zone.clone());
        self.history = transfer.history.clone();
        self.refresh_neighbor(successor);
        self.adopt_neighbors(&transfer);
        let delivered = match self.entry() {
            Ok(entry) => confirm(reply, PeerReply::Transferred(entry)).is_ok(),
            Err(error) => {
                respond(reply, Err(error));
                false
            }
        };
        if !delivered {
            warn!(
                "Peer {} gave its zone away but {} stopped waiting",
                self.id, transfer.from
            );
            self.rejoin(landmark).await;
            return;
        }

        self.absorb(transfer).await;
        self.state = PeerState::Active;
        info!(
            "Peer {} adopted a zone and handed its own zone away",
            self.id
        );
    }

    /// Joins the network again through `landmark` after a hand-off that was not completed.
    async fn rejoin(&mut self, landmark: PeerId) {
        self.clear_zone();
        self.state = PeerState::Joining;
        let attempts = self.config.leave_retries.max(1);
        for attempt in 1..=attempts {
            match self.join_network(landmark, None).await {
                Ok(()) => {
                    info!("Peer {} rejoined through {landmark}", self.id);
                    return;
                }
                Err(error) => {
                    warn!(
                        "Peer {} failed to rejoin (attempt {attempt}): {error}",
                        self.id
                    );
                    tokio::time::sleep(self.leave_backoff()).await;
                }
            }
        }
    }

    /// Takes over the neighbors of a transferred zone. Our zone must already cover the
    /// transferred zone.
    fn adopt_neighbors(&mut self, transfer: &ZoneTransfer) {
        self.forget_neighbor(&transfer.from);
        for entry in &transfer.neighbors {
            if entry.peer != transfer.from && !self.neighbors.contains(&entry.peer) {
                self.refresh_neighbor(entry.clone());
            }
        }
        self.refile_neighbors();
    }

    /// Takes over the content of a transferred zone and tells our neighbors.
    async fn absorb(&mut self, transfer: ZoneTransfer) {
        let ZoneTransfer {
            from,
            quads,
            subscriptions,
            ..
        } = transfer;
        for subscription in subscriptions {
            self.subscriptions.insert(subscription);
        }
        if let Err(error) = self.store.extend(quads).await {
            warn!("Peer {} lost transferred quadruples: {error}", self.id);
        }
        self.announce(from);
    }

    fn refile_neighbors(&mut self) {
        let Some(zone) = self.zone.clone() else {
            return;
        };
        for removed in self.neighbors.retain_adjacent(&zone) {
            self.second_hand.remove(&removed.peer);
        }
    }

    /// Tells our neighbors that we replaced `left`.
    fn announce(&mut self, left: PeerId) {
        let Ok(replacement) = self.entry() else {
            return;
        };
        for peer in self.neighbors.peers() {
            let notify = LeaveNotify {
                left,
                replacement: replacement.clone(),
            };
            self.send_to_neighbor(peer, Message::LeaveNotify(notify));
        }
    }

    /// Repairs the zone of a failed neighbor that designated us as its successor.
    pub(super) async fn take_over(&mut self, failed: NeighborEntry) {
        if !self.is_active() {
            return;
        }
        let Ok(zone) = self.zone().cloned() else {
            return;
        };
        let former = self.second_hand.remove(&failed.peer).unwrap_or_default();
        warn!(
            "Peer {} takes over the zone {} of the failed peer {}",
            self.id, failed.zone, failed.peer
        );

        self.state = PeerState::Merging;
        if failed.history.sibling().as_ref() == Some(&self.history) && zone.is_sibling(&failed.zone)
        {
            match zone.merge(&failed.zone) {
                Ok(merged) => {
                    self.zone = Some(merged);
                    self.history.pop();
                }
                Err(error) => {
                    warn!("Peer {} cannot merge a failed sibling: {error}", self.id);
                    self.state = PeerState::Active;
                    return;
                }
            }
        } else {
            let deadline = Instant::now() + self.config.request_timeout;
            match self.vacate(0, deadline).await {
                Ok(successor) => {
                    self.zone = Some(failed.zone.clone());
                    self.history = failed.history.clone();
                    self.refresh_neighbor(successor);
                }
                Err(error) => {
                    warn!(
                        "Peer {} cannot vacate its zone to repair {}: {error}",
                        self.id, failed.peer
                    );
                    self.state = PeerState::Active;
                    return;
                }
            }
        }

        for entry in &former {
            if entry.peer != failed.peer && !self.neighbors.contains(&entry.peer) {
                self.refresh_neighbor(entry.clone());
            }
        }
        self.refile_neighbors();
        self.state = PeerState::Active;

        let Ok(entry) = self.entry() else {
            return;
        };
        let mut recipients = former
            .iter()
            .map(|entry| entry.peer)
            .collect::<BTreeSet<_>>();
        recipients.extend(self.neighbors.peers());
        recipients.remove(&self.id);
        recipients.remove(&failed.peer);
        for peer in recipients {
            let takeover = Takeover {
                failed: failed.peer,
                entry: entry.clone(),
            };
            self.send_to_neighbor(peer, Message::Takeover(takeover));
        }
        info!("Peer {} repaired the zone of {}", self.id, failed.peer);
    }

    pub(super) fn handle_takeover(&mut self, takeover: Takeover) {
        if !self.is_active() {
            return;
        }
        let Takeover { failed, entry } = takeover;
        self.forget_neighbor(&failed);
        let peer = entry.peer;
        self.refresh_neighbor(entry);
        if self.neighbors.contains(&peer) {
            if let Some(update) = self.neighbor_update() {
                self.send_to_neighbor(peer, Message::NeighborUpdate(update));
            }
        }
    }
}

/// The topology of a peer before it changed its zone.
struct Checkpoint {
    zone: Option<Zone>,
    history: SplitHistory,
    neighbors: NeighborTable,
    second_hand: FxHashMap<PeerId, Vec<NeighborEntry>>,
}

/// A split that is announced once the joining peer received its grant.
struct Split {
    grant: JoinGrant,
    notify: SplitNotify,
    recipients: Vec<PeerId>,
    /// The subscriptions that no longer concern our zone.
    released: Vec<Subscription>,
}

/// Whether the next atomic query of `subscription` must be indexed at the owner of `zone`.
fn validates(subscription: &Subscription, mapper: &SemanticMapper, zone: &Zone) -> bool {
    subscription
        .next_query()
        .is_some_and(|query| AtomicQueryValidator::new(query, mapper).validates(zone))
}
