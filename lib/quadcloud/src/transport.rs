use crate::{Envelope, Message, PeerReply, TransportError, Undeliverable};
use async_trait::async_trait;
use dashmap::DashMap;
use quadcloud_can::PeerId;
use quadcloud_semantic::{Notification, SinkId};
use rustc_hash::FxHasher;
use std::fmt::Debug;
use std::hash::BuildHasherDefault;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Delivers messages to peers and notifications to sinks.
///
/// Delivery happens at most once per attempt. There are no retries, callers decide how to react
/// to unreachable peers.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Hands `envelope` to the mailbox of `peer`. The envelope is returned if the peer is
    /// unreachable.
    fn deliver(&self, peer: PeerId, envelope: Envelope) -> Result<(), Undeliverable>;

    /// Makes `peer` unreachable. Pending and future deliveries to it fail.
    fn unregister(&self, peer: PeerId);

    /// Delivers `notification` to `sink`.
    fn notify(&self, sink: SinkId, notification: Notification) -> Result<(), TransportError>;

    /// Registers a sink that receives notifications via `sender`.
    fn register_sink(&self, sink: SinkId, sender: mpsc::UnboundedSender<Notification>);

    fn unregister_sink(&self, sink: SinkId);

    /// Sends `message` to `peer` without waiting for a reply.
    fn send(&self, peer: PeerId, message: Message) -> Result<(), TransportError> {
        Ok(self.deliver(peer, Envelope::new(message))?)
    }

    /// Sends `message` to `peer` and waits at most `timeout` for the reply.
    ///
    /// The outcome is definite: if this returns an error, sending the reply fails on the side of
    /// `peer`, which can therefore undo what it did for the request.
    async fn request(
        &self,
        peer: PeerId,
        message: Message,
        timeout: Duration,
    ) -> Result<PeerReply, TransportError> {
        let (sender, mut receiver) = oneshot::channel();
        self.deliver(peer, Envelope::with_reply(message, sender))?;
        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::NoReply(peer)),
            Err(_) => {
                // A reply sent before closing is still accepted.
                receiver.close();
                receiver
                    .try_recv()
                    .map_err(|_| TransportError::Timeout(peer))
            }
        }
    }
}

type Mailboxes = DashMap<PeerId, mpsc::UnboundedSender<Envelope>, BuildHasherDefault<FxHasher>>;
type Sinks = DashMap<SinkId, mpsc::UnboundedSender<Notification>, BuildHasherDefault<FxHasher>>;

/// Connects peers that run in the same process.
///
/// The transport holds the only sender of each mailbox. Unregistering a peer therefore closes its
/// mailbox, which stops the peer after it processed the envelopes already delivered. This is how
/// crashes are simulated.
#[derive(Debug, Default)]
pub struct LocalTransport {
    mailboxes: Mailboxes,
    sinks: Sinks,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the mailbox of `peer`.
    pub fn register(&self, peer: PeerId, mailbox: mpsc::UnboundedSender<Envelope>) {
        self.mailboxes.insert(peer, mailbox);
    }

    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.mailboxes.contains_key(peer)
    }

    /// The identifiers of every reachable peer.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers = self
            .mailboxes
            .iter()
            .map(|entry| *entry.key())
            .collect::<Vec<_>>();
        peers.sort_unstable();
        peers
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn deliver(&self, peer: PeerId, envelope: Envelope) -> Result<(), Undeliverable> {
        let Some(mailbox) = self.mailboxes.get(&peer).map(|entry| entry.value().clone()) else {
            return Err(Undeliverable { peer, envelope });
        };
        mailbox.send(envelope).map_err(|error| {
            self.mailboxes.remove(&peer);
            Undeliverable {
                peer,
                envelope: error.0,
            }
        })
    }

    fn unregister(&self, peer: PeerId) {
        self.mailboxes.remove(&peer);
    }

    fn notify(&self, sink: SinkId, notification: Notification) -> Result<(), TransportError> {
        let Some(sender) = self.sinks.get(&sink).map(|entry| entry.value().clone()) else {
            return Err(TransportError::UnknownSink(sink));
        };
        sender.send(notification).map_err(|_| {
            self.sinks.remove(&sink);
            TransportError::UnknownSink(sink)
        })
    }

    fn register_sink(&self, sink: SinkId, sender: mpsc::UnboundedSender<Notification>) {
        self.sinks.insert(sink, sender);
    }

    fn unregister_sink(&self, sink: SinkId) {
        self.sinks.remove(&sink);
    }
}
