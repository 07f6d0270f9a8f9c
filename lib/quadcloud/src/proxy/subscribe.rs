use crate::proxy::EntryPoints;
use crate::{AnycastPayload, OverlayConfig, OverlayError, PeerHandle, Transport};
use dashmap::DashMap;
use quadcloud_can::{KeyValidator, RoutingKey};
use quadcloud_model::{Expression, Variable};
use quadcloud_semantic::{
    AtomicQueryValidator, DecomposedQuery, DecompositionError, ExpressionEvaluator, Notification,
    QueryForm, SinkId, SparqlDecomposer, Subscription, SubscriptionId,
};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use tokio::sync::mpsc;

type Sinks = DashMap<SubscriptionId, SinkId, BuildHasherDefault<FxHasher>>;

/// Registers standing SPARQL queries. Every compound event that matches all atomic queries of a
/// subscription is delivered to the receiver returned by [SubscribeProxy::subscribe].
#[derive(Clone, Debug)]
pub struct SubscribeProxy {
    entries: EntryPoints,
    decomposer: SparqlDecomposer,
    transport: Arc<dyn Transport>,
    sinks: Arc<Sinks>,
}

impl SubscribeProxy {
    pub fn try_new(
        config: Arc<OverlayConfig>,
        peers: Vec<PeerHandle>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, OverlayError> {
        let entries = EntryPoints::try_new(config, peers)?;
        let decomposer = SparqlDecomposer::new(entries.mapper.clone());
        Ok(Self {
            entries,
            decomposer,
            transport,
            sinks: Arc::default(),
        })
    }

    /// Subscribes to the SELECT or ASK query `sparql`.
    ///
    /// The filters that span several atomic queries and the projection are applied before a
    /// notification reaches the returned receiver. Dropping the receiver eventually removes the
    /// subscription from the network.
    pub async fn subscribe(
        &self,
        sparql: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Notification>), OverlayError> {
        let query = self.decomposer.decompose(sparql)?;
        let projection = match &query.form {
            QueryForm::Select { projection } => projection.clone(),
            QueryForm::Ask => Vec::new(),
            QueryForm::Construct { .. } | QueryForm::Describe { .. } => {
                return Err(DecompositionError::Unsupported {
                    query: sparql.to_owned(),
                    construct: "a subscription with a CONSTRUCT or DESCRIBE form",
                }
                .into());
            }
        };

        let sink = SinkId::new_random();
        let (raw_sender, raw_receiver) = mpsc::unbounded_channel();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.transport.register_sink(sink, raw_sender);
        tokio::spawn(forward_notifications(
            raw_receiver,
            sender,
            query.filters.clone(),
            projection,
        ));

        let subscription = Subscription::new(query.atomic_queries.clone(), sink);
        let id = subscription.id;
        if let Err(error) = self.index(&query, subscription).await {
            self.transport.unregister_sink(sink);
            return Err(error);
        }
        self.sinks.insert(id, sink);
        tracing::info!("Registered subscription {id} for sink {sink}");
        Ok((id, receiver))
    }

    /// Removes the subscription `id` and all of its rewrites from the network. Returns the number
    /// of removed index entries.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<usize, OverlayError> {
        let validator = Arc::new(KeyValidator::new(RoutingKey::broadcast(
            self.entries.config.dimensions,
        )));
        let reply = self
            .entries
            .anycast(validator, AnycastPayload::Unsubscribe(id))
            .await?;
        if let Some((_, sink)) = self.sinks.remove(&id) {
            self.transport.unregister_sink(sink);
        }
        Ok(reply.result.count())
    }

    async fn index(
        &self,
        query: &DecomposedQuery,
        subscription: Subscription,
    ) -> Result<(), OverlayError> {
        let Some(first) = query.atomic_queries.first() else {
            return Err(DecompositionError::EmptyPattern.into());
        };
        let validator = Arc::new(AtomicQueryValidator::new(first, &self.entries.mapper));
        let reply = self
            .entries
            .anycast(validator, AnycastPayload::SubscribeAtomicQueries(subscription))
            .await?;
        if !reply.complete {
            tracing::warn!("Subscription was only indexed partially");
        }
        Ok(())
    }
}

/// Applies the remaining filters and the projection to the notifications of one sink.
async fn forward_notifications(
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    sender: mpsc::UnboundedSender<Notification>,
    filters: Vec<Expression>,
    projection: Vec<Variable>,
) {
    while let Some(mut notification) = notifications.recv().await {
        let evaluator = ExpressionEvaluator::new(&notification.bindings);
        if !filters.iter().all(|filter| evaluator.accepts(filter)) {
            continue;
        }
        notification
            .bindings
            .retain(|variable, _| projection.contains(variable));
        if sender.send(notification).is_err() {
            break;
        }
    }
}
