use crate::{AtomicQuery, Bindings};
use quadcloud_model::{CompoundEvent, ModelError, Quad, QuadPattern};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Identifies a subscription. Rewrites of a subscription get a fresh identifier but keep the
/// identifier of the original subscription as their origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the sink notifications of a subscription are delivered to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(Uuid);

impl SinkId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SinkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A standing query: the atomic queries that still have to be matched, in order.
///
/// The first atomic query is indexed at every zone it intersects. Once it is matched by a
/// quadruple, the subscription is either complete or rewritten into a subscription for the
/// remaining atomic queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub origin: SubscriptionId,
    pub queries: Vec<AtomicQuery>,
    pub sink: SinkId,
    /// The quadruples matched so far, in matching order.
    pub matched: Vec<Quad>,
    pub bindings: Bindings,
}

/// A notification about a fully matched subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// The identifier of the original subscription.
    pub subscription_id: SubscriptionId,
    pub event: CompoundEvent,
    pub bindings: Bindings,
}

/// The result of matching the first atomic query of a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    Complete(Notification),
    Rewrite(Subscription),
}

impl Subscription {
    /// Creates a new subscription for `queries`.
    pub fn new(queries: Vec<AtomicQuery>, sink: SinkId) -> Self {
        let id = SubscriptionId::new_random();
        Self {
            id,
            origin: id,
            queries,
            sink,
            matched: Vec::new(),
            bindings: Bindings::new(),
        }
    }

    /// The atomic query that must be matched next.
    pub fn next_query(&self) -> Option<&AtomicQuery> {
        self.queries.first()
    }

    /// The index signature of the next atomic query.
    pub fn signature(&self) -> Option<QuadPattern> {
        self.next_query().map(AtomicQuery::pattern)
    }

    /// Advances the subscription with `quad`, which matched the next atomic query with
    /// `bindings`.
    pub fn advance(&self, quad: &Quad, bindings: Bindings) -> Result<Advance, ModelError> {
        let mut all_bindings = self.bindings.clone();
        all_bindings.extend(bindings);
        let mut matched = self.matched.clone();
        matched.push(quad.clone());

        if self.queries.len() <= 1 {
            return Ok(Advance::Complete(Notification {
                subscription_id: self.origin,
                event: CompoundEvent::new(matched)?,
                bindings: all_bindings,
            }));
        }

        let queries = self.queries[1..]
            .iter()
            .map(|query| query.substitute(&all_bindings))
            .collect();
        Ok(Advance::Rewrite(Subscription {
            id: SubscriptionId::new_random(),
            origin: self.origin,
            queries,
            sink: self.sink,
            matched,
            bindings: all_bindings,
        }))
    }
}
