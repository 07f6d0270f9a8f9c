use crate::{Advance, ExpressionEvaluator, Notification, SinkId, Subscription, SubscriptionId};
use quadcloud_model::{quad_terms, Quad, QuadPattern};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// What has to happen after a stored quadruple matched an indexed subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The subscription is fully matched, the sink must be notified.
    Notify {
        sink: SinkId,
        notification: Notification,
    },
    /// The subscription matched partially. The rewrite must be indexed wherever its next atomic
    /// query is routed.
    Rewrite(Subscription),
}

/// The subscriptions indexed by a peer, keyed by the signature of their next atomic query.
///
/// A stored quadruple is matched against the subscriptions whose signature it satisfies. There
/// are at most 16 such signatures per quadruple (every subset of bound positions).
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    subscriptions: FxHashMap<SubscriptionId, Subscription>,
    by_signature: FxHashMap<QuadPattern, BTreeSet<SubscriptionId>>,
    failures: FxHashMap<SinkId, usize>,
}

impl SubscriptionIndex {
    /// Indexes `subscription`. Returns false if it was already indexed or has no atomic query
    /// left.
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        let Some(signature) = subscription.signature() else {
            return false;
        };
        if self.subscriptions.contains_key(&subscription.id) {
            return false;
        }
        self.by_signature
            .entry(signature)
            .or_default()
            .insert(subscription.id);
        self.subscriptions.insert(subscription.id, subscription);
        true
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let subscription = self.subscriptions.remove(id)?;
        if let Some(signature) = subscription.signature() {
            if let Some(ids) = self.by_signature.get_mut(&signature) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_signature.remove(&signature);
                }
            }
        }
        Some(subscription)
    }

    /// Removes a subscription together with all of its rewrites.
    pub fn remove_origin(&mut self, origin: &SubscriptionId) -> Vec<Subscription> {
        self.remove_where(|subscription| &subscription.origin == origin)
    }

    /// Removes all subscriptions notifying `sink`.
    pub fn remove_sink(&mut self, sink: &SinkId) -> Vec<Subscription> {
        self.failures.remove(sink);
        self.remove_where(|subscription| &subscription.sink == sink)
    }

    /// Keeps only the subscriptions accepted by `predicate` and returns the others.
    pub fn retain(&mut self, predicate: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        self.remove_where(|subscription| !predicate(subscription))
    }

    /// Copies the subscriptions accepted by `predicate`.
    pub fn select(&self, predicate: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        self.subscriptions
            .values()
            .filter(|subscription| predicate(subscription))
            .cloned()
            .collect()
    }

    /// Matches `quad` against the indexed subscriptions.
    ///
    /// Matched subscriptions stay indexed: a standing query is matched by every future quadruple.
    pub fn matching(&self, quad: &Quad) -> Vec<MatchOutcome> {
        let Ok(terms) = quad_terms(quad) else {
            return Vec::new();
        };

        let mut outcomes = Vec::new();
        for mask in 0..16_u8 {
            let signature = QuadPattern::from_terms(std::array::from_fn(|i| {
                (mask & (1 << i) != 0).then(|| terms[i].clone())
            }));
            let Some(ids) = self.by_signature.get(&signature) else {
                continue;
            };
            for subscription in ids.iter().filter_map(|id| self.subscriptions.get(id)) {
                if let Some(outcome) = Self::probe(subscription, quad) {
                    outcomes.push(outcome);
                }
            }
        }
        outcomes
    }

    /// Matches `quad` against the next atomic query of `subscription`, which does not need to be
    /// indexed.
    pub fn probe(subscription: &Subscription, quad: &Quad) -> Option<MatchOutcome> {
        let query = subscription.next_query()?;
        let bindings = query.matches(quad)?;

        let mut solution = subscription.bindings.clone();
        solution.extend(bindings.clone());
        let evaluator = ExpressionEvaluator::new(&solution);
        if !query.filters().iter().all(|filter| evaluator.accepts(filter)) {
            return None;
        }

        match subscription.advance(quad, bindings) {
            Ok(Advance::Complete(notification)) => Some(MatchOutcome::Notify {
                sink: subscription.sink,
                notification,
            }),
            Ok(Advance::Rewrite(rewrite)) => Some(MatchOutcome::Rewrite(rewrite)),
            Err(error) => {
                tracing::warn!("Dropping match of subscription {}: {error}", subscription.id);
                None
            }
        }
    }

    /// Records a failed delivery to `sink` and returns the number of consecutive failures.
    pub fn record_failure(&mut self, sink: SinkId) -> usize {
        let failures = self.failures.entry(sink).or_default();
        *failures += 1;
        *failures
    }

    pub fn record_success(&mut self, sink: &SinkId) {
        self.failures.remove(sink);
    }

    /// Removes and returns every subscription.
    pub fn drain(&mut self) -> Vec<Subscription> {
        self.by_signature.clear();
        self.failures.clear();
        self.subscriptions.drain().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn remove_where(&mut self, predicate: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        let ids = self
            .subscriptions
            .values()
            .filter(|subscription| predicate(subscription))
            .map(|subscription| subscription.id)
            .collect::<Vec<_>>();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{DopingFunction, SemanticMapper, SparqlDecomposer};
    use quadcloud_model::{Literal, NamedNode, Term, Variable};

    fn subscription(sparql: &str) -> Subscription {
        let decomposer = SparqlDecomposer::new(SemanticMapper::new(
            DopingFunction::PrefixRemoval,
            '0',
            '{',
            64,
        ));
        let decomposed = decomposer.decompose(sparql).unwrap();
        Subscription::new(decomposed.atomic_queries, SinkId::new_random())
    }

    fn quad(subject: &str, predicate: &str, object: impl Into<Term>) -> Quad {
        Quad::new(
            NamedNode::new_unchecked(subject),
            NamedNode::new_unchecked(predicate),
            object,
            NamedNode::new_unchecked("http://example.org/g"),
        )
    }

    #[test]
    fn single_query_subscription_notifies() {
        let mut index = SubscriptionIndex::default();
        let subscription = subscription(
            "SELECT ?o WHERE { GRAPH <http://example.org/g> { <http://example.org/s> <http://example.org/p> ?o } }",
        );
        let origin = subscription.origin;
        assert!(index.insert(subscription));

        let outcomes = index.matching(&quad(
            "http://example.org/s",
            "http://example.org/p",
            Literal::from(42),
        ));
        assert_eq!(outcomes.len(), 1);
        let MatchOutcome::Notify { notification, .. } = &outcomes[0] else {
            panic!("expected a notification");
        };
        assert_eq!(notification.subscription_id, origin);
        assert_eq!(
            notification.bindings.get(&Variable::new_unchecked("o")),
            Some(&Literal::from(42).into())
        );

        assert!(index
            .matching(&quad(
                "http://example.org/t",
                "http://example.org/p",
                Literal::from(42)
            ))
            .is_empty());
    }

    #[test]
    fn conjunction_is_rewritten() {
        let mut index = SubscriptionIndex::default();
        let subscription = subscription(
            "SELECT ?name WHERE { GRAPH <http://example.org/g> { ?s <http://example.org/knows> ?o . ?o <http://example.org/name> ?name } }",
        );
        let origin = subscription.origin;
        index.insert(subscription);

        let outcomes = index.matching(&quad(
            "http://example.org/a",
            "http://example.org/knows",
            NamedNode::new_unchecked("http://example.org/b"),
        ));
        let [MatchOutcome::Rewrite(rewrite)] = outcomes.as_slice() else {
            panic!("expected a rewrite");
        };
        assert_eq!(rewrite.origin, origin);
        assert_ne!(rewrite.id, origin);
        assert_eq!(rewrite.queries.len(), 1);
        assert_eq!(rewrite.matched.len(), 1);
        assert_eq!(
            rewrite.signature().unwrap().get(quadcloud_model::QuadPosition::Subject),
            Some(&NamedNode::new_unchecked("http://example.org/b").into())
        );

        let mut index = SubscriptionIndex::default();
        index.insert(rewrite.clone());
        let outcomes = index.matching(&quad(
            "http://example.org/b",
            "http://example.org/name",
            Literal::new_simple_literal("Bob"),
        ));
        let [MatchOutcome::Notify { notification, .. }] = outcomes.as_slice() else {
            panic!("expected a notification");
        };
        assert_eq!(notification.event.len(), 2);
        assert_eq!(notification.subscription_id, origin);
    }

    #[test]
    fn local_filters_are_applied() {
        let mut index = SubscriptionIndex::default();
        index.insert(subscription(
            "SELECT ?age WHERE { GRAPH <http://example.org/g> { ?s <http://example.org/age> ?age FILTER(?age > 18) } }",
        ));
        let young = quad("http://example.org/a", "http://example.org/age", Literal::from(12));
        let old = quad("http://example.org/a", "http://example.org/age", Literal::from(42));
        assert!(index.matching(&young).is_empty());
        assert_eq!(index.matching(&old).len(), 1);
    }

    #[test]
    fn remove_origin_removes_rewrites() {
        let mut index = SubscriptionIndex::default();
        let original = subscription(
            "SELECT * WHERE { GRAPH <http://example.org/g> { ?s <http://example.org/knows> ?o . ?o <http://example.org/knows> ?p } }",
        );
        let origin = original.origin;
        let sink = original.sink;
        index.insert(original.clone());
        let outcomes = index.matching(&quad(
            "http://example.org/a",
            "http://example.org/knows",
            NamedNode::new_unchecked("http://example.org/b"),
        ));
        for outcome in outcomes {
            if let MatchOutcome::Rewrite(rewrite) = outcome {
                index.insert(rewrite);
            }
        }
        assert_eq!(index.len(), 2);
        assert_eq!(index.record_failure(sink), 1);
        assert_eq!(index.remove_origin(&origin).len(), 2);
        assert!(index.is_empty());
    }
}
