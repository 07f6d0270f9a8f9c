use crate::proxy::{chain, combine, EntryPoints};
use crate::sparql::{construct, describe_targets, project, solutions};
use crate::{
    AnycastPayload, AnycastReply, OverlayConfig, OverlayError, PeerHandle, QueryResult,
    SparqlResponse,
};
use futures::future::join_all;
use quadcloud_model::{quad_terms, NamedNode, Quad, QuadPattern, QuadPosition, Variable};
use quadcloud_semantic::{
    AtomicQuery, AtomicQueryValidator, DecomposedQuery, QueryForm, QueryTerm, SparqlDecomposer,
};
use std::sync::Arc;

/// Stores, removes and retrieves quadruples, and evaluates SPARQL queries over the network.
#[derive(Clone, Debug)]
pub struct PutGetProxy {
    entries: EntryPoints,
    decomposer: SparqlDecomposer,
}

impl PutGetProxy {
    /// Creates a proxy that enters the network through `peers`.
    ///
    /// Fails if the network does not use the semantic coordinate space.
    pub fn try_new(
        config: Arc<OverlayConfig>,
        peers: Vec<PeerHandle>,
    ) -> Result<Self, OverlayError> {
        let entries = EntryPoints::try_new(config, peers)?;
        let decomposer = SparqlDecomposer::new(entries.mapper.clone());
        Ok(Self {
            entries,
            decomposer,
        })
    }

    /// Stores `quad`. Returns false if the quadruple was already stored.
    pub async fn add(&self, quad: Quad) -> Result<bool, OverlayError> {
        let reply = self
            .entries
            .anycast_quad(&quad, AnycastPayload::AddQuadruple(quad.clone()))
            .await?;
        Ok(reply.result.count() > 0)
    }

    /// Stores all `quads` in parallel. Returns the number of newly stored quadruples.
    pub async fn add_all(&self, quads: impl IntoIterator<Item = Quad>) -> Result<usize, OverlayError> {
        let replies = join_all(quads.into_iter().map(|quad| self.add(quad))).await;
        let mut added = 0;
        for reply in replies {
            added += usize::from(reply?);
        }
        Ok(added)
    }

    /// Removes `quad`. Returns false if the quadruple was not stored.
    pub async fn delete(&self, quad: Quad) -> Result<bool, OverlayError> {
        let reply = self
            .entries
            .anycast_quad(&quad, AnycastPayload::DeleteQuadruple(quad.clone()))
            .await?;
        Ok(reply.result.count() > 0)
    }

    pub async fn contains(&self, quad: &Quad) -> Result<bool, OverlayError> {
        let [graph, subject, predicate, object] = quad_terms(quad)?.map(QueryTerm::Bound);
        let query = AtomicQuery::new(graph, subject, predicate, object);
        let reply = self
            .entries
            .anycast_quad(quad, AnycastPayload::FindQuadruples(query))
            .await?;
        Ok(reply.result.count() > 0)
    }

    /// Returns the quadruples matching `pattern`. Unbound positions are wildcards.
    pub async fn find(
        &self,
        pattern: &QuadPattern,
    ) -> Result<SparqlResponse<Vec<Quad>>, OverlayError> {
        let [graph, subject, predicate, object] = QuadPosition::ALL.map(|position| {
            match pattern.get(position) {
                Some(term) => QueryTerm::Bound(term.clone()),
                None => QueryTerm::Variable(Variable::new_unchecked(position.to_string())),
            }
        });
        let query = AtomicQuery::new(graph, subject, predicate, object);
        let reply = self.find_atomic(query).await?;
        Ok(combine(vec![reply]).map(|replies| {
            replies
                .into_iter()
                .flat_map(|reply| reply.result.into_quads())
                .collect()
        }))
    }

    /// Evaluates a SPARQL query. The atomic queries are sent in parallel, their results are joined
    /// by this proxy.
    pub async fn execute_sparql(
        &self,
        sparql: &str,
    ) -> Result<SparqlResponse<QueryResult>, OverlayError> {
        let query = self.decomposer.decompose(sparql)?;
        tracing::debug!(
            "Decomposed query into {} atomic queries",
            query.atomic_queries.len()
        );

        let replies = join_all(
            query
                .atomic_queries
                .iter()
                .map(|atomic_query| self.find_atomic(atomic_query.clone())),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
        let response = combine(replies);
        let answers = response
            .result
            .iter()
            .map(|reply| reply.result.clone().into_quads())
            .collect::<Vec<_>>();
        let solutions = solutions(&query, &answers);

        match &query.form {
            QueryForm::Ask => Ok(response.map(|_| QueryResult::Ask(!solutions.is_empty()))),
            QueryForm::Select { .. } => {
                Ok(response.map(|_| QueryResult::Select(project(&query, solutions))))
            }
            QueryForm::Construct { .. } => {
                Ok(response.map(|_| QueryResult::Construct(construct(&query, solutions))))
            }
            QueryForm::Describe { .. } => {
                let targets = describe_targets(&query, solutions);
                let description = self.describe(&query, targets).await?;
                Ok(chain(response, &description)
                    .map(|_| QueryResult::Describe(description.result)))
            }
        }
    }

    /// Retrieves the quadruples whose subject is one of `targets`, in the graph of `query`.
    async fn describe(
        &self,
        query: &DecomposedQuery,
        targets: Vec<NamedNode>,
    ) -> Result<SparqlResponse<Vec<Quad>>, OverlayError> {
        let graph = match query.graph.as_bound() {
            Some(graph) => QueryTerm::Bound(graph.clone()),
            None => QueryTerm::Variable(Variable::new_unchecked("graph")),
        };
        let replies = join_all(targets.into_iter().map(|target| {
            self.find_atomic(AtomicQuery::new(
                graph.clone(),
                QueryTerm::Bound(target.into()),
                QueryTerm::Variable(Variable::new_unchecked("predicate")),
                QueryTerm::Variable(Variable::new_unchecked("object")),
            ))
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
        Ok(combine(replies).map(|replies| {
            let mut quads = Vec::new();
            for quad in replies
                .into_iter()
                .flat_map(|reply| reply.result.into_quads())
            {
                if !quads.contains(&quad) {
                    quads.push(quad);
                }
            }
            quads
        }))
    }

    async fn find_atomic(&self, query: AtomicQuery) -> Result<AnycastReply, OverlayError> {
        let validator = Arc::new(AtomicQueryValidator::new(&query, &self.entries.mapper));
        self.entries
            .anycast(validator, AnycastPayload::FindQuadruples(query))
            .await
    }
}
