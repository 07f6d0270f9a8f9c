use crate::{AtomicQuery, DecompositionError, QueryTerm, SemanticMapper};
use quadcloud_model::{Expression, GraphPattern, OrderExpression, Query, TriplePattern, Variable};
use std::collections::BTreeSet;

/// The result form of a decomposed query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryForm {
    Select { projection: Vec<Variable> },
    Ask,
    Construct { template: Vec<TriplePattern> },
    Describe { projection: Vec<Variable> },
}

/// The solution modifiers that are applied after joining the atomic query results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SolutionModifiers {
    pub distinct: bool,
    pub reduced: bool,
    pub order_by: Vec<OrderExpression>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// A SPARQL query split into atomic queries.
///
/// The atomic queries are routed and evaluated independently. Their results are joined on shared
/// variables by the caller, which then applies `filters` and `modifiers`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecomposedQuery {
    pub form: QueryForm,
    /// The graph of the GRAPH block, shared by all atomic queries.
    pub graph: QueryTerm,
    pub atomic_queries: Vec<AtomicQuery>,
    pub filters: Vec<Expression>,
    pub modifiers: SolutionModifiers,
}

impl DecomposedQuery {
    /// The distinct variables of all atomic queries, in order of appearance.
    pub fn variables(&self) -> Vec<Variable> {
        let mut variables = Vec::new();
        for variable in self.atomic_queries.iter().flat_map(AtomicQuery::variables) {
            if !variables.contains(variable) {
                variables.push(variable.clone());
            }
        }
        variables
    }
}

/// Decomposes SPARQL queries into sequences of [AtomicQuery].
///
/// Supported are SELECT, ASK, CONSTRUCT and DESCRIBE queries whose pattern is a single GRAPH block
/// holding a basic graph pattern, optionally with FILTER, DISTINCT, REDUCED, ORDER BY, OFFSET,
/// LIMIT and a projection around it.
#[derive(Clone, Debug)]
pub struct SparqlDecomposer {
    mapper: SemanticMapper,
}

impl SparqlDecomposer {
    pub fn new(mapper: SemanticMapper) -> Self {
        Self { mapper }
    }

    /// Parses and decomposes `sparql`.
    pub fn decompose(&self, sparql: &str) -> Result<DecomposedQuery, DecompositionError> {
        let query =
            Query::parse(sparql, None).map_err(|source| DecompositionError::Malformed {
                query: sparql.to_owned(),
                source,
            })?;
        self.decompose_query(&query)
    }

    pub fn decompose_query(&self, query: &Query) -> Result<DecomposedQuery, DecompositionError> {
        let (pattern, form) = match query {
            Query::Select { pattern, .. } => (
                pattern,
                QueryForm::Select {
                    projection: Vec::new(),
                },
            ),
            Query::Ask { pattern, .. } => (pattern, QueryForm::Ask),
            Query::Construct {
                template, pattern, ..
            } => (
                pattern,
                QueryForm::Construct {
                    template: template.clone(),
                },
            ),
            Query::Describe { pattern, .. } => (
                pattern,
                QueryForm::Describe {
                    projection: Vec::new(),
                },
            ),
        };

        let mut walker = PatternWalker::new(query);
        walker.walk(pattern, false)?;
        let graph = walker.graph.ok_or(DecompositionError::MissingGraph)?;
        if walker.triples.is_empty() {
            return Err(DecompositionError::EmptyPattern);
        }

        let mut atomic_queries = walker
            .triples
            .iter()
            .map(|triple| {
                AtomicQuery::new(
                    graph.clone(),
                    QueryTerm::from(&triple.subject),
                    QueryTerm::from(&triple.predicate),
                    QueryTerm::from(&triple.object),
                )
            })
            .collect::<Vec<_>>();

        for filter in &walker.filters {
            let mut variables = BTreeSet::new();
            collect_variables(filter, &mut variables);
            for atomic_query in &mut atomic_queries {
                let covered = variables
                    .iter()
                    .all(|variable| atomic_query.position_of(variable).is_some());
                if covered {
                    atomic_query.push_filter(filter.clone(), &self.mapper);
                }
            }
        }

        for atomic_query in &atomic_queries {
            if atomic_query.bound_positions().is_empty() {
                tracing::warn!("Atomic query {atomic_query} has no bound position and is broadcast");
            }
        }

        let mut decomposed = DecomposedQuery {
            form,
            graph,
            atomic_queries,
            filters: walker.filters,
            modifiers: walker.modifiers,
        };
        let projection = walker
            .projection
            .unwrap_or_else(|| decomposed.variables());
        match &mut decomposed.form {
            QueryForm::Select { projection: p } | QueryForm::Describe { projection: p } => {
                *p = projection;
            }
            QueryForm::Ask | QueryForm::Construct { .. } => {}
        }
        Ok(decomposed)
    }
}

struct PatternWalker<'query> {
    query: &'query Query,
    graph: Option<QueryTerm>,
    triples: Vec<&'query TriplePattern>,
    filters: Vec<Expression>,
    projection: Option<Vec<Variable>>,
    modifiers: SolutionModifiers,
}

impl<'query> PatternWalker<'query> {
    fn new(query: &'query Query) -> Self {
        Self {
            query,
            graph: None,
            triples: Vec::new(),
            filters: Vec::new(),
            projection: None,
            modifiers: SolutionModifiers::default(),
        }
    }

    fn walk(
        &mut self,
        pattern: &'query GraphPattern,
        in_graph: bool,
    ) -> Result<(), DecompositionError> {
        match pattern {
            GraphPattern::Slice {
                inner,
                start,
                length,
            } => {
                self.modifiers.offset = *start;
                self.modifiers.limit = *length;
                self.walk(inner, in_graph)
            }
            GraphPattern::Distinct { inner } => {
                self.modifiers.distinct = true;
                self.walk(inner, in_graph)
            }
            GraphPattern::Reduced { inner } => {
                self.modifiers.reduced = true;
                self.walk(inner, in_graph)
            }
            GraphPattern::Project { inner, variables } => {
                if self.projection.is_none() {
                    self.projection = Some(variables.clone());
                }
                self.walk(inner, in_graph)
            }
            GraphPattern::OrderBy { inner, expression } => {
                self.modifiers.order_by.clone_from(expression);
                self.walk(inner, in_graph)
            }
            GraphPattern::Filter { expr, inner } => {
                self.filters.push(expr.clone());
                self.walk(inner, in_graph)
            }
            GraphPattern::Graph { name, inner } => {
                if self.graph.is_some() || in_graph {
                    return Err(DecompositionError::MultipleGraphs);
                }
                self.graph = Some(QueryTerm::from(name));
                self.walk(inner, true)
            }
            GraphPattern::Bgp { patterns } => {
                if !in_graph && !patterns.is_empty() {
                    return Err(DecompositionError::MissingGraph);
                }
                self.triples.extend(patterns);
                Ok(())
            }
            GraphPattern::Join { left, right } => {
                self.walk(left, in_graph)?;
                self.walk(right, in_graph)
            }
            other => Err(DecompositionError::Unsupported {
                query: self.query.to_string(),
                construct: construct_name(other),
            }),
        }
    }
}

fn construct_name(pattern: &GraphPattern) -> &'static str {
    match pattern {
        GraphPattern::Path { .. } => "property path",
        GraphPattern::LeftJoin { .. } => "OPTIONAL",
        GraphPattern::Union { .. } => "UNION",
        GraphPattern::Minus { .. } => "MINUS",
        GraphPattern::Extend { .. } => "BIND",
        GraphPattern::Values { .. } => "VALUES",
        GraphPattern::Group { .. } => "GROUP BY",
        GraphPattern::Service { .. } => "SERVICE",
        _ => "nested pattern",
    }
}

/// Collects the variables `expression` refers to.
pub fn collect_variables(expression: &Expression, variables: &mut BTreeSet<Variable>) {
    match expression {
        Expression::NamedNode(_) | Expression::Literal(_) | Expression::Exists(_) => {}
        Expression::Variable(variable) | Expression::Bound(variable) => {
            variables.insert(variable.clone());
        }
        Expression::Or(lhs, rhs)
        | Expression::And(lhs, rhs)
        | Expression::Equal(lhs, rhs)
        | Expression::SameTerm(lhs, rhs)
        | Expression::Greater(lhs, rhs)
        | Expression::GreaterOrEqual(lhs, rhs)
        | Expression::Less(lhs, rhs)
        | Expression::LessOrEqual(lhs, rhs)
        | Expression::Add(lhs, rhs)
        | Expression::Subtract(lhs, rhs)
        | Expression::Multiply(lhs, rhs)
        | Expression::Divide(lhs, rhs) => {
            collect_variables(lhs, variables);
            collect_variables(rhs, variables);
        }
        Expression::UnaryPlus(inner) | Expression::UnaryMinus(inner) | Expression::Not(inner) => {
            collect_variables(inner, variables);
        }
        Expression::In(lhs, rhs) => {
            collect_variables(lhs, variables);
            for expression in rhs {
                collect_variables(expression, variables);
            }
        }
        Expression::If(test, if_true, if_false) => {
            collect_variables(test, variables);
            collect_variables(if_true, variables);
            collect_variables(if_false, variables);
        }
        Expression::Coalesce(args) | Expression::FunctionCall(_, args) => {
            for expression in args {
                collect_variables(expression, variables);
            }
        }
    }
}
