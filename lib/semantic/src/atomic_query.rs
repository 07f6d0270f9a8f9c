use crate::{FilterConstraint, SemanticMapper};
use quadcloud_can::RoutingKey;
use quadcloud_model::{
    quad_term_refs, Expression, NamedNodePattern, Quad, QuadPattern, QuadPosition, Term,
    TermPattern, Variable,
};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// A solution of an atomic query or of a conjunction of atomic queries.
pub type Bindings = BTreeMap<Variable, Term>;

/// A position of an [AtomicQuery]: either a bound term or a variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryTerm {
    Bound(Term),
    Variable(Variable),
}

impl QueryTerm {
    pub fn as_bound(&self) -> Option<&Term> {
        match self {
            QueryTerm::Bound(term) => Some(term),
            QueryTerm::Variable(_) => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            QueryTerm::Bound(_) => None,
            QueryTerm::Variable(variable) => Some(variable),
        }
    }

    /// Replaces a variable by its binding, if there is one.
    pub fn substitute(&self, bindings: &Bindings) -> QueryTerm {
        match self {
            QueryTerm::Variable(variable) => match bindings.get(variable) {
                Some(term) => QueryTerm::Bound(term.clone()),
                None => self.clone(),
            },
            QueryTerm::Bound(_) => self.clone(),
        }
    }
}

impl From<&TermPattern> for QueryTerm {
    fn from(value: &TermPattern) -> Self {
        match value {
            TermPattern::NamedNode(node) => QueryTerm::Bound(node.clone().into()),
            // Blank nodes in a query pattern are non-distinguished variables.
            TermPattern::BlankNode(node) => {
                QueryTerm::Variable(Variable::new_unchecked(format!("__bnode_{}", node.as_str())))
            }
            TermPattern::Literal(literal) => QueryTerm::Bound(literal.clone().into()),
            TermPattern::Variable(variable) => QueryTerm::Variable(variable.clone()),
        }
    }
}

impl From<&NamedNodePattern> for QueryTerm {
    fn from(value: &NamedNodePattern) -> Self {
        match value {
            NamedNodePattern::NamedNode(node) => QueryTerm::Bound(node.clone().into()),
            NamedNodePattern::Variable(variable) => QueryTerm::Variable(variable.clone()),
        }
    }
}

impl Display for QueryTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryTerm::Bound(term) => write!(f, "{term}"),
            QueryTerm::Variable(variable) => write!(f, "{variable}"),
        }
    }
}

/// A single quadruple pattern, the unit of distributed routing.
///
/// Besides the four positions, an atomic query carries the filters whose variables it covers and
/// the range constraints derived from them. The constraints restrict the zones the query is routed
/// to, the filters are evaluated against every matched quadruple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AtomicQuery {
    terms: [QueryTerm; 4],
    filters: Vec<Expression>,
    constraints: Vec<FilterConstraint>,
}

impl AtomicQuery {
    /// Creates a new [AtomicQuery] without filters.
    pub fn new(
        graph: QueryTerm,
        subject: QueryTerm,
        predicate: QueryTerm,
        object: QueryTerm,
    ) -> Self {
        Self {
            terms: [graph, subject, predicate, object],
            filters: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn get(&self, position: QuadPosition) -> &QueryTerm {
        &self.terms[position.dimension()]
    }

    pub fn terms(&self) -> &[QueryTerm; 4] {
        &self.terms
    }

    pub fn filters(&self) -> &[Expression] {
        &self.filters
    }

    pub fn constraints(&self) -> &[FilterConstraint] {
        &self.constraints
    }

    /// Attaches a filter that only refers to variables of this query. If the filter can be
    /// expressed as a constraint on the coordinate space, the constraint is attached as well.
    pub fn push_filter(&mut self, filter: Expression, mapper: &SemanticMapper) {
        if let Some(constraint) = FilterConstraint::from_expression(&filter, self, mapper) {
            self.constraints.push(constraint);
        }
        self.filters.push(filter);
    }

    /// The distinct variables of the query, in position order.
    pub fn variables(&self) -> Vec<&Variable> {
        let mut variables = Vec::new();
        for variable in self.terms.iter().filter_map(QueryTerm::as_variable) {
            if !variables.contains(&variable) {
                variables.push(variable);
            }
        }
        variables
    }

    /// The first position at which `variable` occurs.
    pub fn position_of(&self, variable: &Variable) -> Option<QuadPosition> {
        QuadPosition::ALL
            .into_iter()
            .find(|position| self.get(*position).as_variable() == Some(variable))
    }

    pub fn bound_positions(&self) -> Vec<QuadPosition> {
        QuadPosition::ALL
            .into_iter()
            .filter(|position| self.get(*position).as_bound().is_some())
            .collect()
    }

    pub fn unbound_positions(&self) -> Vec<QuadPosition> {
        QuadPosition::ALL
            .into_iter()
            .filter(|position| self.get(*position).as_variable().is_some())
            .collect()
    }

    pub fn has_repeated_variable(&self) -> bool {
        let count = self
            .terms
            .iter()
            .filter(|term| term.as_variable().is_some())
            .count();
        count != self.variables().len()
    }

    /// Returns whether the matches of the pattern must still be filtered after routing, either
    /// because filters apply or because a variable occurs more than once.
    pub fn requires_filtering(&self) -> bool {
        !self.filters.is_empty() || self.has_repeated_variable()
    }

    /// The quadruple pattern of the query, ignoring variable names.
    pub fn pattern(&self) -> QuadPattern {
        QuadPattern::from_terms(self.terms.clone().map(|term| match term {
            QueryTerm::Bound(term) => Some(term),
            QueryTerm::Variable(_) => None,
        }))
    }

    /// The routing key of the query. An atomic query without bound positions is a broadcast.
    pub fn routing_key(&self, mapper: &SemanticMapper) -> RoutingKey {
        mapper.routing_key(&self.pattern())
    }

    /// Matches `quad` against the positions of the query. Returns the bindings of the variables on
    /// success. Filters are not evaluated.
    pub fn matches(&self, quad: &Quad) -> Option<Bindings> {
        let values = quad_term_refs(quad)?;
        let mut bindings = Bindings::new();
        for (term, value) in self.terms.iter().zip(values) {
            match term {
                QueryTerm::Bound(term) => {
                    if term.as_ref() != value {
                        return None;
                    }
                }
                QueryTerm::Variable(variable) => match bindings.get(variable) {
                    Some(existing) if existing.as_ref() != value => return None,
                    Some(_) => {}
                    None => {
                        bindings.insert(variable.clone(), value.into_owned());
                    }
                },
            }
        }
        Some(bindings)
    }

    /// Replaces the variables bound in `bindings` by their values. Filters and constraints are
    /// kept; a filter whose variables are all bound now still has to be checked.
    pub fn substitute(&self, bindings: &Bindings) -> AtomicQuery {
        AtomicQuery {
            terms: self.terms.clone().map(|term| term.substitute(bindings)),
            filters: self.filters.clone(),
            constraints: self
                .constraints
                .iter()
                .filter(|constraint| {
                    constraint.positions().iter().all(|position| {
                        self.get(*position)
                            .substitute(bindings)
                            .as_variable()
                            .is_some()
                    })
                })
                .cloned()
                .collect(),
        }
    }
}

impl Display for AtomicQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [graph, subject, predicate, object] = &self.terms;
        write!(f, "({graph}, {subject}, {predicate}, {object})")
    }
}
