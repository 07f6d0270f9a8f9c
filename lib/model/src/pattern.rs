use crate::{GraphName, ModelError, Quad, Term, TermRef};
use std::fmt::{Display, Formatter};

/// Position of a term inside a quadruple. Each position is one dimension of the semantic
/// coordinate space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuadPosition {
    Graph,
    Subject,
    Predicate,
    Object,
}

impl QuadPosition {
    /// All positions in coordinate order.
    pub const ALL: [QuadPosition; 4] = [
        QuadPosition::Graph,
        QuadPosition::Subject,
        QuadPosition::Predicate,
        QuadPosition::Object,
    ];

    /// The dimension of the coordinate space that is associated with this position.
    pub fn dimension(self) -> usize {
        match self {
            QuadPosition::Graph => 0,
            QuadPosition::Subject => 1,
            QuadPosition::Predicate => 2,
            QuadPosition::Object => 3,
        }
    }
}

impl Display for QuadPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QuadPosition::Graph => "graph",
            QuadPosition::Subject => "subject",
            QuadPosition::Predicate => "predicate",
            QuadPosition::Object => "object",
        })
    }
}

/// Returns the four terms of `quad` in coordinate order.
pub fn quad_terms(quad: &Quad) -> Result<[Term; 4], ModelError> {
    let graph = match &quad.graph_name {
        GraphName::NamedNode(node) => Term::NamedNode(node.clone()),
        GraphName::BlankNode(node) => Term::BlankNode(node.clone()),
        GraphName::DefaultGraph => return Err(ModelError::DefaultGraph),
    };
    Ok([
        graph,
        quad.subject.clone().into(),
        quad.predicate.clone().into(),
        quad.object.clone(),
    ])
}

/// Borrowing variant of [quad_terms]. Returns [None] for quads in the default graph.
pub fn quad_term_refs(quad: &Quad) -> Option<[TermRef<'_>; 4]> {
    let graph = match &quad.graph_name {
        GraphName::NamedNode(node) => TermRef::from(node.as_ref()),
        GraphName::BlankNode(node) => TermRef::from(node.as_ref()),
        GraphName::DefaultGraph => return None,
    };
    Some([
        graph,
        quad.subject.as_ref().into(),
        quad.predicate.as_ref().into(),
        quad.object.as_ref(),
    ])
}

/// Checks that `quad` can be published: it lives in a named graph and contains no blank node.
pub fn validate_quad(quad: &Quad) -> Result<(), ModelError> {
    let terms = quad_terms(quad)?;
    for (position, term) in QuadPosition::ALL.into_iter().zip(terms.iter()) {
        if matches!(term, Term::BlankNode(_)) {
            return Err(ModelError::BlankNode(position));
        }
    }
    Ok(())
}

/// A quadruple pattern where [None] matches any term.
///
/// This is the key-pattern interface of the quad stores. Variables are not named here, see the
/// atomic queries of the semantic layer for patterns with repeated variables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct QuadPattern {
    terms: [Option<Term>; 4],
}

impl QuadPattern {
    /// Creates a new [QuadPattern].
    pub fn new(
        graph: Option<Term>,
        subject: Option<Term>,
        predicate: Option<Term>,
        object: Option<Term>,
    ) -> Self {
        Self {
            terms: [graph, subject, predicate, object],
        }
    }

    /// A pattern matching every quadruple.
    pub fn any() -> Self {
        Self::default()
    }

    /// A pattern matching exactly `quad`.
    pub fn exact(quad: &Quad) -> Result<Self, ModelError> {
        Ok(Self::from_terms(quad_terms(quad)?.map(Some)))
    }

    pub fn from_terms(terms: [Option<Term>; 4]) -> Self {
        Self { terms }
    }

    pub fn get(&self, position: QuadPosition) -> Option<&Term> {
        self.terms[position.dimension()].as_ref()
    }

    pub fn terms(&self) -> &[Option<Term>; 4] {
        &self.terms
    }

    /// Number of positions that are bound to a term.
    pub fn bound_count(&self) -> usize {
        self.terms.iter().filter(|t| t.is_some()).count()
    }

    /// Returns whether `quad` is matched by this pattern.
    pub fn matches(&self, quad: &Quad) -> bool {
        let Some(terms) = quad_term_refs(quad) else {
            return false;
        };
        self.terms
            .iter()
            .zip(terms)
            .all(|(pattern, term)| !matches!(pattern, Some(pattern) if pattern.as_ref() != term))
    }
}

impl Display for QuadPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match term {
                Some(term) => write!(f, "{term}")?,
                None => f.write_str("?")?,
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{BlankNode, Literal, NamedNode};

    fn quad() -> Quad {
        Quad::new(
            NamedNode::new_unchecked("http://example.com/s"),
            NamedNode::new_unchecked("http://example.com/p"),
            Literal::new_simple_literal("o"),
            NamedNode::new_unchecked("http://example.com/g"),
        )
    }

    #[test]
    fn pattern_with_wildcards_matches() {
        let pattern = QuadPattern::new(
            Some(NamedNode::new_unchecked("http://example.com/g").into()),
            None,
            Some(NamedNode::new_unchecked("http://example.com/p").into()),
            None,
        );
        assert!(pattern.matches(&quad()));
        assert_eq!(pattern.bound_count(), 2);
    }

    #[test]
    fn pattern_with_other_object_does_not_match() {
        let pattern = QuadPattern::new(None, None, None, Some(Literal::from(42).into()));
        assert!(!pattern.matches(&quad()));
    }

    #[test]
    fn default_graph_is_rejected() {
        let mut quad = quad();
        quad.graph_name = GraphName::DefaultGraph;
        assert_eq!(validate_quad(&quad), Err(ModelError::DefaultGraph));
        assert!(!QuadPattern::any().matches(&quad));
    }

    #[test]
    fn blank_subject_is_rejected() {
        let mut quad = quad();
        quad.subject = BlankNode::default().into();
        assert_eq!(
            validate_quad(&quad),
            Err(ModelError::BlankNode(QuadPosition::Subject))
        );
    }
}
