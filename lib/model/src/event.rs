use crate::{validate_quad, GraphName, ModelError, Quad};

/// An ordered collection of quadruples that is published, matched and delivered as one unit.
///
/// All quadruples of an event belong to the same named graph, which acts as the identifier of
/// the event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompoundEvent {
    graph: GraphName,
    quads: Vec<Quad>,
}

impl CompoundEvent {
    /// Creates a new [CompoundEvent], validating every quadruple.
    pub fn new(quads: Vec<Quad>) -> Result<Self, ModelError> {
        let graph = quads
            .first()
            .map(|q| q.graph_name.clone())
            .ok_or(ModelError::EmptyCompoundEvent)?;
        for quad in &quads {
            validate_quad(quad)?;
            if quad.graph_name != graph {
                return Err(ModelError::MixedGraphs {
                    expected: graph.to_string(),
                    found: quad.graph_name.to_string(),
                });
            }
        }
        Ok(Self { graph, quads })
    }

    pub fn graph(&self) -> &GraphName {
        &self.graph
    }

    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    /// Always false, an event holds at least one quadruple.
    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Quad> {
        self.quads.iter()
    }

    pub fn into_quads(self) -> Vec<Quad> {
        self.quads
    }
}

impl IntoIterator for CompoundEvent {
    type Item = Quad;
    type IntoIter = std::vec::IntoIter<Quad>;

    fn into_iter(self) -> Self::IntoIter {
        self.quads.into_iter()
    }
}

impl<'a> IntoIterator for &'a CompoundEvent {
    type Item = &'a Quad;
    type IntoIter = std::slice::Iter<'a, Quad>;

    fn into_iter(self) -> Self::IntoIter {
        self.quads.iter()
    }
}
