use quadcloud_model::{Quad, Variable};
use quadcloud_semantic::Bindings;
use std::time::Duration;

/// The response to a SPARQL query, carrying the routing metrics of the anycasts it needed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparqlResponse<T> {
    pub inbound_hop_count: usize,
    pub outbound_hop_count: usize,
    pub latency: Duration,
    /// False if some peer did not answer in time. The result is then partial.
    pub complete: bool,
    pub result: T,
}

impl<T> SparqlResponse<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SparqlResponse<U> {
        SparqlResponse {
            inbound_hop_count: self.inbound_hop_count,
            outbound_hop_count: self.outbound_hop_count,
            latency: self.latency,
            complete: self.complete,
            result: f(self.result),
        }
    }
}

/// The result of a SPARQL query, depending on its form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryResult {
    Ask(bool),
    Select(Solutions),
    Construct(Vec<Quad>),
    Describe(Vec<Quad>),
}

/// A table of solutions. Unbound variables are missing from the rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Solutions {
    variables: Vec<Variable>,
    rows: Vec<Bindings>,
}

impl Solutions {
    pub fn new(variables: Vec<Variable>, rows: Vec<Bindings>) -> Self {
        Self { variables, rows }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn rows(&self) -> &[Bindings] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bindings> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<Bindings> {
        self.rows
    }
}

impl<'a> IntoIterator for &'a Solutions {
    type Item = &'a Bindings;
    type IntoIter = std::slice::Iter<'a, Bindings>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
