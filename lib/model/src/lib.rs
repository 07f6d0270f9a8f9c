mod error;
mod event;
mod pattern;

pub use error::*;
pub use event::*;
pub use pattern::*;

// Re-export some oxrdf types.
pub use oxiri::Iri;
pub use oxrdf::vocab;
pub use oxrdf::{
    BlankNode, BlankNodeRef, GraphName, GraphNameRef, IriParseError, Literal, LiteralRef,
    NamedNode, NamedNodeRef, Quad, QuadRef, Subject, SubjectRef, Term, TermRef, Triple,
    Variable, VariableRef,
};
pub use oxsdatatypes::{Decimal, Double, ParseDecimalError};

// Re-export the SPARQL algebra used by the query decomposition.
pub use spargebra::algebra::{Expression, Function, GraphPattern, OrderExpression};
pub use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
pub use spargebra::{Query, SparqlSyntaxError};
