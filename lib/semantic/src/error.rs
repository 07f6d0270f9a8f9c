use quadcloud_model::{ParseDecimalError, SparqlSyntaxError};
use thiserror::Error;

/// An error raised while decomposing a SPARQL query into atomic queries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecompositionError {
    /// The query text could not be parsed.
    #[error("malformed SPARQL query {query:?}: {source}")]
    Malformed {
        query: String,
        #[source]
        source: SparqlSyntaxError,
    },
    /// The query uses a construct that cannot be routed as a conjunction of atomic queries.
    #[error("{construct} is not supported (query: {query:?})")]
    Unsupported {
        query: String,
        construct: &'static str,
    },
    #[error("the basic graph pattern of the query must be enclosed in a GRAPH block")]
    MissingGraph,
    #[error("the query must contain exactly one GRAPH block")]
    MultipleGraphs,
    #[error("the query does not contain any triple pattern")]
    EmptyPattern,
}

/// A result of the evaluation of a FILTER expression.
pub type FilterResult<T> = Result<T, FilterError>;

/// The reason an expression has no value for a solution.
///
/// These failures are part of the SPARQL semantics: a filter that raises one rejects the solution,
/// and `||`, `&&`, `IN` and `COALESCE` may recover from them.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("the variable is not bound by the solution")]
    Unbound,
    /// The operands have types the operator is not defined for.
    #[error("the operands have incompatible types")]
    TypeMismatch,
    #[error("the literal has an invalid lexical form")]
    InvalidLexicalForm,
    /// Integer overflow or division by zero.
    #[error("the arithmetic operation has no result")]
    Arithmetic,
    #[error("the regular expression is invalid")]
    InvalidRegex,
    /// EXISTS and functions the evaluator does not implement.
    #[error("the expression cannot be evaluated against a single solution")]
    Unsupported,
}

impl From<std::num::ParseIntError> for FilterError {
    fn from(_: std::num::ParseIntError) -> Self {
        FilterError::InvalidLexicalForm
    }
}

impl From<std::num::ParseFloatError> for FilterError {
    fn from(_: std::num::ParseFloatError) -> Self {
        FilterError::InvalidLexicalForm
    }
}

impl From<ParseDecimalError> for FilterError {
    fn from(_: ParseDecimalError) -> Self {
        FilterError::InvalidLexicalForm
    }
}
