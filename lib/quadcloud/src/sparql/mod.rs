//! Result envelopes of SPARQL queries and the evaluation of decomposed queries over the answers
//! of their atomic queries.

mod eval;
mod response;

pub use eval::*;
pub use response::*;
