//! Maps RDF onto the coordinate space of the overlay: quadruples become coordinates, SPARQL
//! queries become atomic queries with routing keys, and standing queries become subscriptions.

mod atomic_query;
mod constraint;
mod decomposer;
mod error;
mod expression;
mod index;
mod mapper;
mod subscription;
mod validator;

pub use atomic_query::*;
pub use constraint::*;
pub use decomposer::*;
pub use error::*;
pub use expression::*;
pub use index::*;
pub use mapper::*;
pub use subscription::*;
pub use validator::*;
