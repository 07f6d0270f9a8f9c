//! Contains the storage layer of a peer. Each peer keeps the quadruples of its zone in a
//! [QuadStore].

mod error;
pub mod memory;
mod quad_store;

pub use error::*;
pub use memory::MemQuadStore;
pub use quad_store::*;
