//! The geometry of a content-addressable network: elements, coordinates, zones, neighbor tables
//! and the policies used to split zones.

mod coordinate;
mod direction;
mod element;
mod error;
mod neighbor;
mod peer_id;
mod split;
mod validator;
mod zone;

pub use coordinate::*;
pub use direction::*;
pub use element::*;
pub use error::*;
pub use neighbor::*;
pub use peer_id::*;
pub use split::*;
pub use validator::*;
pub use zone::*;
