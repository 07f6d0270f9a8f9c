#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod config;
mod error;
mod message;
mod network;
pub mod peer;
pub mod proxy;
mod registry;
pub mod sparql;
mod transport;

pub use config::OverlayConfig;
pub use error::{OverlayError, TransportError, Undeliverable};
pub use message::*;
pub use network::Network;
pub use peer::{PeerHandle, PeerSnapshot, PeerState};
pub use proxy::{PublishProxy, PutGetProxy, SubscribeProxy};
pub use registry::{CloudId, Registry};
pub use sparql::{QueryResult, Solutions, SparqlResponse};
pub use transport::{LocalTransport, Transport};

pub mod model {
    pub use quadcloud_model::*;
}

pub mod can {
    pub use quadcloud_can::*;
}

pub mod semantic {
    pub use quadcloud_semantic::*;
}

pub mod storage {
    pub use quadcloud_storage::*;
}
