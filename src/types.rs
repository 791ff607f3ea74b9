//! Data structures used throughout the peer.
//!
//! [`Update`] is the only thing that ever crosses the wire between
//! peers: one update per UDP datagram, encoded by [`crate::codec`].
//! [`PeerDescriptor`] names a peer before any socket to it exists; it
//! comes either from the seed list in the configuration file or from a
//! join announcement received over the network.

use serde::{Deserialize, Serialize};

/// A peer known by name and address, not yet connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerDescriptor {
    /// Unique identifier of the peer within the group.
    #[serde(alias = "pid")]
    pub identity: String,
    /// `host:port` where the peer listens for datagrams.
    #[serde(alias = "bind")]
    pub address: String,
}

impl PeerDescriptor {
    pub fn new(identity: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            address: address.into(),
        }
    }
}

/// A message exchanged between peers.
///
/// `Data` carries an application payload to exactly one peer.  `Join`
/// announces a peer that wants to become known to the group; receivers
/// that did not know it yet relay the announcement to everyone they
/// know, so it floods the mesh once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Opaque application bytes, handed to the receiver's sink as is.
    Data { payload: Vec<u8> },
    /// Announces the peer `identity`, reachable at `address`.
    Join { identity: String, address: String },
}

impl Update {
    pub fn data(payload: impl Into<Vec<u8>>) -> Self {
        Update::Data {
            payload: payload.into(),
        }
    }

    pub fn join(descriptor: &PeerDescriptor) -> Self {
        Update::Join {
            identity: descriptor.identity.clone(),
            address: descriptor.address.clone(),
        }
    }
}
