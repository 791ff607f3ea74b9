//! Error type shared by the peer's modules.

use std::io;

use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to resolve address `{address}`")]
    AddressResolution {
        address: String,
        #[source]
        source: Option<io::Error>,
    },
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to encode update: {0}")]
    Encode(#[from] EncodeError),
    #[error("Failed to decode update: {0}")]
    Decode(#[from] DecodeError),
    #[error("Peer `{0}` is not in the view")]
    NotFound(String),
    #[error("Could not find remote peer with pid `{0}`")]
    PeerUnknown(String),
    #[error("Unsupported command `{0}`")]
    UnsupportedCommand(String),
    #[error("Invalid command body: {0}")]
    InvalidCommand(String),
    #[error("Membership view is closed")]
    ViewClosed,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn transport(context: impl Into<String>, source: io::Error) -> Self {
        Error::Transport {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
