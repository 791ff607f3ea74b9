//! A UDP peer that keeps a membership view of its group and floods join
//! announcements through it.
//!
//! The daemon in `main.rs` wires these modules together; they are
//! exposed as a library so integration tests can drive several peers in
//! one process.

pub mod codec;
pub mod command;
pub mod config;
pub mod control;
pub mod delivery;
pub mod endpoint;
pub mod error;
pub mod gossip;
pub mod types;
pub mod view;

pub use command::{Command, CommandOutcome};
pub use config::Config;
pub use delivery::{ChannelSink, Delivery, LogSink, PayloadSink};
pub use error::{Error, Result};
pub use gossip::{Dispatch, Peer};
pub use types::{PeerDescriptor, Update};
pub use view::MembershipView;
