//! Where received `Data` payloads end up.
//!
//! The receive loop hands each payload to a [`PayloadSink`].  The daemon
//! logs them with [`LogSink`]; tests and embedders collect them through
//! a [`ChannelSink`].

use std::net::SocketAddr;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::mpsc;

/// A `Data` payload received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: SocketAddr,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Hand a received payload to whatever consumes it.
    /// Called from the receive loop, one payload at a time.
    async fn deliver(&self, from: SocketAddr, payload: Vec<u8>);
}

/// Logs every payload; the daemon's default sink.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl PayloadSink for LogSink {
    async fn deliver(&self, from: SocketAddr, payload: Vec<u8>) {
        info!(
            "Received data `{}` from {}",
            String::from_utf8_lossy(&payload),
            from
        );
    }
}

/// Forwards payloads into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Delivery>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl PayloadSink for ChannelSink {
    async fn deliver(&self, from: SocketAddr, payload: Vec<u8>) {
        if let Err(e) = self.tx.send(Delivery { from, payload }).await {
            warn!("Dropping payload from {}: receiver closed ({})", from, e);
        }
    }
}
