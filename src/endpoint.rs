//! Outbound transport to a single remote peer.
//!
//! Each [`RemotePeer`] owns one UDP socket bound to the local source
//! address and connected to the peer, so a send is a single `send(2)`.

use std::io;
use std::net::SocketAddr;

use log::debug;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::PeerDescriptor;

/// Resolve a `host:port` string to the first socket address it names.
pub async fn resolve(address: &str) -> Result<SocketAddr> {
    let mut addrs = lookup_host(address)
        .await
        .map_err(|e| Error::AddressResolution {
            address: address.to_string(),
            source: Some(e),
        })?;
    addrs.next().ok_or_else(|| Error::AddressResolution {
        address: address.to_string(),
        source: None,
    })
}

/// Bind a socket on `source` and connect it to `remote`.
pub async fn connect(source: SocketAddr, remote: SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(source)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind UDP source {}", source), e))?;
    socket
        .connect(remote)
        .await
        .map_err(|e| Error::transport(format!("Failed to connect UDP socket to {}", remote), e))?;
    Ok(socket)
}

/// A known peer with a ready-to-use outbound socket.
#[derive(Debug)]
pub struct RemotePeer {
    identity: String,
    address: SocketAddr,
    // `None` once closed.  The mutex also serializes writers racing on
    // the same peer (a forward and an operator send, say).
    socket: Mutex<Option<UdpSocket>>,
}

impl RemotePeer {
    /// Resolve the descriptor's address and open a socket to it.
    pub async fn open(source: SocketAddr, descriptor: &PeerDescriptor) -> Result<Self> {
        let address = resolve(&descriptor.address).await?;
        let socket = connect(source, address).await?;
        debug!(
            "Opened endpoint for peer {} at {} from {:?}",
            descriptor.identity,
            address,
            socket.local_addr().ok()
        );
        Ok(Self {
            identity: descriptor.identity.clone(),
            address,
            socket: Mutex::new(Some(socket)),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Write one datagram.  Best effort, never retried.
    pub async fn send(&self, datagram: &[u8]) -> Result<()> {
        let guard = self.socket.lock().await;
        let socket = guard.as_ref().ok_or_else(|| {
            Error::transport(
                format!("Endpoint for peer {} is closed", self.identity),
                io::Error::from(io::ErrorKind::NotConnected),
            )
        })?;
        socket.send(datagram).await.map_err(|e| {
            Error::transport(
                format!("Failed to send datagram to {} ({})", self.identity, self.address),
                e,
            )
        })?;
        Ok(())
    }

    /// Close the socket.  Returns `true` only for the call that closed it.
    pub async fn close(&self) -> bool {
        let socket = self.socket.lock().await.take();
        if socket.is_some() {
            debug!("Closed endpoint for peer {}", self.identity);
        }
        socket.is_some()
    }

    pub async fn is_closed(&self) -> bool {
        self.socket.lock().await.is_none()
    }
}
