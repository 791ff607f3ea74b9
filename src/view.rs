//! Membership view: the peers this process knows, by identity.
//!
//! The view is the only structure mutated from more than one task (the
//! receive loop applies joins while operator commands send), so the map
//! sits behind a single lock.  The lock is held for map access only;
//! resolution, binding and sending all happen outside it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::endpoint::RemotePeer;
use crate::error::{Error, Result};
use crate::types::PeerDescriptor;

#[derive(Debug)]
pub struct MembershipView {
    /// Local address every outbound socket is bound to.
    source: SocketAddr,
    members: RwLock<Members>,
}

#[derive(Debug, Default)]
struct Members {
    peers: HashMap<String, Arc<RemotePeer>>,
    /// Set by `cleanup`; a closed view accepts no new peers.
    closed: bool,
}

impl MembershipView {
    pub fn new(source: SocketAddr) -> Self {
        Self {
            source,
            members: RwLock::new(Members::default()),
        }
    }

    /// Build a view from the configured seed list.
    ///
    /// Seeds that cannot be opened are logged and skipped; a peer with a
    /// partial view still joins the group.
    pub async fn from_seeds(source: SocketAddr, seeds: &[PeerDescriptor]) -> Self {
        let view = Self::new(source);
        for seed in seeds {
            match view.add_peer(seed).await {
                Ok(true) => warn!("Duplicate seed peer {} ignored", seed.identity),
                Ok(false) => {}
                Err(e) => warn!("Skipping seed peer {} ({}): {}", seed.identity, seed.address, e),
            }
        }
        view
    }

    pub fn source_address(&self) -> SocketAddr {
        self.source
    }

    pub async fn get(&self, identity: &str) -> Result<Arc<RemotePeer>> {
        self.members
            .read()
            .await
            .peers
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    /// Add a peer unless its identity is already known.
    ///
    /// Returns `Ok(true)` if the peer already existed, in which case no
    /// socket is opened.  Fails with [`Error::ViewClosed`] once
    /// [`MembershipView::cleanup`] has run.
    pub async fn add_peer(&self, descriptor: &PeerDescriptor) -> Result<bool> {
        {
            let members = self.members.read().await;
            if members.closed {
                return Err(Error::ViewClosed);
            }
            if members.peers.contains_key(&descriptor.identity) {
                return Ok(true);
            }
        }

        let endpoint = Arc::new(RemotePeer::open(self.source, descriptor).await?);

        let mut members = self.members.write().await;
        if members.closed || members.peers.contains_key(&descriptor.identity) {
            // Lost a race with cleanup or with a concurrent add.
            let closed = members.closed;
            drop(members);
            endpoint.close().await;
            return if closed { Err(Error::ViewClosed) } else { Ok(true) };
        }
        members.peers.insert(descriptor.identity.clone(), endpoint);
        drop(members);

        info!(
            "Added peer {} at {} to the view",
            descriptor.identity, descriptor.address
        );
        Ok(false)
    }

    /// Close and forget a peer.  Returns whether it was present.
    pub async fn remove_peer(&self, identity: &str) -> bool {
        let removed = self.members.write().await.peers.remove(identity);
        match removed {
            Some(endpoint) => {
                endpoint.close().await;
                info!("Removed peer {} from the view", identity);
                true
            }
            None => false,
        }
    }

    /// Close every endpoint, empty the view and stop it from accepting
    /// new peers.
    ///
    /// Returns how many endpoints were closed by this call.
    pub async fn cleanup(&self) -> usize {
        let drained: Vec<_> = {
            let mut members = self.members.write().await;
            members.closed = true;
            members.peers.drain().collect()
        };
        let mut closed = 0;
        for (identity, endpoint) in drained {
            if endpoint.close().await {
                closed += 1;
            } else {
                debug!("Endpoint for peer {} was already closed", identity);
            }
        }
        closed
    }

    pub async fn is_closed(&self) -> bool {
        self.members.read().await.closed
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.members.read().await.peers.contains_key(identity)
    }

    pub async fn identities(&self) -> Vec<String> {
        self.members.read().await.peers.keys().cloned().collect()
    }

    /// Snapshot of the current endpoints, safe to use after the lock is released.
    pub async fn endpoints(&self) -> Vec<Arc<RemotePeer>> {
        self.members.read().await.peers.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.peers.is_empty()
    }
}
