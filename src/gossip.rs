//! Dissemination engine.
//!
//! A [`Peer`] owns the inbound UDP listener and the membership view.
//! Its receive loop handles one datagram at a time:
//!
//! * `Data` payloads are handed to the [`PayloadSink`].
//! * `Join` announcements add the joiner to the view.  The first time a
//!   joiner is seen the announcement is relayed to every other known
//!   peer; repeats are dropped.  That rule is what stops a join from
//!   bouncing around a fully connected mesh forever: each peer relays a
//!   given joiner at most once.
//!
//! Operator commands (`send`, `spread`, `join`) run concurrently with
//! the loop and only touch the view through its own lock.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::{self, MAX_DATAGRAM_SIZE};
use crate::command::{Command, CommandOutcome, SpreadReport};
use crate::config::Config;
use crate::delivery::PayloadSink;
use crate::endpoint;
use crate::error::{Error, Result};
use crate::types::{PeerDescriptor, Update};
use crate::view::MembershipView;

/// What the receive loop did with one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// New peer added; the join was relayed to `forwarded` peers.
    Joined { forwarded: usize },
    DuplicateJoin,
    /// A join naming this peer itself.
    OwnJoin,
    /// The joiner's address could not be opened.
    JoinRejected,
    Malformed,
}

pub struct Peer {
    identity: String,
    advertised_address: String,
    listener: UdpSocket,
    view: MembershipView,
    sink: Arc<dyn PayloadSink>,
    shutdown: watch::Sender<bool>,
    forward_rounds: AtomicUsize,
}

impl Peer {
    /// Bind the listener and open endpoints to the seed peers.
    pub async fn bind(config: &Config, sink: Arc<dyn PayloadSink>) -> Result<Arc<Self>> {
        let listen = endpoint::resolve(&config.listen_address).await?;
        let listener = UdpSocket::bind(listen).await.map_err(|e| {
            Error::transport(format!("Unable to bind to udp address {}", listen), e)
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::transport("Failed to read listener address", e))?;

        let advertised_address = config
            .advertise_address
            .clone()
            .unwrap_or_else(|| local_addr.to_string());

        let seeds: Vec<PeerDescriptor> = config
            .peers
            .iter()
            .filter(|seed| {
                let own = seed.identity == config.identity;
                if own {
                    warn!("Ignoring seed entry for our own identity {}", seed.identity);
                }
                !own
            })
            .cloned()
            .collect();
        let view = MembershipView::from_seeds(config.source_address, &seeds).await;

        info!(
            "UDP peer {} started on {} (advertising {}) with {} known peer(s)",
            config.identity,
            local_addr,
            advertised_address,
            view.len().await
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            identity: config.identity.clone(),
            advertised_address,
            listener,
            view,
            sink,
            shutdown,
            forward_rounds: AtomicUsize::new(0),
        }))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn advertised_address(&self) -> &str {
        &self.advertised_address
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn view(&self) -> &MembershipView {
        &self.view
    }

    /// Number of times this peer has relayed a join.
    pub fn forward_rounds(&self) -> usize {
        self.forward_rounds.load(Ordering::Relaxed)
    }

    /// Run the receive loop on a new task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let peer = Arc::clone(self);
        tokio::spawn(async move { peer.run().await })
    }

    /// Receive datagrams until [`Peer::shutdown`] is called or the
    /// listener fails for good.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        if *shutdown.borrow_and_update() {
            return;
        }

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.listener.recv_from(&mut buf) => received,
            };

            match received {
                Ok((n, from)) => {
                    self.handle_datagram(&buf[..n], from).await;
                }
                Err(e) if is_transient(&e) => {
                    debug!("Transient error reading datagram: {}", e);
                }
                Err(e) => {
                    error!("Failed to read datagram: {}. Stopping receive loop", e);
                    break;
                }
            }
        }
        info!("Receive loop for peer {} stopped", self.identity);
    }

    /// Decode and act on one datagram.
    pub async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> Dispatch {
        let update = match codec::decode(datagram) {
            Ok(update) => update,
            Err(e) => {
                warn!(
                    "Dropping malformed datagram ({} bytes) from {}: {}",
                    datagram.len(),
                    from,
                    e
                );
                return Dispatch::Malformed;
            }
        };

        match update {
            Update::Data { payload } => {
                debug!("Received {} byte(s) of data from {}", payload.len(), from);
                self.sink.deliver(from, payload).await;
                Dispatch::Delivered
            }
            Update::Join { identity, address } => {
                self.on_join(PeerDescriptor { identity, address }, from).await
            }
        }
    }

    async fn on_join(&self, joiner: PeerDescriptor, from: SocketAddr) -> Dispatch {
        if joiner.identity == self.identity {
            debug!("Ignoring join for ourselves relayed by {}", from);
            return Dispatch::OwnJoin;
        }

        match self.view.add_peer(&joiner).await {
            Ok(true) => {
                debug!(
                    "Join for known peer {} from {} not forwarded",
                    joiner.identity, from
                );
                Dispatch::DuplicateJoin
            }
            Ok(false) => {
                info!(
                    "Peer {} ({}) joined via {}",
                    joiner.identity, joiner.address, from
                );
                let forwarded = self.forward_join(&joiner).await;
                Dispatch::Joined { forwarded }
            }
            Err(e) => {
                warn!(
                    "Rejected join for {} ({}) from {}: {}",
                    joiner.identity, joiner.address, from, e
                );
                Dispatch::JoinRejected
            }
        }
    }

    /// Relay a join to every known peer except the joiner.  Returns how
    /// many sends succeeded.
    async fn forward_join(&self, joiner: &PeerDescriptor) -> usize {
        self.forward_rounds.fetch_add(1, Ordering::Relaxed);

        let datagram = match codec::encode(&Update::join(joiner)) {
            Ok(datagram) => datagram,
            Err(e) => {
                error!("Failed to re-encode join for {}: {}", joiner.identity, e);
                return 0;
            }
        };

        let targets: Vec<_> = self
            .view
            .endpoints()
            .await
            .into_iter()
            .filter(|target| target.identity() != joiner.identity)
            .collect();
        let results = join_all(targets.iter().map(|target| target.send(&datagram))).await;

        let mut forwarded = 0;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => forwarded += 1,
                Err(e) => warn!(
                    "Failed to forward join for {} to {}: {}",
                    joiner.identity,
                    target.identity(),
                    e
                ),
            }
        }
        debug!(
            "Forwarded join for {} to {}/{} peer(s)",
            joiner.identity,
            forwarded,
            targets.len()
        );
        forwarded
    }

    /// Send `content` to the peer named `identity`.
    pub async fn send(&self, identity: &str, content: &[u8]) -> Result<()> {
        let target = self.view.get(identity).await.map_err(|e| match e {
            Error::NotFound(id) => Error::PeerUnknown(id),
            other => other,
        })?;
        let datagram = codec::encode(&Update::data(content))?;
        target.send(&datagram).await?;
        info!(
            "Published {} byte(s) to remote peer {} ({})",
            content.len(),
            identity,
            target.address()
        );
        Ok(())
    }

    /// Send `content` to every known peer, reporting each outcome.
    pub async fn spread(&self, content: &[u8]) -> Vec<(String, Result<()>)> {
        let targets = self.view.endpoints().await;
        let datagram = match codec::encode(&Update::data(content)) {
            Ok(datagram) => datagram,
            Err(e) => {
                return targets
                    .iter()
                    .map(|t| (t.identity().to_string(), Err(Error::Encode(e.clone()))))
                    .collect();
            }
        };

        let results = join_all(targets.iter().map(|target| target.send(&datagram))).await;
        targets
            .iter()
            .zip(results)
            .map(|(target, result)| {
                if let Err(e) = &result {
                    warn!("Failed to spread payload to {}: {}", target.identity(), e);
                }
                (target.identity().to_string(), result)
            })
            .collect()
    }

    /// Announce this peer to `contact_address`.
    ///
    /// The contact does not have to be in the view; the socket is opened
    /// for this one datagram and dropped.  No reply is awaited.
    /// Refused once the peer has shut down.
    pub async fn join(&self, contact_address: &str) -> Result<()> {
        if self.view.is_closed().await {
            return Err(Error::ViewClosed);
        }
        let datagram = codec::encode(&Update::Join {
            identity: self.identity.clone(),
            address: self.advertised_address.clone(),
        })?;
        let contact = endpoint::resolve(contact_address).await?;
        let socket = endpoint::connect(self.view.source_address(), contact).await?;
        socket
            .send(&datagram)
            .await
            .map_err(|e| Error::transport(format!("Failed to send join to {}", contact), e))?;
        info!("Sent join for {} to {}", self.identity, contact);
        Ok(())
    }

    pub async fn execute(&self, command: Command) -> Result<CommandOutcome> {
        debug!("Executing {} command", command.name());
        match command {
            Command::Send { pid, content } => {
                self.send(&pid, &content).await?;
                Ok(CommandOutcome::Sent)
            }
            Command::Spread { content } => {
                let reports = self
                    .spread(&content)
                    .await
                    .into_iter()
                    .map(SpreadReport::from)
                    .collect();
                Ok(CommandOutcome::Spread(reports))
            }
            Command::Join { address } => {
                self.join(&address).await?;
                Ok(CommandOutcome::JoinSent)
            }
        }
    }

    /// Stop the receive loop and close every endpoint.
    ///
    /// Returns how many endpoints were closed; calling it again is harmless.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.send_replace(true);
        let closed = self.view.cleanup().await;
        info!(
            "Peer {} shutting down, closed {} endpoint(s)",
            self.identity, closed
        );
        closed
    }
}

/// Errors a UDP read can report without the socket being unusable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ChannelSink;
    use std::time::Duration;
    use tokio::time::timeout;

    fn config(identity: &str, peers: Vec<PeerDescriptor>) -> Config {
        Config {
            identity: identity.into(),
            listen_address: "127.0.0.1:0".into(),
            source_address: "127.0.0.1:0".parse().unwrap(),
            advertise_address: None,
            control_bind: None,
            peers,
        }
    }

    fn origin() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    async fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let n = timeout(Duration::from_secs(2), socket.recv(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn test_data_is_delivered_to_sink() {
        let (sink, mut rx) = ChannelSink::channel(4);
        let peer = Peer::bind(&config("a", vec![]), Arc::new(sink)).await.unwrap();

        let datagram = codec::encode(&Update::data("hello")).unwrap();
        assert_eq!(peer.handle_datagram(&datagram, origin()).await, Dispatch::Delivered);

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload, b"hello");
        assert_eq!(delivery.from, origin());
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let (sink, mut rx) = ChannelSink::channel(4);
        let peer = Peer::bind(&config("a", vec![]), Arc::new(sink)).await.unwrap();

        assert_eq!(peer.handle_datagram(&[0, 9, 0], origin()).await, Dispatch::Malformed);
        assert_eq!(peer.handle_datagram(&[], origin()).await, Dispatch::Malformed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_forwards_once_and_skips_joiner() {
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let c = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let seeds = vec![PeerDescriptor::new("b", b.local_addr().unwrap().to_string())];
        let peer = Peer::bind(&config("a", seeds), Arc::new(ChannelSink::channel(1).0))
            .await
            .unwrap();

        let joiner = PeerDescriptor::new("c", c.local_addr().unwrap().to_string());
        let datagram = codec::encode(&Update::join(&joiner)).unwrap();

        assert_eq!(
            peer.handle_datagram(&datagram, origin()).await,
            Dispatch::Joined { forwarded: 1 }
        );
        assert!(peer.view().contains("c").await);
        assert_eq!(codec::decode(&recv(&b).await).unwrap(), Update::join(&joiner));

        assert_eq!(
            peer.handle_datagram(&datagram, origin()).await,
            Dispatch::DuplicateJoin
        );
        assert_eq!(peer.forward_rounds(), 1);

        let mut buf = [0u8; 64];
        assert!(timeout(Duration::from_millis(200), c.recv(&mut buf)).await.is_err());
        assert!(timeout(Duration::from_millis(200), b.recv(&mut buf)).await.is_err());
    }

    #[tokio::test]
    async fn test_own_join_is_ignored() {
        let peer = Peer::bind(&config("a", vec![]), Arc::new(ChannelSink::channel(1).0))
            .await
            .unwrap();
        let own = PeerDescriptor::new("a", "127.0.0.1:1");
        let datagram = codec::encode(&Update::join(&own)).unwrap();

        assert_eq!(peer.handle_datagram(&datagram, origin()).await, Dispatch::OwnJoin);
        assert!(peer.view().is_empty().await);
    }

    #[tokio::test]
    async fn test_unresolvable_join_is_rejected() {
        let peer = Peer::bind(&config("a", vec![]), Arc::new(ChannelSink::channel(1).0))
            .await
            .unwrap();
        let datagram = codec::encode(&Update::join(&PeerDescriptor::new("x", "garbage"))).unwrap();

        assert_eq!(peer.handle_datagram(&datagram, origin()).await, Dispatch::JoinRejected);
        assert_eq!(peer.forward_rounds(), 0);
    }

    #[tokio::test]
    async fn test_join_after_shutdown_is_rejected() {
        let c = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = Peer::bind(&config("a", vec![]), Arc::new(ChannelSink::channel(1).0))
            .await
            .unwrap();
        peer.shutdown().await;

        let joiner = PeerDescriptor::new("c", c.local_addr().unwrap().to_string());
        let datagram = codec::encode(&Update::join(&joiner)).unwrap();

        assert_eq!(peer.handle_datagram(&datagram, origin()).await, Dispatch::JoinRejected);
        assert!(peer.view().is_empty().await);
    }

    #[tokio::test]
    async fn test_join_queued_behind_shutdown_leaves_view_empty() {
        let (sink, mut rx) = ChannelSink::channel(1);
        let peer = Peer::bind(&config("a", vec![]), Arc::new(sink)).await.unwrap();
        let handle = peer.spawn();
        let addr = peer.local_addr().unwrap();

        // Two payloads fill the sink and park the loop inside `deliver`,
        // so the join below is still queued when shutdown runs.
        let c = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let joiner = PeerDescriptor::new("c", c.local_addr().unwrap().to_string());
        for update in [Update::data("one"), Update::data("two"), Update::join(&joiner)] {
            c.send_to(&codec::encode(&update).unwrap(), addr).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        peer.shutdown().await;
        for _ in 0..2 {
            timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        }
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

        assert!(!peer.view().contains("c").await);
        assert!(peer.view().is_empty().await);
        assert_eq!(peer.forward_rounds(), 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let peer = Peer::bind(&config("a", vec![]), Arc::new(ChannelSink::channel(1).0))
            .await
            .unwrap();
        let err = peer.send("nonexistent", b"content").await.unwrap_err();
        assert!(matches!(err, Error::PeerUnknown(id) if id == "nonexistent"));
    }

    #[tokio::test]
    async fn test_seed_with_own_identity_is_skipped() {
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let seeds = vec![
            PeerDescriptor::new("a", "127.0.0.1:1"),
            PeerDescriptor::new("b", b.local_addr().unwrap().to_string()),
        ];
        let peer = Peer::bind(&config("a", seeds), Arc::new(ChannelSink::channel(1).0))
            .await
            .unwrap();
        assert_eq!(peer.view().identities().await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_join_sends_own_descriptor() {
        let contact = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = config("c", vec![]);
        cfg.advertise_address = Some("192.0.2.1:7946".into());
        let peer = Peer::bind(&cfg, Arc::new(ChannelSink::channel(1).0)).await.unwrap();

        peer.join(&contact.local_addr().unwrap().to_string())
            .await
            .unwrap();

        assert_eq!(
            codec::decode(&recv(&contact).await).unwrap(),
            Update::join(&PeerDescriptor::new("c", "192.0.2.1:7946"))
        );
        assert!(peer.view().is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_and_is_idempotent() {
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let seeds = vec![PeerDescriptor::new("b", b.local_addr().unwrap().to_string())];
        let peer = Peer::bind(&config("a", seeds), Arc::new(ChannelSink::channel(1).0))
            .await
            .unwrap();
        let handle = peer.spawn();

        assert_eq!(peer.shutdown().await, 1);
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("receive loop did not stop")
            .unwrap();
        assert_eq!(peer.shutdown().await, 0);
    }
}
