//! An addressable endpoint: every accepted connection gets its own peer id, which is
//! attached to everything received from it and used to route replies back.

use std::{collections::HashMap, io, net::SocketAddr};

use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};

use crate::{Multipart, OnoReceiver, OnoSender};

/// The address the router assigned to a connected peer.
pub type PeerId = u64;

/// A message together with the address of the peer that sent it.
#[derive(Debug)]
pub struct Envelope {
    pub peer: PeerId,
    pub msg: Multipart,
}

type Joined = (PeerId, OnoSender<OwnedWriteHalf>);

/// What a connection reader hands to the router, in the order it happened.
enum Inbound {
    Message(Envelope),
    Left(PeerId),
}

/// Accepts connections and multiplexes them into a single inbound queue.
///
/// A peer's route is dropped, and its socket closed, once everything it sent before
/// disconnecting was received.
pub struct Router {
    addr: SocketAddr,
    inbound: mpsc::Receiver<Inbound>,
    joined: mpsc::UnboundedReceiver<Joined>,
    peers: HashMap<PeerId, OnoSender<OwnedWriteHalf>>,
    acceptor: JoinHandle<()>,
}

impl Router {
    /// Binds a new `Router` to `addr`.
    ///
    /// # Arguments
    /// * `addr` - The address to listen at.
    /// * `hwm` - The amount of inbound messages to queue before connections stop being read.
    ///
    /// # Returns
    /// A new `Router` instance or an io error if failed to bind.
    pub async fn bind(addr: SocketAddr, hwm: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!("router listening at {addr}");

        let (inbound_tx, inbound) = mpsc::channel(hwm.max(1));
        let (joined_tx, joined) = mpsc::unbounded_channel();
        let acceptor = tokio::spawn(accept(listener, inbound_tx, joined_tx));

        Ok(Self {
            addr,
            inbound,
            joined,
            peers: HashMap::new(),
            acceptor,
        })
    }

    /// Returns the address this router is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Waits for the next message from any peer.
    ///
    /// This method is cancel safe.
    ///
    /// # Returns
    /// The next envelope, or `None` if the router stopped accepting connections.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.inbound.recv().await? {
                Inbound::Message(envelope) => return Some(envelope),
                Inbound::Left(peer) => {
                    self.register_joined();
                    if self.peers.remove(&peer).is_some() {
                        debug!(peer = peer; "route removed");
                    }
                }
            }
        }
    }

    /// Sends `msg` to the peer addressed by `peer`.
    ///
    /// # Errors
    /// Fails with `io::ErrorKind::NotConnected` if `peer` was never seen by this router,
    /// or with the underlying io error if the write fails.
    pub async fn send(&mut self, peer: PeerId, msg: &Multipart) -> io::Result<()> {
        self.register_joined();

        let Some(tx) = self.peers.get_mut(&peer) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no route to peer {peer}"),
            ));
        };

        tx.send(msg).await
    }

    /// Returns the amount of peers that can currently be addressed.
    pub fn peers(&mut self) -> usize {
        self.register_joined();
        self.peers.len()
    }

    fn register_joined(&mut self) {
        while let Ok((id, tx)) = self.joined.try_recv() {
            self.peers.insert(id, tx);
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept(
    listener: TcpListener,
    inbound: mpsc::Sender<Inbound>,
    joined: mpsc::UnboundedSender<Joined>,
) {
    let mut readers = JoinSet::new();
    let mut next_peer: PeerId = 0;

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("failed to accept a connection: {e}");
                continue;
            }
        };

        while readers.try_join_next().is_some() {}

        let peer = next_peer;
        next_peer += 1;
        debug!(peer = peer; "accepted connection from {addr}");

        let (rx, tx) = stream.into_split();
        let (rx, tx) = crate::channel(rx, tx);

        // The route has to be registered before anything from this peer is delivered.
        if joined.send((peer, tx)).is_err() {
            break;
        }

        readers.spawn(read_peer(peer, rx, inbound.clone()));
    }
}

async fn read_peer(
    peer: PeerId,
    mut rx: OnoReceiver<OwnedReadHalf>,
    inbound: mpsc::Sender<Inbound>,
) {
    loop {
        let msg = match rx.recv().await {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(peer = peer; "peer disconnected");
                break;
            }
            Err(e) => {
                warn!(peer = peer; "dropping connection: {e}");
                break;
            }
        };

        let envelope = Envelope { peer, msg };
        if inbound.send(Inbound::Message(envelope)).await.is_err() {
            return;
        }
    }

    let _ = inbound.send(Inbound::Left(peer)).await;
}

/// Connects to a `Router` and splits the stream into the communication ends.
pub async fn connect(
    addr: SocketAddr,
) -> io::Result<(OnoReceiver<OwnedReadHalf>, OnoSender<OwnedWriteHalf>)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (rx, tx) = stream.into_split();
    Ok(crate::channel(rx, tx))
}
