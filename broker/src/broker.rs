use std::collections::{HashMap, VecDeque};

use comms::{
    Capabilities, Envelope, Multipart, PeerId, Router,
    inproc::Backend,
    msg::{self, FLUSH, GREETING},
};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerErr, Result};

/// Where to send a worker's reply and which external id to restore on it.
#[derive(Debug)]
struct PendingClient {
    peer: PeerId,
    external: Vec<u8>,
}

enum Event {
    Shutdown,
    Worker(usize, Multipart),
    Client(Envelope),
}

/// Routes client requests to idle workers and worker replies back to the clients.
///
/// Client messages are only read while at least one worker is idle, so new work is
/// pushed back onto the clients instead of being queued here.
pub struct Broker {
    frontend: Router,
    backend: Backend,
    caps: Capabilities,
    idle: VecDeque<usize>,
    pending: HashMap<u32, PendingClient>,
    next_client_id: u32,
    shutdown: CancellationToken,
}

impl Broker {
    /// Creates a new `Broker`.
    ///
    /// # Arguments
    /// * `frontend` - The endpoint clients connect to.
    /// * `backend` - The link with every worker.
    /// * `caps` - The constraints announced to greeting clients.
    /// * `shutdown` - The process wide shutdown signal.
    pub fn new(
        frontend: Router,
        backend: Backend,
        caps: Capabilities,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            frontend,
            backend,
            caps,
            idle: VecDeque::new(),
            pending: HashMap::new(),
            next_client_id: 0,
            shutdown,
        }
    }

    /// Runs the routing loop until the shutdown signal is observed.
    ///
    /// # Errors
    /// Returns `BrokerErr` on protocol violations and on undeliverable messages.
    pub async fn run(mut self) -> Result<()> {
        info!("broker started with {} workers", self.backend.len());

        loop {
            let event = if self.idle.is_empty() {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Event::Shutdown,
                    msg = self.backend.recv() => match msg {
                        Some((worker, msg)) => Event::Worker(worker, msg),
                        None => Event::Shutdown,
                    },
                }
            } else {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Event::Shutdown,
                    msg = self.backend.recv() => match msg {
                        Some((worker, msg)) => Event::Worker(worker, msg),
                        None => Event::Shutdown,
                    },
                    envelope = self.frontend.recv() => match envelope {
                        Some(envelope) => Event::Client(envelope),
                        None => Event::Shutdown,
                    },
                }
            };

            match event {
                Event::Shutdown => break,
                Event::Worker(worker, msg) => self.handle_worker(worker, msg).await?,
                Event::Client(envelope) => self.handle_client(envelope).await?,
            }
        }

        info!(
            "broker stopped with {} requests in flight",
            self.pending.len()
        );
        Ok(())
    }

    async fn handle_worker(&mut self, worker: usize, mut msg: Multipart) -> Result<()> {
        if msg::is_idle_signal(&msg) {
            debug!(worker_id = worker; "worker is idle");
            self.idle.push_back(worker);
            return Ok(());
        }

        let Some(id_frame) = msg.pop() else {
            return Err(BrokerErr::UnexpectedMessage { frames: 0 });
        };

        let client_id = msg::decode_id(&id_frame)?;
        let Some(client) = self.pending.remove(&client_id) else {
            warn!(worker_id = worker; "dropping reply for unknown client id {client_id}");
            return Ok(());
        };

        debug!(
            worker_id = worker, client_id = client_id, peer = client.peer;
            "routing reply back to its client"
        );

        msg.push(client.external);
        self.frontend.send(client.peer, &msg).await?;
        Ok(())
    }

    async fn handle_client(&mut self, envelope: Envelope) -> Result<()> {
        let Envelope { peer, msg } = envelope;

        if msg::is_tag(&msg, GREETING) {
            debug!(peer = peer; "greeting client");
            let reply = vec![self.caps.to_frame()?];
            self.frontend.send(peer, &reply).await?;
        } else if msg::is_tag(&msg, FLUSH) {
            debug!(peer = peer; "flushing {} idle workers", self.idle.len());
            while let Some(worker) = self.idle.pop_front() {
                self.backend.send(worker, vec![FLUSH.to_vec()]).await?;
            }
        } else if msg.len() == 2 {
            self.dispatch(peer, msg).await?;
        } else {
            return Err(BrokerErr::UnexpectedMessage { frames: msg.len() });
        }

        Ok(())
    }

    /// Hands a `[steps, external id]` submission to the next idle worker, swapping the
    /// external id for a fresh client id.
    async fn dispatch(&mut self, peer: PeerId, mut msg: Multipart) -> Result<()> {
        let Some(worker) = self.idle.pop_front() else {
            return Err(BrokerErr::NoIdleWorker);
        };

        let client_id = self.next_client_id;
        if self.pending.contains_key(&client_id) {
            return Err(BrokerErr::ClientIdCollision { id: client_id });
        }

        self.next_client_id = client_id.wrapping_add(1);

        let Some(external) = msg.pop() else {
            return Err(BrokerErr::UnexpectedMessage { frames: 0 });
        };

        msg.push(msg::encode_id(client_id));
        self.pending.insert(client_id, PendingClient { peer, external });

        debug!(
            worker_id = worker, client_id = client_id, peer = peer;
            "dispatching request"
        );

        self.backend.send(worker, msg).await?;
        Ok(())
    }
}
