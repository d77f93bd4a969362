use std::{io, net::SocketAddr};

use comms::{
    Capabilities, Multipart, Step,
    msg::{self, FLUSH, GREETING, SENTINEL_ID},
};
use log::{debug, info};
use serde::de::DeserializeOwned;
use tokio::{runtime::Runtime, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::connector::Connector;

/// How many replies the connector may hold before it stops reading the network.
const OUTBOUND_DEPTH: usize = 64;

/// A result handed back by `Client::drain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drained {
    /// True if this is the result that satisfied the last barrier.
    pub barrier: bool,
    /// The external identifier the work was submitted with.
    pub id: u32,
    /// The serialized outputs and, when the engine records them, traces.
    pub payload: Multipart,
}

impl Drained {
    /// Returns true for the acknowledgement of a barrier that had nothing to wait for.
    pub fn is_sentinel(&self) -> bool {
        self.id == SENTINEL_ID && self.payload.is_empty()
    }

    /// Deserializes the output items.
    ///
    /// # Returns
    /// The outputs, empty for a sentinel acknowledgement.
    pub fn outputs<O: DeserializeOwned>(&self) -> io::Result<Vec<O>> {
        match self.payload.first() {
            Some(frame) => msg::decode_items(frame),
            None => Ok(Vec::new()),
        }
    }

    /// Deserializes the trace items, if any were recorded.
    pub fn traces<T: DeserializeOwned>(&self) -> io::Result<Option<Vec<T>>> {
        self.payload
            .get(1)
            .map(|frame| msg::decode_items(frame))
            .transpose()
    }
}

/// A blocking handle to a dispatch service.
///
/// The connection itself is owned by a background connector task, every call on this
/// handle only ever touches the queues shared with it.
pub struct Client {
    runtime: Runtime,
    caps: Capabilities,
    inbound: mpsc::Sender<Multipart>,
    outbound: mpsc::Receiver<Multipart>,
    shutdown: CancellationToken,
    connector: Option<JoinHandle<io::Result<()>>>,
}

impl Client {
    /// Connects to the service at `addr` and performs the greeting.
    ///
    /// # Arguments
    /// * `addr` - The broker's client facing address.
    ///
    /// # Returns
    /// A connected client or an io error if the service can't be reached.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let runtime = Runtime::new()?;
        let (caps, channel) = runtime.block_on(async {
            let (mut rx, mut tx) = comms::connect(addr).await?;
            tx.send(&vec![GREETING.to_vec()]).await?;

            let reply = rx.recv().await?;
            let [frame] = reply.as_slice() else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected the capabilities, got {} frames", reply.len()),
                ));
            };

            Ok((Capabilities::from_frame(frame)?, (rx, tx)))
        })?;

        info!(
            "connected to {addr}, work group size {}, max bunch size {}",
            caps.work_group_size, caps.max_bunch_size
        );

        let (inbound, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, outbound) = mpsc::channel(OUTBOUND_DEPTH);
        let shutdown = CancellationToken::new();

        let connector = Connector::new(channel, inbound_rx, outbound_tx, shutdown.clone());
        let connector = runtime.spawn(connector.run());

        Ok(Self {
            runtime,
            caps,
            inbound,
            outbound,
            shutdown,
            connector: Some(connector),
        })
    }

    /// Returns the batching constraints announced by the service.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Submits `steps` under the external identifier `id`.
    ///
    /// Blocks until the connector took the previous submission.
    pub fn submit<S: Step>(&mut self, steps: &[S], id: u32) -> io::Result<()> {
        let msg = vec![msg::encode_items(steps)?, msg::encode_id(id)];
        self.push(msg)
    }

    /// Asks for everything submitted so far to be returned before anything else.
    pub fn submit_barrier(&mut self) -> io::Result<()> {
        self.push(vec![FLUSH.to_vec()])
    }

    /// Blocks until the next result is available.
    pub fn drain(&mut self) -> io::Result<Drained> {
        let Some(mut msg) = self.outbound.blocking_recv() else {
            return Err(self.closed());
        };

        if msg.len() < 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("a result has at least two frames, got {}", msg.len()),
            ));
        }

        let barrier = msg::decode_flag(&msg[0])?;
        let id = msg::decode_id(&msg[msg.len() - 1])?;

        msg.pop();
        msg.remove(0);

        Ok(Drained {
            barrier,
            id,
            payload: msg,
        })
    }

    /// Stops the connector and closes the connection.
    ///
    /// # Returns
    /// The connector's error if it failed before being stopped.
    pub fn close(mut self) -> io::Result<()> {
        self.shutdown.cancel();
        self.join()
    }

    fn push(&mut self, msg: Multipart) -> io::Result<()> {
        if self.inbound.blocking_send(msg).is_err() {
            return Err(self.closed());
        }

        Ok(())
    }

    /// Builds the error returned once the connector stopped on its own.
    fn closed(&mut self) -> io::Error {
        match self.join() {
            Err(e) => e,
            Ok(()) => io::Error::new(io::ErrorKind::BrokenPipe, "the connection is closed"),
        }
    }

    fn join(&mut self) -> io::Result<()> {
        let Some(connector) = self.connector.take() else {
            return Ok(());
        };

        debug!("waiting for the connector to stop");
        self.runtime.block_on(connector).map_err(io::Error::other)?
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
