use std::{collections::HashMap, io, mem};

use comms::{
    Multipart, OnoReceiver, OnoSender,
    msg::{self, FLUSH, SENTINEL_ID},
};
use log::{debug, trace, warn};
use tokio::{
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

/// Outstanding requests by external id, counted since the same id may be reused.
type Outstanding = HashMap<u32, usize>;

/// The only owner of the network endpoint.
///
/// Relays the caller's submissions to the broker and the broker's replies back to the
/// caller, prefixing every reply with whether it satisfied the pending barrier.
pub(crate) struct Connector {
    rx: OnoReceiver<OwnedReadHalf>,
    tx: OnoSender<OwnedWriteHalf>,
    inbound: mpsc::Receiver<Multipart>,
    outbound: mpsc::Sender<Multipart>,
    shutdown: CancellationToken,
    in_flight: Outstanding,
    barrier: Outstanding,
    deferred_acks: usize,
}

impl Connector {
    pub(crate) fn new(
        (rx, tx): (OnoReceiver<OwnedReadHalf>, OnoSender<OwnedWriteHalf>),
        inbound: mpsc::Receiver<Multipart>,
        outbound: mpsc::Sender<Multipart>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx,
            tx,
            inbound,
            outbound,
            shutdown,
            in_flight: HashMap::new(),
            barrier: HashMap::new(),
            deferred_acks: 0,
        }
    }

    /// Relays messages until shutdown, until the caller goes away or until the broker
    /// closes the connection.
    pub(crate) async fn run(mut self) -> io::Result<()> {
        let res = self.relay().await;

        if let Err(e) = self.tx.shutdown().await {
            debug!("failed to shut the connection down: {e}");
        }

        res
    }

    async fn relay(&mut self) -> io::Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                msg = self.inbound.recv() => {
                    let Some(msg) = msg else { break };
                    if !self.forward(msg).await? {
                        break;
                    }
                }
                reply = self.rx.recv() => {
                    if !self.deliver(reply?).await? {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Sends the caller's `msg` to the broker.
    ///
    /// # Returns
    /// False if the caller is gone.
    async fn forward(&mut self, msg: Multipart) -> io::Result<bool> {
        if msg::is_tag(&msg, FLUSH) {
            return self.barrier().await;
        }

        let [_, id] = msg.as_slice() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("a submission has two frames, got {}", msg.len()),
            ));
        };

        let id = msg::decode_id(id)?;
        *self.in_flight.entry(id).or_default() += 1;
        trace!(id = id; "forwarding submission");

        self.tx.send(&msg).await?;
        Ok(true)
    }

    async fn barrier(&mut self) -> io::Result<bool> {
        if self.in_flight.is_empty() && self.barrier.is_empty() {
            debug!("barrier with nothing outstanding, acknowledging right away");
            return Ok(self.outbound.send(sentinel_ack()).await.is_ok());
        }

        if self.barrier.is_empty() {
            self.barrier = mem::take(&mut self.in_flight);
        } else {
            // The earlier barrier is still pending, both are satisfied together.
            for (id, n) in self.in_flight.drain() {
                *self.barrier.entry(id).or_default() += n;
            }
            self.deferred_acks += 1;
        }

        debug!("barrier waits for {} requests", self.barrier.len());
        self.tx.send(&vec![FLUSH.to_vec()]).await?;
        Ok(true)
    }

    /// Hands `reply` to the caller.
    ///
    /// # Returns
    /// False if the caller is gone.
    async fn deliver(&mut self, reply: Multipart) -> io::Result<bool> {
        let id = match reply.last() {
            Some(frame) => msg::decode_id(frame)?,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "received a reply without frames",
                ));
            }
        };

        let satisfied = if retire(&mut self.barrier, id) {
            self.barrier.is_empty()
        } else {
            if !retire(&mut self.in_flight, id) {
                warn!(id = id; "received a reply nothing was waiting for");
            }
            false
        };

        let mut msg = Vec::with_capacity(reply.len() + 1);
        msg.push(msg::encode_flag(satisfied));
        msg.extend(reply);

        if self.outbound.send(msg).await.is_err() {
            return Ok(false);
        }

        if satisfied {
            for _ in 0..mem::take(&mut self.deferred_acks) {
                if self.outbound.send(sentinel_ack()).await.is_err() {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

/// Decrements the count for `id`.
///
/// # Returns
/// False if `id` wasn't outstanding.
fn retire(outstanding: &mut Outstanding, id: u32) -> bool {
    let Some(n) = outstanding.get_mut(&id) else {
        return false;
    };

    *n -= 1;
    if *n == 0 {
        outstanding.remove(&id);
    }

    true
}

fn sentinel_ack() -> Multipart {
    vec![msg::encode_flag(true), msg::encode_id(SENTINEL_ID)]
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{net::TcpListener, time};

    use super::*;

    #[tokio::test]
    async fn a_local_acknowledgement_nobody_takes_stops_the_connector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (channel, accepted) = tokio::join!(comms::connect(addr), listener.accept());
        let (_broker_side, _) = accepted.unwrap();

        let (inbound_tx, inbound) = mpsc::channel(1);
        let (outbound, outbound_rx) = mpsc::channel(1);
        drop(outbound_rx);

        let connector = Connector::new(
            channel.unwrap(),
            inbound,
            outbound,
            CancellationToken::new(),
        );
        inbound_tx.send(vec![FLUSH.to_vec()]).await.unwrap();

        let res = time::timeout(Duration::from_secs(1), connector.run()).await;
        assert!(matches!(res, Ok(Ok(()))));
        drop(inbound_tx);
    }

    #[test]
    fn retire_counts_repeated_ids() {
        let mut outstanding = HashMap::from([(3, 2)]);

        assert!(retire(&mut outstanding, 3));
        assert_eq!(outstanding.get(&3), Some(&1));
        assert!(retire(&mut outstanding, 3));
        assert!(outstanding.is_empty());
        assert!(!retire(&mut outstanding, 3));
    }
}
