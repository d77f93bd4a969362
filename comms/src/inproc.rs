//! Process local messaging between the broker and the workers it owns.

use std::io;

use tokio::sync::mpsc;

use crate::Multipart;

/// Creates the broker side `Backend` and one `Dealer` per worker.
///
/// # Arguments
/// * `workers` - The amount of workers to connect.
/// * `depth` - The capacity of every queue.
///
/// # Returns
/// The backend and the dealers, the dealer at index `i` is addressed as `i` by the backend.
pub fn backend(workers: usize, depth: usize) -> (Backend, Vec<Dealer>) {
    let depth = depth.max(1);
    let (tx, inbound) = mpsc::channel(depth);

    let (outbound, dealers): (Vec<_>, Vec<_>) = (0..workers)
        .map(|id| {
            let (out_tx, rx) = mpsc::channel(depth);
            let dealer = Dealer {
                id,
                tx: tx.clone(),
                rx,
            };

            (out_tx, dealer)
        })
        .unzip();

    (Backend { inbound, outbound }, dealers)
}

/// The broker's end, it receives from every worker and addresses each one of them.
pub struct Backend {
    inbound: mpsc::Receiver<(usize, Multipart)>,
    outbound: Vec<mpsc::Sender<Multipart>>,
}

impl Backend {
    /// Waits for the next message from any worker.
    ///
    /// This method is cancel safe.
    ///
    /// # Returns
    /// The worker's index and its message, or `None` once every dealer was dropped.
    pub async fn recv(&mut self) -> Option<(usize, Multipart)> {
        self.inbound.recv().await
    }

    /// Sends `msg` to the worker at index `worker`.
    ///
    /// # Errors
    /// Fails with `io::ErrorKind::NotConnected` for an unknown index and with
    /// `io::ErrorKind::BrokenPipe` if that worker's dealer was dropped.
    pub async fn send(&self, worker: usize, msg: Multipart) -> io::Result<()> {
        let Some(tx) = self.outbound.get(worker) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no route to worker {worker}"),
            ));
        };

        tx.send(msg).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("worker {worker} is gone"),
            )
        })
    }

    /// Returns the amount of workers attached to this backend.
    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    /// Returns true if no worker is attached to this backend.
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }
}

/// A worker's end of the in-process link with the broker.
pub struct Dealer {
    id: usize,
    tx: mpsc::Sender<(usize, Multipart)>,
    rx: mpsc::Receiver<Multipart>,
}

impl Dealer {
    /// Returns the index the backend uses to address this dealer.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Sends `msg` to the backend.
    ///
    /// # Errors
    /// Fails with `io::ErrorKind::BrokenPipe` if the backend was dropped.
    pub async fn send(&self, msg: Multipart) -> io::Result<()> {
        self.tx.send((self.id, msg)).await.map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "the backend is gone")
        })
    }

    /// Waits for the next message from the backend.
    ///
    /// This method is cancel safe.
    ///
    /// # Returns
    /// The message, or `None` once the backend was dropped.
    pub async fn recv(&mut self) -> Option<Multipart> {
        self.rx.recv().await
    }
}
