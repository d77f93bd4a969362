use std::{io, net::SocketAddr, sync::Arc};

use comms::{Capabilities, Router, inproc};
use log::{error, info};
use tokio::{sync::Barrier, task::JoinSet};
use tokio_util::sync::CancellationToken;
use worker::{Engine, Worker};

use crate::{
    broker::Broker,
    capabilities,
    config::BrokerConfig,
    error::{BrokerErr, Result},
};

/// A running dispatch service: the broker task and one worker task per engine.
pub struct Service {
    addr: SocketAddr,
    caps: Capabilities,
    shutdown: CancellationToken,
    tasks: JoinSet<Result<()>>,
}

impl Service {
    /// Negotiates the engines' capabilities, binds the client endpoint and spawns every task.
    ///
    /// Returns once every task reached the startup rendezvous, so a shutdown issued right
    /// after this call is observed by all of them.
    ///
    /// # Arguments
    /// * `config` - Where to listen for clients.
    /// * `engines` - The engines to drive, one worker is spawned for each.
    ///
    /// # Errors
    /// Fails on invalid engine configurations or if the address can't be bound.
    pub async fn start<E: Engine + 'static>(config: BrokerConfig, engines: Vec<E>) -> Result<Self> {
        let caps = capabilities::negotiate(&engines)?;

        let frontend = Router::bind(config.addr(), config.hwm()).await?;
        let addr = frontend.local_addr();
        let (backend, dealers) = inproc::backend(engines.len(), config.hwm());

        let shutdown = CancellationToken::new();
        let rendezvous = Arc::new(Barrier::new(engines.len() + 2));
        let mut tasks = JoinSet::new();

        for (engine, dealer) in engines.into_iter().zip(dealers) {
            let worker = Worker::new(dealer.id(), engine, caps)?;
            let rendezvous = rendezvous.clone();
            let shutdown = shutdown.child_token();

            tasks.spawn(async move {
                rendezvous.wait().await;
                worker.run(dealer, shutdown).await.map_err(BrokerErr::from)
            });
        }

        let broker = Broker::new(frontend, backend, caps, shutdown.child_token());
        let broker_rendezvous = rendezvous.clone();
        tasks.spawn(async move {
            broker_rendezvous.wait().await;
            broker.run().await
        });

        rendezvous.wait().await;
        info!(
            "service listening at {addr}, work group size {}, max bunch size {}",
            caps.work_group_size, caps.max_bunch_size
        );

        Ok(Self {
            addr,
            caps,
            shutdown,
            tasks,
        })
    }

    /// Returns the address clients should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Signals every task to stop and waits for them.
    ///
    /// # Returns
    /// The first error raised by any task.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down");
        self.shutdown.cancel();
        self.join().await
    }

    /// Waits until the service stops on its own, which only happens on failure.
    ///
    /// The first failing task takes every other task down with it.
    pub async fn wait(&mut self) -> Result<()> {
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        let mut outcome = Ok(());

        while let Some(res) = self.tasks.join_next().await {
            let res = res.unwrap_or_else(|e| Err(BrokerErr::Io(io::Error::other(e))));

            if let Err(e) = res {
                error!("task failed: {e}");
                self.shutdown.cancel();

                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        outcome
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
