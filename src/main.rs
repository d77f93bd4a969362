use anyhow::Context;
use broker::{BrokerConfig, Service};
use log::info;
use tokio::signal;
use worker::loopback::LoopbackEngine;

const WORK_GROUP_SIZE: usize = 32;
const MAX_BUNCH_SIZE: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = BrokerConfig::from_env();
    let engine = LoopbackEngine::new(WORK_GROUP_SIZE, MAX_BUNCH_SIZE);
    let mut service = Service::start(config, vec![engine])
        .await
        .context("failed to start the service")?;

    info!("serving the loopback engine at {}", service.local_addr());

    tokio::select! {
        res = service.wait() => return res.context("the service failed"),
        res = signal::ctrl_c() => res.context("failed to listen for ctrl-c")?,
    }

    service.shutdown().await?;
    Ok(())
}
