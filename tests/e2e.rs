use std::{io, net::SocketAddr};

use photon_dispatch::{
    broker::{BrokerConfig, Service},
    client::Client,
    comms::msg::SENTINEL_ID,
    worker::loopback::{Completion, Hop, LoopbackEngine, Photon, Segment, Submission},
};
use tokio::runtime::Runtime;

/// A service running on its own runtime, so the blocking client can be driven from the
/// test's thread.
struct Running {
    runtime: Runtime,
    service: Service,
}

impl Running {
    fn start(engine: LoopbackEngine) -> io::Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let runtime = Runtime::new()?;
        let config = BrokerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        let service = runtime.block_on(Service::start(config, vec![engine]))?;

        Ok(Self { runtime, service })
    }

    fn connect(&self) -> io::Result<Client> {
        Client::connect(self.service.local_addr())
    }

    fn stop(self) -> io::Result<()> {
        let Self { runtime, service } = self;
        runtime.block_on(service.shutdown())?;
        Ok(())
    }
}

fn segments(ids: std::ops::Range<u32>) -> Vec<Segment> {
    ids.map(|i| Segment::new(i, i as f32)).collect()
}

fn sorted_ids(photons: &[Photon]) -> Vec<u32> {
    let mut ids: Vec<_> = photons.iter().map(|p| p.id).collect();
    ids.sort_unstable();
    ids
}

#[test]
fn a_large_request_comes_back_whole_after_a_barrier() -> io::Result<()> {
    let mut engine = LoopbackEngine::new(32, 1024);
    let mut submissions = engine.observe();

    let running = Running::start(engine)?;
    let mut client = running.connect()?;
    assert_eq!(client.capabilities().max_bunch_size, 1024);

    client.submit(&segments(0..1500), 7)?;
    client.submit_barrier()?;

    let drained = client.drain()?;
    assert!(drained.barrier);
    assert_eq!(drained.id, 7);
    assert_eq!(drained.traces::<Hop>()?, None);

    let photons: Vec<Photon> = drained.outputs()?;
    assert_eq!(sorted_ids(&photons), (0..1500).collect::<Vec<_>>());
    assert!(photons.iter().all(|p| p.energy == 2. * p.id as f32));

    let first = submissions.try_recv().unwrap();
    assert_eq!((first.len, first.noops), (1024, 0));

    let Submission { len, noops, .. } = submissions.try_recv().unwrap();
    assert_eq!(len - noops, 476);
    assert_eq!(len % 32, 0);
    assert!(submissions.try_recv().is_err());

    client.close()?;
    running.stop()
}

#[test]
fn a_barrier_with_no_work_is_acknowledged_with_the_sentinel() -> io::Result<()> {
    let running = Running::start(LoopbackEngine::new(8, 64))?;
    let mut client = running.connect()?;

    client.submit_barrier()?;
    let ack = client.drain()?;

    assert!(ack.barrier);
    assert_eq!(ack.id, SENTINEL_ID);
    assert!(ack.payload.is_empty());

    client.close()?;
    running.stop()
}

#[test]
fn out_of_order_completion_keeps_requests_apart() -> io::Result<()> {
    let engine = LoopbackEngine::new(8, 32)
        .with_completion(Completion::Shuffled { seed: 11 })
        .with_traces();

    let running = Running::start(engine)?;
    let mut client = running.connect()?;

    client.submit(&segments(0..40), 1)?;
    client.submit(&segments(100..125), 2)?;
    client.submit_barrier()?;

    let mut seen = Vec::new();
    loop {
        let drained = client.drain()?;
        let photons: Vec<Photon> = drained.outputs()?;
        let traces = drained.traces::<Hop>()?.unwrap_or_default();
        assert_eq!(traces.len(), photons.len());

        seen.push((drained.id, sorted_ids(&photons)));
        if drained.barrier {
            break;
        }
    }

    seen.sort_unstable();
    assert_eq!(
        seen,
        vec![
            (1, (0..40).collect::<Vec<_>>()),
            (2, (100..125).collect::<Vec<_>>()),
        ]
    );

    client.close()?;
    running.stop()
}

#[test]
fn every_client_gets_its_own_results() -> io::Result<()> {
    let running = Running::start(LoopbackEngine::new(16, 256))?;
    let mut first = running.connect()?;
    let mut second = running.connect()?;

    first.submit(&segments(0..300), 1)?;
    first.submit_barrier()?;

    let drained = first.drain()?;
    assert_eq!((drained.id, drained.barrier), (1, true));
    assert_eq!(drained.outputs::<Photon>()?.len(), 300);

    second.submit(&segments(0..50), 1)?;
    second.submit_barrier()?;

    let drained = second.drain()?;
    assert_eq!((drained.id, drained.barrier), (1, true));
    assert_eq!(drained.outputs::<Photon>()?.len(), 50);

    first.close()?;
    second.close()?;
    running.stop()
}

#[test]
fn an_empty_submission_completes_right_away() -> io::Result<()> {
    let running = Running::start(LoopbackEngine::new(4, 16))?;
    let mut client = running.connect()?;

    client.submit::<Segment>(&[], 3)?;

    let drained = client.drain()?;
    assert_eq!((drained.id, drained.barrier), (3, false));
    assert!(drained.outputs::<Photon>()?.is_empty());

    client.close()?;
    running.stop()
}
