use std::{collections::HashMap, mem};

use comms::{Capabilities, Multipart, Step, Tagged, inproc::Dealer, msg};
use log::{debug, info, trace};
use tokio_util::sync::CancellationToken;

use crate::{
    BunchIndex, StepIdMap,
    engine::{Engine, Finished},
    error::{Result, WorkerErr},
    request::{ClientRequest, Completed},
};

type Accumulator<E> = ClientRequest<<E as Engine>::Output, <E as Engine>::Trace>;

/// The results of requests completed while handling a message.
pub type CompletedBatch<E> = Vec<Completed<<E as Engine>::Output, <E as Engine>::Trace>>;

/// Turns the step streams of possibly interleaved requests into engine sized bunches, and
/// the engine's output back into per request results.
pub struct Worker<E: Engine> {
    worker_id: usize,
    engine: E,
    work_group_size: usize,
    max_bunch_size: usize,
    next_bunch: u32,
    residue: Vec<E::Step>,
    steps: StepIdMap,
    bunches: BunchIndex,
    requests: HashMap<u32, Accumulator<E>>,
}

impl<E: Engine> Worker<E> {
    /// Creates a new `Worker`.
    ///
    /// # Args
    /// * `worker_id` - Identifier used for observability.
    /// * `engine` - The engine this worker exclusively drives.
    /// * `caps` - The negotiated batching constraints.
    ///
    /// # Returns
    /// A new worker instance, or an error if the engine isn't ready to take work or if
    /// `caps` can't hold a whole work group.
    pub fn new(worker_id: usize, engine: E, caps: Capabilities) -> Result<Self> {
        if !engine.is_initialized() {
            return Err(WorkerErr::EngineNotInitialized);
        }

        let Capabilities {
            work_group_size,
            max_bunch_size,
        } = caps;

        if work_group_size == 0 || max_bunch_size == 0 || max_bunch_size % work_group_size != 0 {
            return Err(WorkerErr::InvalidCapabilities {
                work_group_size,
                max_bunch_size,
            });
        }

        Ok(Self {
            worker_id,
            engine,
            work_group_size,
            max_bunch_size,
            next_bunch: 0,
            residue: Vec::new(),
            steps: StepIdMap::new(),
            bunches: BunchIndex::new(),
            requests: HashMap::new(),
        })
    }

    /// Returns the amount of steps waiting for a bunch to be filled or flushed.
    pub fn pending_steps(&self) -> usize {
        self.residue.len()
    }

    /// Returns the amount of requests that haven't been completed yet.
    pub fn open_requests(&self) -> usize {
        self.requests.len()
    }

    /// Serves the broker until `shutdown` is cancelled or the broker goes away.
    ///
    /// The worker announces itself idle on start and after handling every message.
    ///
    /// # Args
    /// * `dealer` - This worker's link with the broker.
    /// * `shutdown` - The process wide shutdown signal.
    ///
    /// # Errors
    /// Returns `WorkerErr` on engine or io failures and on protocol violations.
    pub async fn run(mut self, mut dealer: Dealer, shutdown: CancellationToken) -> Result<()> {
        let worker_id = self.worker_id;
        info!(worker_id = worker_id; "worker started");

        dealer.send(msg::idle_signal()).await?;

        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                msg = dealer.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            for done in self.handle(msg).await? {
                debug!(
                    worker_id = worker_id, request = done.request;
                    "request complete with {} outputs", done.outputs.len()
                );
                dealer.send(done.into_multipart()?).await?;
            }

            dealer.send(msg::idle_signal()).await?;
        }

        info!(worker_id = worker_id; "worker stopped");
        Ok(())
    }

    /// Handles a single message from the broker, either a work submission
    /// `[steps, request id]` or a flush.
    ///
    /// Every bunch submitted because of this message is collected before returning.
    ///
    /// # Returns
    /// The requests completed as a consequence of this message.
    pub async fn handle(&mut self, msg: Multipart) -> Result<CompletedBatch<E>> {
        let mut completed = Vec::new();

        let submitted = match msg.as_slice() {
            [frame] if frame == msg::FLUSH => self.flush().await?,
            [steps, request] => {
                let request = msg::decode_id(request)?;
                let steps = msg::decode_items(steps)?;
                let submitted = self.dispatch(request, steps).await?;

                // Only an empty submission is left without any bunch.
                if self.bunches.outstanding(request) == 0 {
                    completed.push(self.complete(request));
                }

                submitted
            }
            frames => {
                return Err(WorkerErr::UnexpectedMessage {
                    frames: frames.len(),
                });
            }
        };

        self.collect(submitted, &mut completed).await?;
        Ok(completed)
    }

    /// Maps the steps of `request` into the local id space and submits every bunch that
    /// fills up.
    ///
    /// # Returns
    /// The amount of bunches submitted to the engine.
    pub async fn dispatch(&mut self, request: u32, steps: Vec<E::Step>) -> Result<usize> {
        self.requests.entry(request).or_default();

        for mut step in steps {
            let local = self.steps.assign(request, step.id());
            trace!(request = request; "step {} mapped to {local}", step.id());
            step.set_id(local);
            self.residue.push(step);
        }

        let mut submitted = 0;
        while self.residue.len() >= self.max_bunch_size {
            let bunch: Vec<_> = self.residue.drain(..self.max_bunch_size).collect();
            self.bunches.associate(self.next_bunch, request);
            self.submit(bunch).await?;
            submitted += 1;
        }

        // The residue will travel in the next bunch, whenever it's filled or flushed.
        if !self.residue.is_empty() {
            self.bunches.associate(self.next_bunch, request);
        }

        Ok(submitted)
    }

    /// Submits every pending step as a final bunch, padded with no-op steps up to a
    /// multiple of the work group size.
    ///
    /// # Returns
    /// The amount of bunches submitted to the engine, zero or one.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.residue.is_empty() {
            return Ok(0);
        }

        let mut bunch = mem::take(&mut self.residue);
        let padded = bunch.len().next_multiple_of(self.work_group_size);
        bunch.resize_with(padded, <E::Step as Step>::noop);

        self.submit(bunch).await?;
        Ok(1)
    }

    /// Waits for `n` bunches to come back from the engine, in whatever order they finish.
    ///
    /// # Args
    /// * `n` - The amount of bunches to wait for.
    /// * `completed` - Where to push the requests that became complete.
    ///
    /// # Errors
    /// Fails on engine errors or if an output can't be mapped back to its step.
    pub async fn collect(&mut self, n: usize, completed: &mut CompletedBatch<E>) -> Result<()> {
        for _ in 0..n {
            let finished = self.engine.next_finished().await?;
            debug!(
                worker_id = self.worker_id, bunch_id = finished.bunch_id;
                "bunch finished: {:?}", finished.stats
            );

            let Finished {
                bunch_id,
                outputs,
                traces,
                ..
            } = finished;

            let mut traces = traces.map(Vec::into_iter);

            for mut output in outputs {
                let local = output.id();
                let Some((request, step)) = self.steps.resolve(local) else {
                    return Err(WorkerErr::UnknownLocalStep { bunch_id, local });
                };

                output.set_id(step);
                let trace = traces.as_mut().and_then(Iterator::next);
                self.requests.entry(request).or_default().push(output, trace);
            }

            for request in self.bunches.retire(bunch_id) {
                completed.push(self.complete(request));
            }
        }

        Ok(())
    }

    async fn submit(&mut self, bunch: Vec<E::Step>) -> Result<()> {
        let bunch_id = self.next_bunch;
        debug!(
            worker_id = self.worker_id, bunch_id = bunch_id;
            "submitting bunch of {} steps", bunch.len()
        );

        self.engine.enqueue(bunch, bunch_id).await?;
        self.next_bunch = bunch_id.wrapping_add(1);
        Ok(())
    }

    fn complete(&mut self, request: u32) -> Completed<E::Output, E::Trace> {
        let erased = self.steps.erase_request(request);
        trace!(
            request = request;
            "released {erased} step mappings, {} still alive", self.steps.len()
        );

        self.requests
            .remove(&request)
            .unwrap_or_default()
            .complete(request)
    }
}
