//! An in-memory engine, it converts on the host and is meant for tests and dry runs.

use std::{collections::VecDeque, io};

use comms::{Step, Tagged};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::{Engine, Finished};

/// A propagation step for the loopback engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub weight: f32,
    #[serde(default)]
    pub noop: bool,
}

impl Segment {
    pub fn new(id: u32, weight: f32) -> Self {
        Self {
            id,
            weight,
            noop: false,
        }
    }
}

impl Tagged for Segment {
    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }
}

impl Step for Segment {
    fn noop() -> Self {
        Self {
            id: 0,
            weight: 0.,
            noop: true,
        }
    }
}

/// The output the loopback engine produces for every segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photon {
    pub id: u32,
    pub energy: f32,
}

impl Tagged for Photon {
    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }
}

/// The auxiliary trace the loopback engine attaches to every photon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub bunch_id: u32,
}

/// Counters for a single converted bunch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackStats {
    pub steps: usize,
    pub outputs: usize,
}

/// A bunch as it was handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub bunch_id: u32,
    pub len: usize,
    pub noops: usize,
}

/// The order in which enqueued bunches are reported as finished.
#[derive(Debug, Clone, Copy)]
pub enum Completion {
    Fifo,
    Lifo,
    Shuffled { seed: u64 },
}

/// Converts every segment into a photon carrying twice its weight.
pub struct LoopbackEngine {
    work_group_size: usize,
    max_bunch_size: usize,
    traces: bool,
    pending: VecDeque<(u32, Vec<Segment>)>,
    completion: Completion,
    rng: StdRng,
    observer: Option<mpsc::UnboundedSender<Submission>>,
}

impl LoopbackEngine {
    /// Creates a new `LoopbackEngine` that reports bunches in submission order.
    ///
    /// # Arguments
    /// * `work_group_size` - The execution granularity to advertise.
    /// * `max_bunch_size` - The maximum bunch size to advertise.
    pub fn new(work_group_size: usize, max_bunch_size: usize) -> Self {
        Self {
            work_group_size,
            max_bunch_size,
            traces: false,
            pending: VecDeque::new(),
            completion: Completion::Fifo,
            rng: StdRng::seed_from_u64(0),
            observer: None,
        }
    }

    /// Sets the order in which bunches are reported.
    pub fn with_completion(mut self, completion: Completion) -> Self {
        if let Completion::Shuffled { seed } = completion {
            self.rng = StdRng::seed_from_u64(seed);
        }

        self.completion = completion;
        self
    }

    /// Makes the engine attach a `Hop` trace to every photon.
    pub fn with_traces(mut self) -> Self {
        self.traces = true;
        self
    }

    /// Reports every enqueued bunch through the returned channel.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<Submission> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        rx
    }
}

#[async_trait::async_trait]
impl Engine for LoopbackEngine {
    type Step = Segment;
    type Output = Photon;
    type Trace = Hop;
    type Stats = LoopbackStats;

    fn is_initialized(&self) -> bool {
        true
    }

    fn work_group_size(&self) -> usize {
        self.work_group_size
    }

    fn max_bunch_size(&self) -> usize {
        self.max_bunch_size
    }

    async fn enqueue(&mut self, steps: Vec<Segment>, bunch_id: u32) -> io::Result<()> {
        if steps.len() > self.max_bunch_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "bunch {bunch_id} holds {} steps, at most {} are allowed",
                    steps.len(),
                    self.max_bunch_size
                ),
            ));
        }

        if let Some(observer) = &self.observer {
            let noops = steps.iter().filter(|s| s.noop).count();
            let submission = Submission {
                bunch_id,
                len: steps.len(),
                noops,
            };

            // Nobody listening is fine.
            let _ = observer.send(submission);
        }

        self.pending.push_back((bunch_id, steps));
        Ok(())
    }

    async fn next_finished(&mut self) -> io::Result<Finished<Photon, Hop, LoopbackStats>> {
        let next = match self.completion {
            Completion::Fifo => self.pending.pop_front(),
            Completion::Lifo => self.pending.pop_back(),
            Completion::Shuffled { .. } if self.pending.is_empty() => None,
            Completion::Shuffled { .. } => {
                let i = self.rng.random_range(0..self.pending.len());
                self.pending.remove(i)
            }
        };

        let Some((bunch_id, steps)) = next else {
            return Err(io::Error::other("no bunch in flight"));
        };

        let outputs: Vec<_> = steps
            .iter()
            .filter(|s| !s.noop)
            .map(|s| Photon {
                id: s.id,
                energy: 2. * s.weight,
            })
            .collect();

        let traces = self
            .traces
            .then(|| vec![Hop { bunch_id }; outputs.len()]);

        let stats = LoopbackStats {
            steps: steps.len(),
            outputs: outputs.len(),
        };

        Ok(Finished {
            bunch_id,
            outputs,
            traces,
            stats,
        })
    }
}
