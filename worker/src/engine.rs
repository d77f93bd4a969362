use std::{fmt::Debug, io};

use comms::{Step, Tagged};
use serde::{Serialize, de::DeserializeOwned};

/// A bunch the engine finished converting.
#[derive(Debug)]
pub struct Finished<O, T, S> {
    pub bunch_id: u32,
    pub outputs: Vec<O>,
    /// Auxiliary per-output traces, index aligned with `outputs` when present.
    pub traces: Option<Vec<T>>,
    pub stats: S,
}

/// The accelerator backed conversion engine a worker drives.
///
/// Bunches are enqueued asynchronously and come back, in any order, through
/// `next_finished`. Any error returned by the engine is fatal for its worker.
#[async_trait::async_trait]
pub trait Engine: Send {
    type Step: Step;
    type Output: Tagged;
    type Trace: Serialize + DeserializeOwned + Send + 'static;
    type Stats: Debug + Send;

    /// Returns true once the engine is ready to take work.
    fn is_initialized(&self) -> bool;

    /// The granularity the device prefers to execute in.
    fn work_group_size(&self) -> usize;

    /// The maximum amount of steps a single bunch may hold.
    fn max_bunch_size(&self) -> usize;

    /// Enqueues a bunch of steps for conversion.
    ///
    /// # Arguments
    /// * `steps` - The steps to convert.
    /// * `bunch_id` - The identifier the finished bunch will be reported with.
    async fn enqueue(&mut self, steps: Vec<Self::Step>, bunch_id: u32) -> io::Result<()>;

    /// Waits until the next enqueued bunch is converted.
    async fn next_finished(
        &mut self,
    ) -> io::Result<Finished<Self::Output, Self::Trace, Self::Stats>>;
}
