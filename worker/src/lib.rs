pub mod engine;
pub mod error;
mod index;
pub mod loopback;
mod mapping;
pub mod request;
pub mod worker;

pub use engine::{Engine, Finished};
pub use error::{Result, WorkerErr};
pub use index::BunchIndex;
pub use mapping::StepIdMap;
pub use worker::Worker;
