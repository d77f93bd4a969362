use std::{error::Error, fmt, io};

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures, all of them are fatal for the worker.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    UnexpectedMessage { frames: usize },
    UnknownLocalStep { bunch_id: u32, local: u32 },
    EngineNotInitialized,
    InvalidCapabilities {
        work_group_size: usize,
        max_bunch_size: usize,
    },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::UnexpectedMessage { frames } => {
                write!(f, "unexpected message from the broker with {frames} frames")
            }
            WorkerErr::UnknownLocalStep { bunch_id, local } => write!(
                f,
                "bunch {bunch_id} returned an output for local step {local} which has no mapping"
            ),
            WorkerErr::EngineNotInitialized => f.write_str("the engine is not initialized"),
            WorkerErr::InvalidCapabilities {
                work_group_size,
                max_bunch_size,
            } => write!(
                f,
                "a maximum bunch size of {max_bunch_size} isn't a whole amount of work groups of {work_group_size}"
            ),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
