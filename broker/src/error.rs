use std::{error::Error, fmt, io};

use worker::WorkerErr;

/// The broker module's result type.
pub type Result<T> = std::result::Result<T, BrokerErr>;

/// Broker failures. Configuration and protocol errors are fatal for the whole service.
#[derive(Debug)]
pub enum BrokerErr {
    Io(io::Error),
    NoEngines,
    TooManyEngines { got: usize },
    ZeroBunchSize { work_group_size: usize, max_bunch_size: usize },
    EngineNotInitialized,
    ClientIdCollision { id: u32 },
    UnexpectedMessage { frames: usize },
    NoIdleWorker,
    Worker(WorkerErr),
}

impl fmt::Display for BrokerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerErr::Io(e) => write!(f, "io error: {e}"),
            BrokerErr::NoEngines => f.write_str("no engine was configured"),
            BrokerErr::TooManyEngines { got } => {
                write!(f, "a single engine is supported, got {got}")
            }
            BrokerErr::ZeroBunchSize {
                work_group_size,
                max_bunch_size,
            } => write!(
                f,
                "a maximum bunch size of {max_bunch_size} holds no whole work group of {work_group_size}"
            ),
            BrokerErr::EngineNotInitialized => f.write_str("the engine is not initialized"),
            BrokerErr::ClientIdCollision { id } => {
                write!(f, "client id {id} is already in flight")
            }
            BrokerErr::UnexpectedMessage { frames } => {
                write!(f, "unexpected message with {frames} frames")
            }
            BrokerErr::NoIdleWorker => f.write_str("work was routed with no idle worker"),
            BrokerErr::Worker(e) => write!(f, "worker failed: {e}"),
        }
    }
}

impl Error for BrokerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrokerErr::Io(e) => Some(e),
            BrokerErr::Worker(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BrokerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<WorkerErr> for BrokerErr {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::EngineNotInitialized => Self::EngineNotInitialized,
            other => Self::Worker(other),
        }
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<BrokerErr> for io::Error {
    fn from(value: BrokerErr) -> Self {
        match value {
            BrokerErr::Io(e) => e,
            BrokerErr::Worker(e) => e.into(),
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}
