use std::{fmt, io};

#[derive(Debug)]
pub enum ShmKvError {
    SharedMemory(shared_memory::ShmemError),
    Sync { op: &'static str, errno: i32 },
    Io(io::Error),
    PoisonedLock,
    Stopped,
    Logic(String),
}

impl fmt::Display for ShmKvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShmKvError::SharedMemory(e) => write!(f, "Shared memory error: {}", e),
            ShmKvError::Sync { op, errno } => write!(
                f,
                "Process-shared primitive error in {}: {}",
                op,
                io::Error::from_raw_os_error(*errno)
            ),
            ShmKvError::Io(e) => write!(f, "IO error: {}", e),
            ShmKvError::PoisonedLock => write!(f, "Shard mutex was poisoned"),
            ShmKvError::Stopped => write!(f, "Queue is shut down; request rejected"),
            ShmKvError::Logic(s) => write!(f, "Logic error: {}", s),
        }
    }
}

impl std::error::Error for ShmKvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShmKvError::SharedMemory(e) => Some(e),
            ShmKvError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<shared_memory::ShmemError> for ShmKvError {
    fn from(err: shared_memory::ShmemError) -> Self {
        ShmKvError::SharedMemory(err)
    }
}

impl From<io::Error> for ShmKvError {
    fn from(err: io::Error) -> Self {
        ShmKvError::Io(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for ShmKvError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ShmKvError::PoisonedLock
    }
}
