use std::{fmt, io};

/// Library-level failures. Resource acquisition errors are fatal for the
/// operation that hit them; waiting on a full or empty ring is never an
/// error.
#[derive(Debug)]
pub enum QueueError {
    SharedMemory(shared_memory::ShmemError),
    Lock(Box<dyn std::error::Error + 'static>),
    Event(Box<dyn std::error::Error + 'static>),
    Io(io::Error),
    Config(String),
    Logic(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::SharedMemory(e) => write!(f, "shared memory error: {}", e),
            QueueError::Lock(e) => write!(f, "lock error: {}", e),
            QueueError::Event(e) => write!(f, "event error: {}", e),
            QueueError::Io(e) => write!(f, "I/O error: {}", e),
            QueueError::Config(s) => write!(f, "configuration error: {}", s),
            QueueError::Logic(s) => write!(f, "logic error: {}", s),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::SharedMemory(e) => Some(e),
            QueueError::Lock(e) => Some(e.as_ref()),
            QueueError::Event(e) => Some(e.as_ref()),
            QueueError::Io(e) => Some(e),
            QueueError::Config(_) => None,
            QueueError::Logic(_) => None,
        }
    }
}

impl From<shared_memory::ShmemError> for QueueError {
    fn from(err: shared_memory::ShmemError) -> Self {
        QueueError::SharedMemory(err)
    }
}

impl From<io::Error> for QueueError {
    fn from(err: io::Error) -> Self {
        QueueError::Io(err)
    }
}
