use serde_derive::{Deserialize, Serialize};
use tracing::info;

use crate::core::{open_ring, RingBuffer, ShmValue, ShmemConfig};
use crate::errors::QueueError;

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub shmem: ShmemConfig,
}

/// Consumer end of a named queue. Creating one for a name that does not
/// exist yet creates and initializes the backing segment.
pub struct QueueReader<T: ShmValue> {
    ring: Box<dyn RingBuffer<T>>,
    queue_name: String,
}

impl<T: ShmValue> QueueReader<T> {
    pub fn new(cfg: &ReaderConfig) -> Result<QueueReader<T>, QueueError> {
        let ring = open_ring(&cfg.shmem)?;
        info!(queue = %cfg.shmem.queue_name, capacity = ring.capacity(), "reader attached");
        Ok(QueueReader {
            ring,
            queue_name: cfg.shmem.queue_name.clone(),
        })
    }

    /// Remove the oldest value, waiting while the ring is empty.
    pub fn pop(&self) -> Result<T, QueueError> {
        self.ring.pop()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Unmap this process's view. The backing name disappears with the
    /// creating process's handle.
    pub fn close(self) {
        info!(queue = %self.queue_name, "reader closed");
    }
}
